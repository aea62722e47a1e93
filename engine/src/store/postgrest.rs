//! PostgREST (Supabase REST) store client.
//!
//! ```text
//!   POST   {url}/rest/v1/{table}                 insert / upsert
//!   HEAD   {url}/rest/v1/{table}?col=eq.v        exact count (Content-Range)
//!   GET    {url}/rest/v1/{table}?select=col      column values
//!   DELETE {url}/rest/v1/{table}?col=eq.v        scoped delete
//! ```

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{Filter, Order, RemoteStore, Row, WriteMode};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Page size for unbounded column selects.
const PAGE_SIZE: usize = 1000;

/// PostgREST error body
#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Clone)]
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    key: String,
}

impl PostgrestStore {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    fn with_filters(builder: RequestBuilder, filters: &[Filter]) -> RequestBuilder {
        let params: Vec<(String, String)> = filters
            .iter()
            .map(|f| (f.column.clone(), format!("eq.{}", f.value)))
            .collect();
        builder.query(&params)
    }

    async fn send(builder: RequestBuilder) -> StoreResult<Response> {
        builder.send().await.map_err(|e| {
            if e.is_connect() {
                StoreError::Unavailable(e.to_string())
            } else {
                StoreError::Transport(e.to_string())
            }
        })
    }

    /// Turn a non-success response into [`StoreError::Rejected`].
    async fn check(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message: describe_error(&body),
        })
    }

    async fn select_page(
        &self,
        table: &str,
        column: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Value>> {
        let mut builder = self
            .authorized(self.client.get(self.endpoint(table)))
            .query(&[("select", column)])
            .query(&[("limit", limit), ("offset", offset)]);
        if let Some(order) = order {
            let dir = if order.descending { "desc" } else { "asc" };
            builder = builder.query(&[("order", format!("{}.{}", order.column, dir))]);
        }
        let builder = Self::with_filters(builder, filters);

        let response = Self::check(Self::send(builder).await?).await?;
        let rows: Vec<Row> = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|mut r| r.remove(column).unwrap_or(Value::Null))
            .collect())
    }
}

/// Flatten a PostgREST error body into one line.
fn describe_error(body: &str) -> String {
    match serde_json::from_str::<PostgrestError>(body) {
        Ok(err) => {
            let mut parts = vec![err.message];
            parts.extend(err.details.filter(|d| !d.is_empty()));
            parts.extend(err.hint.filter(|h| !h.is_empty()).map(|h| format!("hint: {}", h)));
            parts.extend(err.code.map(|c| format!("code {}", c)));
            parts.join(" | ")
        }
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range(headers: &HeaderMap) -> StoreResult<u64> {
    let raw = headers
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| StoreError::InvalidResponse("missing Content-Range header".to_string()))?;

    raw.rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::InvalidResponse(format!("unparseable Content-Range '{}'", raw)))
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn ping(&self, table: &str) -> StoreResult<()> {
        let builder = self
            .authorized(self.client.get(self.endpoint(table)))
            .query(&[("select", "*"), ("limit", "1")]);

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::Unavailable(format!(
                "credentials rejected (HTTP {})",
                response.status().as_u16()
            ))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Unavailable(format!(
                    "table '{}' not reachable (HTTP {}): {}",
                    table,
                    status.as_u16(),
                    describe_error(&body)
                )))
            }
        }
    }

    async fn insert(&self, table: &str, rows: &[Row], mode: &WriteMode) -> StoreResult<()> {
        let mut builder = self.authorized(self.client.post(self.endpoint(table)));
        builder = match mode {
            WriteMode::Insert => builder.header("Prefer", "return=minimal"),
            WriteMode::Upsert { on_conflict } => builder
                .header("Prefer", "return=minimal,resolution=merge-duplicates")
                .query(&[("on_conflict", on_conflict.as_str())]),
        };

        Self::check(Self::send(builder.json(rows)).await?).await?;
        Ok(())
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> StoreResult<u64> {
        let builder = self
            .authorized(self.client.head(self.endpoint(table)))
            .header("Prefer", "count=exact")
            .query(&[("select", "*")]);
        let builder = Self::with_filters(builder, filters);

        let response = Self::check(Self::send(builder).await?).await?;
        parse_content_range(response.headers())
    }

    async fn select_column(
        &self,
        table: &str,
        column: &str,
        filters: &[Filter],
        order: Option<&Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        if let Some(limit) = limit {
            return self.select_page(table, column, filters, order, limit, 0).await;
        }

        // PostgREST caps responses server-side, so page until a short page.
        let mut values = Vec::new();
        loop {
            let page = self
                .select_page(table, column, filters, order, PAGE_SIZE, values.len())
                .await?;
            let done = page.len() < PAGE_SIZE;
            values.extend(page);
            if done {
                return Ok(values);
            }
        }
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<u64> {
        if filters.is_empty() {
            return Err(StoreError::Rejected {
                status: 400,
                message: "refusing unfiltered DELETE".to_string(),
            });
        }
        let builder = self
            .authorized(self.client.delete(self.endpoint(table)))
            .header("Prefer", "return=minimal,count=exact");
        let builder = Self::with_filters(builder, filters);

        let response = Self::check(Self::send(builder).await?).await?;
        Ok(parse_content_range(response.headers()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Duration;

    #[test]
    fn test_parse_content_range() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", HeaderValue::from_static("0-24/3573"));
        assert_eq!(parse_content_range(&headers).unwrap(), 3573);

        headers.insert("content-range", HeaderValue::from_static("*/0"));
        assert_eq!(parse_content_range(&headers).unwrap(), 0);

        headers.insert("content-range", HeaderValue::from_static("0-24/*"));
        assert!(parse_content_range(&headers).is_err());
    }

    #[test]
    fn test_describe_error() {
        let body = r#"{"code":"23502","details":"Failing row contains (null).","hint":null,"message":"null value in column \"descricao\" violates not-null constraint"}"#;
        let msg = describe_error(body);
        assert!(msg.starts_with("null value in column"));
        assert!(msg.contains("Failing row"));
        assert!(msg.contains("code 23502"));
        assert_eq!(describe_error(""), "empty response body");
        assert_eq!(describe_error("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_endpoint() {
        let config = StoreConfig {
            url: "https://abc.supabase.co/".into(),
            key: "k".into(),
            key_kind: crate::config::KeyKind::Service,
            timeout: Duration::from_secs(5),
        };
        let store = PostgrestStore::new(&config).unwrap();
        assert_eq!(store.endpoint("sinapi_insumos"), "https://abc.supabase.co/rest/v1/sinapi_insumos");
    }

    #[tokio::test]
    async fn test_ping_unreachable_is_unavailable() {
        let config = StoreConfig {
            url: "http://127.0.0.1:9".into(),
            key: "k".into(),
            key_kind: crate::config::KeyKind::Anon,
            timeout: Duration::from_secs(2),
        };
        let store = PostgrestStore::new(&config).unwrap();
        let err = store.ping("sinapi_insumos").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
