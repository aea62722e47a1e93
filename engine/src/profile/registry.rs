//! Profile Registry - built-in and on-disk import profiles
//!
//! The three SINAPI profiles are compiled into the binary. Extra profiles
//! can be dropped as JSON files into a registry directory, or referenced
//! directly by path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::ImportProfile;
use crate::error::{ProfileError, ProfileResult};
use crate::schema::check_columns;

/// Directory scanned for extra profiles (relative to current dir)
pub const DEFAULT_REGISTRY_DIR: &str = ".sinapi-load/profiles";

const BUILTIN_PROFILES: [(&str, &str); 3] = [
    ("insumos", include_str!("../../profiles/insumos.json")),
    ("manutencoes", include_str!("../../profiles/manutencoes.json")),
    ("composicoes_mao_obra", include_str!("../../profiles/composicoes_mao_obra.json")),
];

/// Registry of import profiles, keyed by name.
pub struct ProfileRegistry {
    profiles: BTreeMap<String, ImportProfile>,
}

impl ProfileRegistry {
    /// Built-in profiles plus any found in [`DEFAULT_REGISTRY_DIR`].
    pub fn new() -> ProfileResult<Self> {
        let mut registry = Self::builtin()?;
        registry.load_dir(DEFAULT_REGISTRY_DIR);
        Ok(registry)
    }

    /// Only the embedded profiles.
    pub fn builtin() -> ProfileResult<Self> {
        let mut profiles = BTreeMap::new();
        for (name, json) in BUILTIN_PROFILES {
            let profile = ImportProfile::from_json(json)?;
            profiles.insert(name.to_string(), profile);
        }
        Ok(Self { profiles })
    }

    /// Load every `*.json` profile in `dir`. Unparseable files are logged
    /// and skipped; a directory profile overrides a built-in of the same name.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match load_file(&path) {
                    Ok(profile) => {
                        tracing::debug!(profile = %profile.name, path = %path.display(), "profile registered");
                        self.profiles.insert(profile.name.clone(), profile);
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping invalid profile"),
                }
            }
        }
    }

    pub fn list(&self) -> Vec<&ImportProfile> {
        self.profiles.values().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ImportProfile> {
        self.profiles.get(name)
    }

    /// Resolve a registered name or a path to a profile JSON file.
    pub fn resolve(&self, name_or_path: &str) -> ProfileResult<ImportProfile> {
        if let Some(profile) = self.profiles.get(name_or_path) {
            return Ok(profile.clone());
        }

        let path = PathBuf::from(name_or_path);
        if path.is_file() {
            return load_file(&path);
        }

        Err(ProfileError::NotFound(name_or_path.to_string()))
    }

    /// Profiles whose primary required columns all match these headers.
    pub fn find_compatible(&self, headers: &[String]) -> Vec<&ImportProfile> {
        self.profiles
            .values()
            .filter(|p| {
                !p.primary.required_columns.is_empty()
                    && check_columns(headers, &p.primary.required_columns).passed()
            })
            .collect()
    }
}

/// Load a profile from a JSON file.
pub fn load_file(path: &Path) -> ProfileResult<ImportProfile> {
    let content = fs::read_to_string(path)?;
    ImportProfile::from_json(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FieldKind;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_profiles_are_valid() {
        let registry = ProfileRegistry::builtin().unwrap();
        let names: Vec<&str> = registry.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["composicoes_mao_obra", "insumos", "manutencoes"]);
    }

    #[test]
    fn test_insumos_has_all_state_prices() {
        let registry = ProfileRegistry::builtin().unwrap();
        let insumos = registry.get("insumos").unwrap();
        let prices: Vec<_> = insumos
            .primary
            .fields
            .iter()
            .filter(|f| f.name.starts_with("preco_"))
            .collect();
        assert_eq!(prices.len(), 27);
        assert!(prices.iter().all(|f| f.kind == FieldKind::Number));
    }

    #[test]
    fn test_composicoes_has_secondary() {
        let registry = ProfileRegistry::builtin().unwrap();
        let profile = registry.get("composicoes_mao_obra").unwrap();
        assert_eq!(profile.secondaries.len(), 1);
        assert_eq!(profile.secondaries[0].sheet.as_deref(), Some("COM Desoneração"));
        assert!(profile.secondaries[0].field("preco_com_sp").is_some());
    }

    #[test]
    fn test_resolve_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        let json = r#"{
            "name": "custom",
            "table": "items",
            "natural_key": "code",
            "primary": { "fields": [ { "name": "code", "match": { "by": "equals", "label": "Code" } } ] }
        }"#;
        fs::write(&path, json).unwrap();

        let registry = ProfileRegistry::builtin().unwrap();
        let profile = registry.resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(profile.name, "custom");
        assert!(matches!(registry.resolve("nope"), Err(ProfileError::NotFound(_))));
    }

    #[test]
    fn test_load_dir_skips_invalid() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let mut registry = ProfileRegistry::builtin().unwrap();
        registry.load_dir(dir.path());
        assert_eq!(registry.list().len(), 3);
    }

    #[test]
    fn test_find_compatible_by_headers() {
        let registry = ProfileRegistry::builtin().unwrap();
        let headers: Vec<String> = vec![
            "Referência".into(),
            "Tipo".into(),
            "Código".into(),
            "Descrição".into(),
            "Manutenção".into(),
        ];
        let found: Vec<&str> = registry
            .find_compatible(&headers)
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(found, vec!["manutencoes"]);
    }
}
