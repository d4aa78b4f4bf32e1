//! Paradigm discovery and loading.
//!
//! Blueprints come from a pluggable source; the default reads
//! `<dir>/<name>.json` from a filesystem directory. The registry caches
//! parsed blueprints per name (blueprints are immutable once loaded).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::Paradigm;
use crate::error::{EngineError, EngineResult};

/// A source of paradigm blueprints. Anything exposing `load` and
/// `list_manifest` may be injected in place of the filesystem default.
#[async_trait]
pub trait ParadigmSource: Send + Sync {
    async fn load(&self, name: &str) -> EngineResult<Paradigm>;
    async fn list_manifest(&self) -> EngineResult<String>;
}

/// Filesystem-backed source reading one JSON file per paradigm
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl ParadigmSource for DirectorySource {
    async fn load(&self, name: &str) -> EngineResult<Paradigm> {
        let path = self.path_for(name);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| EngineError::ParadigmNotFound {
                name: name.to_string(),
            })?;
        Paradigm::from_json(name, &text)
    }

    async fn list_manifest(&self) -> EngineResult<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::io(&self.dir.display().to_string(), &e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(&self.dir.display().to_string(), &e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        let mut manifest = String::new();
        for name in names {
            let paradigm = self.load(&name).await?;
            manifest.push_str(&manifest_entry(&name, &paradigm));
        }
        Ok(manifest)
    }
}

/// Render one bulleted manifest line for a paradigm
#[must_use]
pub fn manifest_entry(name: &str, paradigm: &Paradigm) -> String {
    format!(
        "- {}: {} (vertical: [{}]; horizontal: [{}])\n",
        name,
        paradigm.metadata.description,
        paradigm.vertical_keys().join(", "),
        paradigm.horizontal_keys().join(", "),
    )
}

/// Caching front for a paradigm source
pub struct ParadigmRegistry {
    source: Arc<dyn ParadigmSource>,
    cache: RwLock<HashMap<String, Arc<Paradigm>>>,
}

impl ParadigmRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn ParadigmSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Convenience constructor over a filesystem directory
    #[must_use]
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectorySource::new(dir)))
    }

    /// Load a paradigm, consulting the cache first.
    ///
    /// # Errors
    ///
    /// `ParadigmNotFound` for unknown names, `ParadigmMalformed` when the
    /// blueprint does not parse or fails structural validation.
    pub async fn load(&self, name: &str) -> EngineResult<Arc<Paradigm>> {
        if let Some(cached) = self.cache.read().await.get(name) {
            debug!(paradigm = %name, "paradigm cache hit");
            return Ok(Arc::clone(cached));
        }
        let paradigm = Arc::new(self.source.load(name).await?);
        self.cache
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&paradigm));
        info!(paradigm = %name, "paradigm loaded");
        Ok(paradigm)
    }

    /// Machine-addressable catalog of every loadable paradigm
    pub async fn list_manifest(&self) -> EngineResult<String> {
        self.source.list_manifest().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blueprint_text(description: &str) -> String {
        json!({
            "metadata": {
                "description": description,
                "inputs": {
                    "vertical": {"instruction": "states.function.concept.name"},
                    "horizontal": {"input_1": "the question"}
                }
            },
            "env_spec": {"tools": []},
            "sequence_spec": {"steps": []}
        })
        .to_string()
    }

    fn write_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ask_user.json"), blueprint_text("ask the user")).unwrap();
        std::fs::write(
            dir.path().join("prompt_and_save.json"),
            blueprint_text("prompt then save"),
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_known_paradigm() {
        let dir = write_dir();
        let registry = ParadigmRegistry::from_dir(dir.path());
        let paradigm = registry.load("ask_user").await.unwrap();
        assert_eq!(paradigm.metadata.description, "ask the user");
    }

    #[tokio::test]
    async fn test_unknown_name_is_fatal() {
        let dir = write_dir();
        let registry = ParadigmRegistry::from_dir(dir.path());
        let err = registry.load("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::ParadigmNotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_json_is_fatal() {
        let dir = write_dir();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let registry = ParadigmRegistry::from_dir(dir.path());
        let err = registry.load("broken").await.unwrap_err();
        assert!(matches!(err, EngineError::ParadigmMalformed { .. }));
    }

    #[tokio::test]
    async fn test_manifest_lists_every_loadable_paradigm() {
        let dir = write_dir();
        let registry = ParadigmRegistry::from_dir(dir.path());
        let manifest = registry.list_manifest().await.unwrap();
        assert_eq!(manifest.lines().count(), 2);
        assert!(manifest.contains("- ask_user: ask the user"));
        assert!(manifest.contains("vertical: [instruction]"));
        assert!(manifest.contains("horizontal: [input_1]"));
        // every listed name loads
        for line in manifest.lines() {
            let name = line
                .trim_start_matches("- ")
                .split(':')
                .next()
                .unwrap()
                .to_string();
            assert!(registry.load(&name).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_cache_returns_same_blueprint() {
        let dir = write_dir();
        let registry = ParadigmRegistry::from_dir(dir.path());
        let first = registry.load("ask_user").await.unwrap();
        std::fs::remove_file(dir.path().join("ask_user.json")).unwrap();
        // still served from cache after the file disappears
        let second = registry.load("ask_user").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
