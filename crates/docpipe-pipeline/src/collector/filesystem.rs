//! Local directory datasource
//!
//! Walks `root` and emits every matching file modified after the stored
//! cursor. Document ids are derived from the datasource id and the relative
//! path, so a re-ingested file replaces its earlier version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docpipe_core::{
    CancellationToken, CoreError, Datasource, DatasourceBatch, DatasourceConfig, Document,
    Identified, Result,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemSettings {
    pub root: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

/// Cursor persisted between fetches
///
/// Files older than `high_water_ms` were already emitted. Files at exactly
/// `high_water_ms` were emitted only if listed in `paths_at_high_water`, so a
/// file written in the same millisecond after a scan is still picked up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemCursor {
    /// Newest modification time emitted so far (unix millis)
    #[serde(default)]
    pub high_water_ms: i64,
    #[serde(default)]
    pub paths_at_high_water: Vec<String>,
}

impl FilesystemCursor {
    fn already_emitted(&self, modified_ms: i64, path: &str) -> bool {
        modified_ms < self.high_water_ms
            || (modified_ms == self.high_water_ms
                && self.paths_at_high_water.iter().any(|p| p == path))
    }
}

pub struct FilesystemDatasource {
    id: Uuid,
    settings: FilesystemSettings,
}

impl FilesystemDatasource {
    pub const KIND: &'static str = "filesystem";

    pub fn from_config(config: &DatasourceConfig) -> Result<Self> {
        let settings: FilesystemSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| CoreError::Validation(format!("filesystem settings: {}", e)))?;
        Ok(Self {
            id: config.id,
            settings,
        })
    }

    pub fn settings(&self) -> &FilesystemSettings {
        &self.settings
    }
}

impl Identified for FilesystemDatasource {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[async_trait]
impl Datasource for FilesystemDatasource {
    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn get_data(
        &self,
        cancel: &CancellationToken,
        state: &serde_json::Value,
    ) -> Result<DatasourceBatch> {
        let cursor = if state.is_null() {
            FilesystemCursor::default()
        } else {
            serde_json::from_value(state.clone())
                .map_err(|e| CoreError::datasource(format!("invalid filesystem cursor: {}", e)))?
        };

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let settings = self.settings.clone();
        let id = self.id;
        let (documents, next) =
            tokio::task::spawn_blocking(move || scan(&settings, id, cursor))
                .await
                .map_err(|e| CoreError::datasource(format!("filesystem scan aborted: {}", e)))??;

        debug!(
            datasource_id = %self.id,
            documents = documents.len(),
            high_water_ms = next.high_water_ms,
            "Scanned directory"
        );

        Ok(DatasourceBatch::new(documents, serde_json::to_value(next)?))
    }

    fn validate(&self) -> Result<()> {
        if !self.settings.root.is_dir() {
            return Err(CoreError::Validation(format!(
                "filesystem root is not a directory: {}",
                self.settings.root.display()
            )));
        }
        if self.settings.extensions.is_empty() {
            return Err(CoreError::Validation(
                "filesystem datasource needs at least one extension".to_string(),
            ));
        }
        Ok(())
    }
}

fn scan(
    settings: &FilesystemSettings,
    datasource_id: Uuid,
    cursor: FilesystemCursor,
) -> Result<(Vec<Document>, FilesystemCursor)> {
    let mut documents = Vec::new();
    let mut high_water = cursor.high_water_ms;
    let mut at_high_water: BTreeSet<String> = cursor.paths_at_high_water.iter().cloned().collect();

    let walker = WalkDir::new(&settings.root)
        .follow_links(settings.follow_symlinks)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| CoreError::datasource(e.to_string()))?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), &settings.extensions) {
            continue;
        }

        let modified_ms = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let relative = entry
            .path()
            .strip_prefix(&settings.root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        if cursor.already_emitted(modified_ms, &relative) {
            continue;
        }

        let body = match std::fs::read_to_string(entry.path()) {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };

        match modified_ms.cmp(&high_water) {
            Ordering::Greater => {
                high_water = modified_ms;
                at_high_water.clear();
                at_high_water.insert(relative.clone());
            }
            Ordering::Equal => {
                at_high_water.insert(relative.clone());
            }
            Ordering::Less => {}
        }

        let title = entry.file_name().to_string_lossy().to_string();
        let modified_at = DateTime::<Utc>::from_timestamp_millis(modified_ms).unwrap_or_default();

        documents.push(
            Document::new(title, body)
                .with_id(Uuid::new_v5(&datasource_id, relative.as_bytes()))
                .with_metadata("path", serde_json::Value::String(relative))
                .with_metadata("modified_at", serde_json::Value::String(modified_at.to_rfc3339())),
        );
    }

    Ok((
        documents,
        FilesystemCursor {
            high_water_ms: high_water,
            paths_at_high_water: at_high_water.into_iter().collect(),
        },
    ))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(root: &Path) -> DatasourceConfig {
        DatasourceConfig::new("docs", FilesystemDatasource::KIND)
            .with_settings(serde_json::json!({ "root": root }))
    }

    #[tokio::test]
    async fn test_scan_emits_matching_files_and_advances_cursor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        std::fs::write(dir.path().join("c.bin"), "skip").unwrap();

        let cfg = config(dir.path());
        let source = FilesystemDatasource::from_config(&cfg).unwrap();
        source.validate().unwrap();

        let batch = source
            .get_data(&CancellationToken::new(), &serde_json::Value::Null)
            .await
            .unwrap();

        let titles: Vec<&str> = batch.documents.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["a.md", "b.txt"]);
        assert_eq!(
            batch.documents[0].id,
            Uuid::new_v5(&cfg.id, "a.md".as_bytes())
        );

        let again = source.get_data(&CancellationToken::new(), &batch.state).await.unwrap();
        assert!(again.documents.is_empty());
        assert_eq!(again.state, batch.state);
    }

    #[tokio::test]
    async fn test_file_written_in_same_millisecond_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("b.md");
        std::fs::write(&first, "first").unwrap();
        let modified = std::fs::metadata(&first).unwrap().modified().unwrap();
        let high_water_ms = modified.duration_since(UNIX_EPOCH).unwrap().as_millis() as i64;

        let source = FilesystemDatasource::from_config(&config(dir.path())).unwrap();
        let batch = source
            .get_data(&CancellationToken::new(), &serde_json::Value::Null)
            .await
            .unwrap();
        let cursor: FilesystemCursor = serde_json::from_value(batch.state.clone()).unwrap();
        assert_eq!(
            cursor,
            FilesystemCursor {
                high_water_ms,
                paths_at_high_water: vec!["b.md".to_string()],
            }
        );

        // sorts before the first file and shares its timestamp
        let late = dir.path().join("a.md");
        std::fs::write(&late, "late").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&late)
            .unwrap()
            .set_modified(modified)
            .unwrap();

        let next = source.get_data(&CancellationToken::new(), &batch.state).await.unwrap();
        let titles: Vec<&str> = next.documents.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["a.md"]);

        let cursor: FilesystemCursor = serde_json::from_value(next.state.clone()).unwrap();
        assert_eq!(cursor.paths_at_high_water, vec!["a.md".to_string(), "b.md".to_string()]);

        let idle = source.get_data(&CancellationToken::new(), &next.state).await.unwrap();
        assert!(idle.documents.is_empty());
    }

    #[test]
    fn test_validate_rejects_missing_root() {
        let cfg = config(Path::new("/definitely/not/here"));
        let source = FilesystemDatasource::from_config(&cfg).unwrap();
        assert!(matches!(source.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_settings_must_name_root() {
        let cfg = DatasourceConfig::new("docs", FilesystemDatasource::KIND);
        assert!(FilesystemDatasource::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_scan() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilesystemDatasource::from_config(&config(dir.path())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = source.get_data(&cancel, &serde_json::Value::Null).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
