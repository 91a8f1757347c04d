use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::{RecollectError, Result};
use crate::models::UserWeights;

/// One JSON snapshot per user under a directory. Files are named from a hash
/// of the user id and replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct WeightStore {
    dir: PathBuf,
}

impl WeightStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(user_id.as_bytes()));
        self.dir.join(format!("{}.json", &digest[..32]))
    }

    /// Write the full record to a temp file, then rename it over the old one.
    pub async fn save(&self, weights: &UserWeights) -> Result<()> {
        let persistence = |action: &str, e: std::io::Error| {
            RecollectError::Persistence(format!(
                "{action} weights for '{}': {e}",
                weights.user_id
            ))
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence("Failed to create directory for", e))?;

        let path = self.path_for(&weights.user_id);
        let temp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(weights)?;

        fs::write(&temp_path, body)
            .await
            .map_err(|e| persistence("Failed to write", e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| persistence("Failed to replace", e))?;

        tracing::debug!(user_id = %weights.user_id, path = %path.display(), "Persisted learned weights");
        Ok(())
    }

    /// Read every `*.json` record in the directory. A missing directory is a
    /// fresh start; unreadable or malformed files are skipped with a warning.
    pub async fn load_all(&self) -> HashMap<String, UserWeights> {
        let mut loaded = HashMap::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(dir = %self.dir.display(), "No learned weights yet, starting fresh");
                return loaded;
            }
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Cannot read weights directory, starting with empty weights");
                return loaded;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped scanning weights directory");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match read_record(&path).await {
                Ok(weights) => {
                    loaded.insert(weights.user_id.clone(), weights);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed weights file");
                }
            }
        }

        tracing::info!(users = loaded.len(), "Loaded learned weights");
        loaded
    }
}

async fn read_record(path: &Path) -> Result<UserWeights> {
    let body = fs::read(path).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_then_load_all() {
        let dir = TempDir::new().unwrap();
        let store = WeightStore::new(dir.path());

        let mut weights = UserWeights::new("alice");
        weights.adjust_weight("category_medical", 2.0);
        weights.feedback_count = 1;
        store.save(&weights).await.unwrap();

        let loaded = store.load_all().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["alice"].weight("category_medical"), 2.0);
        assert_eq!(loaded["alice"].feedback_count, 1);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = WeightStore::new(dir.path());
        store.save(&UserWeights::new("bob")).await.unwrap();
        store.save(&UserWeights::new("bob")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_fresh_start() {
        let dir = TempDir::new().unwrap();
        let store = WeightStore::new(dir.path().join("nope"));
        assert!(store.load_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = WeightStore::new(dir.path());
        store.save(&UserWeights::new("carol")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let loaded = store.load_all().await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("carol"));
    }

    #[test]
    fn test_path_is_hashed() {
        let store = WeightStore::new("/tmp/w");
        let path = store.path_for("../../etc/passwd");
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/w"));
        assert_ne!(store.path_for("a"), store.path_for("b"));
    }
}
