//! JSON-file persistence backend
//!
//! Layout: `<data_dir>/<image_id>.json`, one document per image. Writes go to
//! `<image_id>.json.tmp`, are synced, then renamed over the live file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::backend::MaskBackend;
use super::record::{ImageRecord, is_valid_image_id};
use crate::error::{CoreError, CoreResult};

const RECORD_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".json.tmp";

pub struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    /// Open a backend rooted at `data_dir`, creating the directory if needed
    pub fn new(data_dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let data_dir = data_dir.into();

        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)?;
            info!("Created data directory: {:?}", data_dir);
        } else if !data_dir.is_dir() {
            return Err(CoreError::Storage(format!(
                "data path {:?} exists but is not a directory",
                data_dir
            )));
        }

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn record_path(&self, image_id: &str) -> CoreResult<PathBuf> {
        if !is_valid_image_id(image_id) {
            return Err(CoreError::validation(
                "image_id",
                format!("'{}' is not a valid image id", image_id),
            ));
        }
        Ok(self
            .data_dir
            .join(format!("{}.{}", image_id, RECORD_EXTENSION)))
    }

    fn temp_path(&self, image_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", image_id, TEMP_SUFFIX))
    }
}

#[async_trait]
impl MaskBackend for FileBackend {
    async fn load_all(&self) -> CoreResult<Vec<ImageRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            // Interrupted writes leave temp files behind; the live file is intact
            if name.ends_with(TEMP_SUFFIX) {
                debug!("Removing stale temp file {:?}", path);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove stale temp file {:?}: {}", path, e);
                }
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to read record {:?}: {}", path, e);
                    continue;
                }
            };
            match serde_json::from_slice::<ImageRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unparseable record {:?}: {}", path, e),
            }
        }

        info!(
            "Loaded {} image records from {:?}",
            records.len(),
            self.data_dir
        );
        Ok(records)
    }

    async fn save(&self, record: &ImageRecord) -> CoreResult<()> {
        let path = self.record_path(&record.id)?;
        let tmp = self.temp_path(&record.id);

        let json = serde_json::to_vec(record)
            .map_err(|e| CoreError::Storage(format!("failed to serialize record: {}", e)))?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        debug!("Persisted record {} ({} bytes)", record.id, json.len());
        Ok(())
    }

    async fn remove(&self, image_id: &str) -> CoreResult<()> {
        let path = self.record_path(image_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
