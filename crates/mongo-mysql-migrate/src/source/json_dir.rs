//! Directory of `mongoexport` files.
//!
//! Each collection lives in `<dir>/<collection>.json`, either as JSON Lines
//! (the `mongoexport` default) or as one JSON array (`--jsonArray`). A missing
//! file is an empty collection.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;

use super::{DocumentStream, RawDocument, SourceStore};
use crate::error::{MigrateError, Result};

/// Document store reading exported collections from a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    /// Open a directory of exports. The directory must exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(MigrateError::Config(format!(
                "source.path {} is not a directory",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }
}

/// Whether the file's first non-whitespace byte opens a JSON array.
async fn is_json_array(path: &Path) -> Result<bool> {
    let mut file = File::open(path).await?;
    let mut buf = [0u8; 512];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        if let Some(b) = buf[..n].iter().find(|b| !b.is_ascii_whitespace()) {
            return Ok(*b == b'[');
        }
    }
}

async fn read_array(path: &Path) -> Result<Vec<RawDocument>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

#[async_trait]
impl SourceStore for JsonDirSource {
    async fn count(&self, collection: &str) -> Result<u64> {
        let path = self.path_for(collection);
        if !path.exists() {
            debug!("{}: no export file, treating as empty", path.display());
            return Ok(0);
        }

        if is_json_array(&path).await? {
            return Ok(read_array(&path).await?.len() as u64);
        }

        let mut lines = BufReader::new(File::open(&path).await?).lines();
        let mut count = 0u64;
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn open_cursor(&self, collection: &str, _batch_size: usize) -> Result<DocumentStream> {
        let path = self.path_for(collection);
        if !path.exists() {
            return Ok(stream::empty().boxed());
        }

        if is_json_array(&path).await? {
            let docs = read_array(&path).await?;
            return Ok(stream::iter(docs.into_iter().map(Ok)).boxed());
        }

        let lines = BufReader::new(File::open(&path).await?).lines();
        let stream = stream::unfold(Some(lines), |state| async move {
            let mut lines = state?;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let item =
                            serde_json::from_str::<RawDocument>(&line).map_err(MigrateError::from);
                        return Some((item, Some(lines)));
                    }
                    Ok(None) => return None,
                    Err(e) => return Some((Err(MigrateError::from(e)), None)),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<()> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(MigrateError::pool(
                format!("{} is not a directory", self.dir.display()),
                "checking json_dir source",
            ))
        }
    }

    fn store_type(&self) -> &str {
        "json_dir"
    }

    async fn close(&self) {}
}
