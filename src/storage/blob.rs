//! Blob storage for downloaded image bytes

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Builds a filename of the form `<query-slug>_<12 hex>.<ext>`
///
/// The slug keeps alphanumerics, `-`, `_` and `.`; spaces become `_` and
/// everything else is dropped. The hex part hashes the URL with the current
/// time, so the same URL fetched twice never overwrites an earlier file.
pub fn generate_filename(query: &str, url: &str, extension: &str) -> String {
    let slug: String = query
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    let slug = slug.trim_matches('.');
    let slug = if slug.is_empty() { "query" } else { slug };

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}_{}.{}", slug, &digest[..12], extension)
}

/// Writes image files under a root directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a filename will be stored at
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Path of a filename inside a subdirectory of the root
    pub fn path_in(&self, dir: &str, filename: &str) -> PathBuf {
        self.root.join(dir).join(filename)
    }

    /// Writes `bytes` to `path`, creating parent directories on demand
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.create(path).await?;
        writer.write_chunk(bytes).await?;
        writer.finish().await
    }

    /// Opens a streaming writer for `path`
    ///
    /// Bytes land in a `<name>.<uuid>.part` file private to this writer that
    /// only takes the final name on [`BlobWriter::finish`]. An interrupted
    /// download never leaves a truncated image under the real filename, and
    /// writers racing on one path never share a partial file.
    pub async fn create(&self, path: &Path) -> std::io::Result<BlobWriter> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
        let partial = PathBuf::from(partial);

        let file = fs::File::create(&partial).await?;
        Ok(BlobWriter {
            file,
            partial,
            target: path.to_path_buf(),
            written: 0,
        })
    }
}

/// An in-progress blob write
#[derive(Debug)]
pub struct BlobWriter {
    file: fs::File,
    partial: PathBuf,
    target: PathBuf,
    written: u64,
}

impl BlobWriter {
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes to disk and moves the file to its final name
    pub async fn finish(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.partial, &self.target).await
    }

    /// Discards the partial file
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.partial).await {
            tracing::debug!("Could not remove {}: {}", self.partial.display(), e);
        }
    }
}
