use std::io;
use std::path::{Path, PathBuf};

/// On-disk model cache keyed by filename
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    /// Open (creating if needed) a cache rooted at `dir`
    pub async fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Cached bytes for `name`; a missing or zero-length entry is a miss
    pub async fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(bytes) if bytes.is_empty() => {
                tracing::warn!("Cached model {} is empty, treating as a miss", name);
                Ok(None)
            }
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write through a temp file so a crash never leaves a truncated entry
    pub async fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let final_path = self.path_for(name);
        let tmp_path = self.path_for(&format!("{name}.partial"));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await
    }
}
