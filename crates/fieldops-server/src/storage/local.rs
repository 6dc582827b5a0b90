use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ArtifactError, ArtifactReader, ArtifactStore};

/// Filesystem backed artifact store rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub async fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;
        debug!(root = %root.display(), "Local artifact store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn prepare_parent(path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn not_found_as(key: &str, err: std::io::Error) -> ArtifactError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::NotFound(key.to_string())
    } else {
        ArtifactError::Io(err)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    #[instrument(skip(self, data, _content_type))]
    async fn put_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<u64, ArtifactError> {
        let path = self.resolve(key)?;
        Self::prepare_parent(&path).await?;
        let size = data.len() as u64;
        tokio::fs::write(&path, data).await?;
        Ok(size)
    }

    #[instrument(skip(self, _content_type))]
    async fn put_file(
        &self,
        key: &str,
        source: &Path,
        _content_type: &str,
    ) -> Result<u64, ArtifactError> {
        let path = self.resolve(key)?;
        Self::prepare_parent(&path).await?;
        Ok(tokio::fs::copy(source, &path).await?)
    }

    async fn open(&self, key: &str) -> Result<ArtifactReader, ArtifactError> {
        let path = self.resolve(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_as(key, e))?;
        Ok(Box::pin(file))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), ArtifactError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    async fn download_url(&self, key: &str, _expires_in: Duration) -> Result<String, ArtifactError> {
        let path = self.resolve(key)?;
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_as(key, e))?;
        Ok(format!("file://{}", path.display()))
    }
}
