use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{Artifact, ArtifactSink, UploadError};

/// Subdirectory, and URL path segment, that artifacts are published under.
const PREFIX: &str = "conversions";

/// Publishes artifacts by copying them into a directory served at
/// `base_url`.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    root: PathBuf,
    base_url: String,
    timeout: Duration,
}

impl DirectorySink {
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    async fn publish(
        &self,
        artifact: &Artifact,
    ) -> Result<String, UploadError> {
        let name = artifact
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                UploadError::Unavailable(format!(
                    "artifact path {} has no usable file name",
                    artifact.path.display()
                ))
            })?;

        let dir = self.root.join(PREFIX);
        fs::create_dir_all(&dir).await.map_err(unavailable)?;

        let target = dir.join(name);
        let bytes = fs::copy(&artifact.path, &target)
            .await
            .map_err(unavailable)?;
        debug!(
            path = %target.display(),
            bytes,
            kind = %artifact.kind,
            "published artifact"
        );

        Ok(format!("{}/{PREFIX}/{name}", self.base_url))
    }
}

fn unavailable(error: std::io::Error) -> UploadError {
    UploadError::Unavailable(error.to_string())
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn upload(&self, artifact: &Artifact) -> Result<String, UploadError> {
        tokio::time::timeout(self.timeout, self.publish(artifact))
            .await
            .map_err(|_| UploadError::Timeout)?
    }
}
