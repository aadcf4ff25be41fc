//! Image lookup, pull, listing and removal.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{ContainerEngine, ImageRecord, PrivilegeFn, RegistryCredentials};
use crate::error::{RunnerError, RunnerResult};

/// Status reported for every image the engine has cached.
pub const STATUS_COMPLETE: &str = "complete";

/// Local view of an engine image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    /// First repo tag, or empty for untagged images
    pub slug: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub virtual_size: i64,
    pub status: String,
}

impl From<ImageRecord> for Image {
    fn from(record: ImageRecord) -> Self {
        Self {
            slug: record.repo_tags.first().cloned().unwrap_or_default(),
            id: record.id,
            repo_tags: record.repo_tags,
            size: record.size,
            virtual_size: record.virtual_size,
            status: STATUS_COMPLETE.to_string(),
        }
    }
}

impl Image {
    /// Whether `name` or `name:latest` is one of this image's tags.
    pub fn matches(&self, name: &str) -> bool {
        let latest = format!("{}:latest", name);
        self.repo_tags.iter().any(|tag| *tag == latest || tag == name)
    }
}

/// Privilege source used by pulls: the registry never gets credentials.
pub fn no_privilege() -> PrivilegeFn {
    Arc::new(|| -> RunnerResult<RegistryCredentials> { Err(RunnerError::PrivilegeNotConfigured) })
}

/// Image operations against a container engine.
#[derive(Clone)]
pub struct ImageManager {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Whether an image tagged `name` or `name:latest` is cached.
    ///
    /// A failed lookup counts as absent. Use [`ImageManager::lookup`] to tell
    /// the two apart.
    pub async fn exists(&self, name: &str) -> bool {
        match self.lookup(name).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Image lookup for {} failed, treating as absent: {}", name, e);
                false
            }
        }
    }

    /// Like [`ImageManager::exists`], but reports lookup failures.
    pub async fn lookup(&self, name: &str) -> RunnerResult<bool> {
        let images = self.list().await?;
        Ok(images.iter().any(|image| image.matches(name)))
    }

    /// Pull `reference` and return the resulting image.
    pub async fn pull(&self, reference: &str) -> RunnerResult<Image> {
        self.pull_with(reference, no_privilege()).await
    }

    /// Pull with an explicit credential source.
    pub async fn pull_with(&self, reference: &str, privilege: PrivilegeFn) -> RunnerResult<Image> {
        let mut progress = self.engine.pull_image(reference, privilege).await?;

        let mut messages = 0usize;
        while let Some(message) = progress.next().await {
            match message {
                Ok(message) => {
                    messages += 1;
                    if let Some(status) = message.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    debug!("Pull progress stream ended early: {}", e);
                    break;
                }
            }
        }

        info!("Pull of {} finished after {} progress messages", reference, messages);
        self.inspect(reference).await
    }

    /// All images cached by the engine.
    pub async fn list(&self) -> RunnerResult<Vec<Image>> {
        let records = self.engine.list_images().await?;
        Ok(records.into_iter().map(Image::from).collect())
    }

    pub async fn inspect(&self, id: &str) -> RunnerResult<Image> {
        self.engine.inspect_image(id).await.map(Image::from)
    }

    /// Force-remove an image and prune its untagged parents.
    pub async fn remove(&self, id: &str) -> RunnerResult<()> {
        self.engine.remove_image(id, true, true).await?;
        info!("Removed image {}", id);
        Ok(())
    }
}
