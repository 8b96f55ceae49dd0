//! Container engine abstraction.
//!
//! Every component talks to the engine through [`ContainerEngine`] so that
//! the reconciliation logic can be exercised against a fake in tests. The
//! production implementation lives in [`docker`] and is backed by bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod docker;

pub use docker::DockerEngine;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container or image not found: {0}")]
    NotFound(String),
    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle state of a container as mirrored in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Restarting,
    Unknown,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Restarting => "restarting",
            ContainerState::Unknown => "unknown",
        }
    }

    /// Engine state strings outside the mirrored set map to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "exited" | "dead" => ContainerState::Exited,
            "restarting" => ContainerState::Restarting,
            _ => ContainerState::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `listContainers` as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageDetails {
    pub id: Option<String>,
    /// Creation timestamp as reported by the engine, RFC 3339.
    pub created: Option<String>,
}

/// A single container-scoped engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub action: String,
    pub container_id: String,
    pub attributes: HashMap<String, String>,
}

impl EngineEvent {
    pub fn exit_code(&self) -> Option<i64> {
        self.attributes.get("exitCode").and_then(|v| v.parse().ok())
    }

    pub fn health_status(&self) -> Option<&str> {
        self.attributes.get("health_status").map(|s| s.as_str())
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError>;

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, EngineError>;

    /// Open a container-scoped event subscription. The stream ends (or
    /// yields an error) when the underlying connection drops; callers decide
    /// whether to resubscribe.
    fn subscribe_events(&self) -> BoxStream<'static, Result<EngineEvent, EngineError>>;
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use futures_util::StreamExt;

    use super::*;

    /// In-memory engine used by component tests.
    #[derive(Default)]
    pub struct FakeEngine {
        pub containers: Mutex<Vec<ContainerSummary>>,
        pub images: Mutex<Vec<ImageSummary>>,
        pub image_details: Mutex<HashMap<String, ImageDetails>>,
    }

    impl FakeEngine {
        pub fn with_containers(containers: Vec<ContainerSummary>) -> Self {
            FakeEngine {
                containers: Mutex::new(containers),
                ..Default::default()
            }
        }

        pub fn set_containers(&self, containers: Vec<ContainerSummary>) {
            *self.containers.lock().unwrap() = containers;
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
            Ok(self.containers.lock().unwrap().clone())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
            self.containers
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == id)
                .map(|c| ContainerDetails {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    image: c.image.clone(),
                    state: c.state,
                })
                .ok_or_else(|| EngineError::NotFound(id.to_string()))
        }

        async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
            Ok(self.images.lock().unwrap().clone())
        }

        async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, EngineError> {
            self.image_details
                .lock()
                .unwrap()
                .get(reference)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(reference.to_string()))
        }

        fn subscribe_events(&self) -> BoxStream<'static, Result<EngineEvent, EngineError>> {
            futures_util::stream::empty().boxed()
        }
    }

    pub fn summary(id: &str, name: &str, image: &str, state: ContainerState) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            image_id: format!("sha256:{id}"),
            state,
        }
    }
}
