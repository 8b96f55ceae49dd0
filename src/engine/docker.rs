//! Bollard-backed [`ContainerEngine`] implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::EventMessage;
use bollard::query_parameters::{
    EventsOptions, EventsOptionsBuilder, InspectContainerOptions, InspectContainerOptionsBuilder,
    ListContainersOptions, ListContainersOptionsBuilder, ListImagesOptions,
    ListImagesOptionsBuilder,
};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::{
    ContainerDetails, ContainerEngine, ContainerState, ContainerSummary, EngineError, EngineEvent,
    ImageDetails, ImageSummary,
};

#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the default local transport (Unix socket on Linux).
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(DockerEngine { docker })
    }
}

/// Docker reports names with a leading slash.
fn strip_name(raw: &str) -> String {
    raw.strip_prefix('/').unwrap_or(raw).to_string()
}

fn event_from_message(msg: EventMessage) -> Option<EngineEvent> {
    let action = msg.action?;
    let actor = msg.actor?;
    Some(EngineEvent {
        action,
        container_id: actor.id?,
        attributes: actor.attributes.unwrap_or_default(),
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let options: ListContainersOptions = ListContainersOptionsBuilder::new().all(true).build();
        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| strip_name(n))?;
                Some(ContainerSummary {
                    id,
                    name,
                    image: c.image.unwrap_or_default(),
                    image_id: c.image_id.unwrap_or_default(),
                    state: c
                        .state
                        .map(|s| ContainerState::parse(&s.to_string()))
                        .unwrap_or(ContainerState::Unknown),
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let options: InspectContainerOptions = InspectContainerOptionsBuilder::new().build();

        let info = match self.docker.inspect_container(id, Some(options)).await {
            Ok(info) => info,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Err(EngineError::NotFound(id.to_string())),
            Err(e) => return Err(EngineError::Api(e)),
        };

        let state = info
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| ContainerState::parse(&s.to_string()))
            .unwrap_or(ContainerState::Unknown);

        Ok(ContainerDetails {
            id: info.id.unwrap_or_else(|| id.to_string()),
            name: info.name.as_deref().map(strip_name).unwrap_or_default(),
            image: info
                .config
                .and_then(|c| c.image)
                .or(info.image)
                .unwrap_or_default(),
            state,
        })
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        let options: ListImagesOptions = ListImagesOptionsBuilder::new().build();
        let images = self.docker.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|img| ImageSummary {
                id: img.id,
                repo_tags: img.repo_tags,
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails, EngineError> {
        let info = match self.docker.inspect_image(reference).await {
            Ok(info) => info,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Err(EngineError::NotFound(reference.to_string())),
            Err(e) => return Err(EngineError::Api(e)),
        };

        Ok(ImageDetails {
            id: info.id,
            created: info.created,
        })
    }

    fn subscribe_events(&self) -> BoxStream<'static, Result<EngineEvent, EngineError>> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options: EventsOptions = EventsOptionsBuilder::new().filters(&filters).build();

        self.docker
            .events(Some(options))
            .filter_map(|item| async {
                match item {
                    Ok(msg) => event_from_message(msg).map(Ok),
                    Err(e) => Some(Err(EngineError::Api(e))),
                }
            })
            .boxed()
    }
}
