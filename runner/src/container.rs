//! A [`Substrate`] that runs participants as Docker containers, using [`testcontainers`] for the
//! container lifecycle and the docker CLI for networks and log extraction.

use crate::{
    logs::CopyLogs,
    models::Role,
    substrate::{Error, ServiceInstance, Substrate},
};
use async_trait::async_trait;
use std::{
    path::Path,
    process::{Output, Stdio},
};
use testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::IntoContainerPort,
    runners::AsyncRunner,
};
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

/// Port on which every interop test container serves its API.
pub const INTERNAL_SERVING_PORT: u16 = 8080;

/// Splits an image reference into the name and tag that [`GenericImage`] expects. References
/// without a tag get `latest`. A colon followed by a path segment is a registry port, not a tag.
pub fn parse_image_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (reference, "latest"),
    }
}

/// Run `docker` with the given arguments, failing unless it exits successfully.
async fn docker(args: &[&str]) -> Result<Output, Error> {
    let output = Command::new("docker")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::Command {
            command: format!("docker {}", args.join(" ")),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Pull the latest version of each image.
pub async fn pull_images<'a>(images: impl IntoIterator<Item = &'a str>) -> Result<(), Error> {
    for image in images {
        info!(image, "pulling image");
        docker(&["pull", image]).await?;
    }
    Ok(())
}

/// A user-defined bridge network. The network is removed on drop unless [`Self::remove`] was
/// called.
#[derive(Debug)]
pub struct DockerNetwork {
    name: String,
    removed: bool,
}

impl DockerNetwork {
    pub async fn create(name: &str) -> Result<Self, Error> {
        docker(&["network", "create", "--driver", "bridge", name]).await?;
        debug!(network = name, "created network");
        Ok(Self {
            name: name.to_string(),
            removed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn remove(mut self) -> Result<(), Error> {
        self.try_remove().await
    }

    /// Removes the network. On failure the network is still removed on drop.
    async fn try_remove(&mut self) -> Result<(), Error> {
        docker(&["network", "rm", &self.name]).await?;
        self.removed = true;
        debug!(network = %self.name, "removed network");
        Ok(())
    }
}

impl Drop for DockerNetwork {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::process::Command::new("docker")
                .args(["network", "rm", &self.name])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

/// A participant running in a container.
pub struct ContainerInstance {
    role: Role,
    image: String,
    name: String,
    container: ContainerAsync<GenericImage>,
    host_base_url: Url,
    internal_base_url: Url,
}

impl ContainerInstance {
    pub fn id(&self) -> &str {
        self.container.id()
    }
}

impl ServiceInstance for ContainerInstance {
    fn role(&self) -> Role {
        self.role
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn hostname(&self) -> &str {
        &self.name
    }

    fn host_base_url(&self) -> &Url {
        &self.host_base_url
    }

    fn internal_base_url(&self) -> &Url {
        &self.internal_base_url
    }
}

#[async_trait]
impl CopyLogs for ContainerInstance {
    async fn copy_logs_directory(&self, destination: &Path) -> Result<(), Error> {
        tokio::fs::create_dir_all(destination).await?;
        let source = format!("{}:/logs/.", self.id());
        let destination = destination.to_string_lossy();
        docker(&["cp", &source, &destination]).await?;
        Ok(())
    }

    async fn save_process_logs(&self, destination: &Path) -> Result<(), Error> {
        let file = tokio::fs::File::create(destination).await?.into_std().await;
        let status = Command::new("docker")
            .args(["logs", self.id()])
            .stdin(Stdio::null())
            .stdout(file.try_clone()?)
            .stderr(file)
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Command {
                command: format!("docker logs {}", self.id()),
                status,
                stderr: String::new(),
            });
        }

        if tokio::fs::metadata(destination).await?.len() == 0 {
            tokio::fs::remove_file(destination).await?;
        }
        Ok(())
    }
}

/// Runs participants as containers on the local Docker daemon.
#[derive(Clone, Debug, Default)]
pub struct ContainerSubstrate {}

impl ContainerSubstrate {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Substrate for ContainerSubstrate {
    type Network = DockerNetwork;
    type Instance = ContainerInstance;

    async fn create_network(&self, name: &str) -> Result<DockerNetwork, Error> {
        DockerNetwork::create(name).await
    }

    async fn start_instance(
        &self,
        network: &DockerNetwork,
        role: Role,
        image: &str,
        name: &str,
    ) -> Result<ContainerInstance, Error> {
        let (image_name, tag) = parse_image_reference(image);
        let container = GenericImage::new(image_name, tag)
            .with_exposed_port(INTERNAL_SERVING_PORT.tcp())
            .with_network(network.name())
            .with_container_name(name)
            .start()
            .await?;
        let host_port = container
            .get_host_port_ipv4(INTERNAL_SERVING_PORT.tcp())
            .await?;
        info!(%role, image, container_name = name, id = container.id(), host_port, "started container");

        Ok(ContainerInstance {
            role,
            image: image.to_string(),
            name: name.to_string(),
            container,
            host_base_url: Url::parse(&format!("http://127.0.0.1:{host_port}/"))?,
            internal_base_url: Url::parse(&format!("http://{name}:{INTERNAL_SERVING_PORT}/"))?,
        })
    }

    async fn stop_instance(&self, instance: ContainerInstance) -> Result<(), Error> {
        debug!(role = %instance.role, id = instance.id(), "removing container");
        instance.container.rm().await?;
        Ok(())
    }

    async fn remove_network(&self, network: DockerNetwork) -> Result<(), Error> {
        network.remove().await
    }
}
