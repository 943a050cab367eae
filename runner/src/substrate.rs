//! Abstraction over the machinery that runs participants on an isolated network.

use crate::{logs::CopyLogs, models::Role};
use async_trait::async_trait;
use std::process::ExitStatus;
use url::Url;

/// Errors from creating, running or inspecting networks and service instances.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container error: {0}")]
    Container(#[from] testcontainers::TestcontainersError),
    #[error("`{command}` failed with {status}: {stderr}")]
    Command {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("URL parse: {0}")]
    Url(#[from] url::ParseError),
}

/// A running participant.
pub trait ServiceInstance: CopyLogs + Send + Sync {
    fn role(&self) -> Role;

    fn image(&self) -> &str;

    /// The instance's name on its network.
    fn hostname(&self) -> &str;

    /// Base URL of the instance's interop API, reachable from the test runner.
    fn host_base_url(&self) -> &Url;

    /// Base URL of the instance's interop API, reachable from other instances on the network.
    fn internal_base_url(&self) -> &Url;
}

/// Creates isolated networks and runs service instances attached to them.
#[async_trait]
pub trait Substrate: Send + Sync {
    type Network: Send + Sync;
    type Instance: ServiceInstance;

    async fn create_network(&self, name: &str) -> Result<Self::Network, Error>;

    /// Start `image` on `network` under the name `name`.
    async fn start_instance(
        &self,
        network: &Self::Network,
        role: Role,
        image: &str,
        name: &str,
    ) -> Result<Self::Instance, Error>;

    async fn stop_instance(&self, instance: Self::Instance) -> Result<(), Error>;

    async fn remove_network(&self, network: Self::Network) -> Result<(), Error>;
}
