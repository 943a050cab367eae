//! The Client role: uploads one measurement per request.

use crate::{Error, InteropApiClient, models::UploadRequest};
use async_trait::async_trait;
use serde::de::IgnoredAny;

/// Operations of a DAP client under test.
#[async_trait]
pub trait ClientApi: Send + Sync {
    /// Have the client shard and upload one report.
    async fn upload(&self, request: &UploadRequest) -> Result<(), Error>;
}

/// [`ClientApi`] backed by a container's interop API.
#[derive(Clone, Debug)]
pub struct InteropClient {
    api: InteropApiClient,
}

impl InteropClient {
    pub fn new(api: InteropApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &InteropApiClient {
        &self.api
    }
}

#[async_trait]
impl ClientApi for InteropClient {
    #[tracing::instrument(skip(self, request), fields(image = %self.api.image(), task_id = %request.task_id), err)]
    async fn upload(&self, request: &UploadRequest) -> Result<(), Error> {
        self.api.post::<_, IgnoredAny>("upload", request).await?;
        Ok(())
    }
}
