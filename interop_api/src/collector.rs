//! The Collector role.

use crate::{
    Error, InteropApiClient,
    models::{
        CollectionHandle, CollectionPollRequest, CollectionPollResponse, CollectionStartRequest,
        CollectionStartResponse, CollectorAddTaskRequest, CollectorAddTaskResponse,
        CollectorHpkeConfig,
    },
    status,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use dap_interop_core::{
    task::{Query, TaskId},
    vdaf::AggregateResult,
};

/// Operations of a DAP collector under test.
#[async_trait]
pub trait CollectorApi: Send + Sync {
    /// Register a task with the collector, returning the HPKE configuration that aggregators
    /// must encrypt aggregate shares to.
    async fn add_task(
        &self,
        request: &CollectorAddTaskRequest,
    ) -> Result<CollectorHpkeConfig, Error>;

    /// Begin collecting the batch selected by `query`.
    async fn collection_start(
        &self,
        task_id: &TaskId,
        aggregation_parameter: &[u8],
        query: &Query,
    ) -> Result<CollectionHandle, Error>;

    /// Check on a collection. Returns `None` while it is still in progress.
    async fn collection_poll(
        &self,
        handle: &CollectionHandle,
    ) -> Result<Option<AggregateResult>, Error>;
}

/// [`CollectorApi`] backed by a container's interop API.
#[derive(Clone, Debug)]
pub struct InteropCollector {
    api: InteropApiClient,
}

impl InteropCollector {
    pub fn new(api: InteropApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &InteropApiClient {
        &self.api
    }
}

#[async_trait]
impl CollectorApi for InteropCollector {
    #[tracing::instrument(skip(self, request), fields(image = %self.api.image(), task_id = %request.task_id), err)]
    async fn add_task(
        &self,
        request: &CollectorAddTaskRequest,
    ) -> Result<CollectorHpkeConfig, Error> {
        let response: CollectorAddTaskResponse = self.api.post("add_task", request).await?;
        Ok(response.collector_hpke_config)
    }

    #[tracing::instrument(skip(self, aggregation_parameter), fields(image = %self.api.image()), err)]
    async fn collection_start(
        &self,
        task_id: &TaskId,
        aggregation_parameter: &[u8],
        query: &Query,
    ) -> Result<CollectionHandle, Error> {
        let response: CollectionStartResponse = self
            .api
            .post(
                "collection_start",
                &CollectionStartRequest {
                    task_id: *task_id,
                    agg_param: URL_SAFE_NO_PAD.encode(aggregation_parameter),
                    query: query.clone(),
                },
            )
            .await?;
        Ok(response.handle)
    }

    #[tracing::instrument(skip(self), fields(image = %self.api.image()), err)]
    async fn collection_poll(
        &self,
        handle: &CollectionHandle,
    ) -> Result<Option<AggregateResult>, Error> {
        let response: CollectionPollResponse = self
            .api
            .post(
                "collection_poll",
                &CollectionPollRequest {
                    handle: handle.clone(),
                },
            )
            .await?;
        if response.status == status::IN_PROGRESS {
            return Ok(None);
        }
        match response.result {
            Some(result) => Ok(Some(result)),
            None => Err(Error::MalformedResponse {
                url: self.api.base_url().clone(),
                message: format!(
                    "collection_poll reported status {:?} without a result",
                    response.status
                ),
            }),
        }
    }
}
