//! Request and response bodies of the interop API endpoints.

use dap_interop_core::{
    task::{AuthenticationToken, Query, QueryType, TaskId, VerifyKey},
    time::{Duration, Time},
    vdaf::{AggregateResult, Measurement, MeasurementScheme},
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use url::Url;

/// The role an aggregator plays in a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorRole {
    Leader,
    Helper,
}

impl Display for AggregatorRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorRole::Leader => f.write_str("leader"),
            AggregatorRole::Helper => f.write_str("helper"),
        }
    }
}

/// The Collector's HPKE configuration, as returned by its `add_task` endpoint. The runner never
/// decodes it; it is passed verbatim to both aggregators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectorHpkeConfig(String);

impl CollectorHpkeConfig {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifies one in-flight collection at the Collector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionHandle(String);

impl CollectionHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of the Client's `upload` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub task_id: TaskId,
    pub leader: Url,
    pub helper: Url,
    pub vdaf: MeasurementScheme,
    pub measurement: Measurement,
    /// Report timestamp. When absent the client uses its current time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Time>,
    pub time_precision: Duration,
}

/// Body of an Aggregator's `endpoint_for_task` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointForTaskRequest {
    pub task_id: TaskId,
    pub role: AggregatorRole,
    pub hostname: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointForTaskResponse {
    /// Path, or URL, relative to the aggregator's base URL.
    pub endpoint: String,
}

/// Body of an Aggregator's `add_task` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorAddTaskRequest {
    pub task_id: TaskId,
    pub leader: Url,
    pub helper: Url,
    pub vdaf: MeasurementScheme,
    pub leader_authentication_token: AuthenticationToken,
    /// Only sent to the leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_authentication_token: Option<AuthenticationToken>,
    pub role: AggregatorRole,
    pub vdaf_verify_key: VerifyKey,
    pub max_batch_query_count: u64,
    pub query_type: QueryType,
    pub min_batch_size: u64,
    /// Only sent for fixed size tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<u64>,
    pub time_precision: Duration,
    pub collector_hpke_config: CollectorHpkeConfig,
    pub task_expiration: Time,
}

/// Body of the Collector's `add_task` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorAddTaskRequest {
    pub task_id: TaskId,
    pub leader: Url,
    pub vdaf: MeasurementScheme,
    pub collector_authentication_token: AuthenticationToken,
    pub query_type: QueryType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorAddTaskResponse {
    pub collector_hpke_config: CollectorHpkeConfig,
}

/// Body of the Collector's `collection_start` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStartRequest {
    pub task_id: TaskId,
    /// Encoded aggregation parameter, in unpadded base64url.
    pub agg_param: String,
    pub query: Query,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStartResponse {
    pub handle: CollectionHandle,
}

/// Body of the Collector's `collection_poll` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPollRequest {
    pub handle: CollectionHandle,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPollResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregateResult>,
}
