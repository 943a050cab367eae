//! Creating a task on all three server-side participants.

use crate::{Error, models::TestCase};
use dap_interop_api::{
    AggregatorApi, CollectorApi,
    models::{AggregatorAddTaskRequest, AggregatorRole, CollectorAddTaskRequest, CollectorHpkeConfig},
};
use dap_interop_core::{
    task::{AuthenticationToken, QueryType, TaskId, VerifyKey},
    time::{Duration, Time},
    vdaf::{MeasurementScheme, generate_verify_key},
};
use tracing::info;
use url::Url;

/// Time precision of every provisioned task.
pub const TIME_PRECISION: Duration = Duration::from_hours(1);

/// Parameters shared by the leader's and helper's view of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskParameters {
    pub scheme: MeasurementScheme,
    pub query_type: QueryType,
    pub max_batch_query_count: u64,
    pub min_batch_size: u64,
    /// Only set for fixed size tasks.
    pub max_batch_size: Option<u64>,
    pub time_precision: Duration,
    pub task_expiration: Time,
}

impl TaskParameters {
    pub fn for_test_case(test_case: &TestCase) -> Self {
        let batch_size = u64::try_from(test_case.measurement_count)
            .unwrap_or(u64::MAX)
            .max(1);
        Self {
            scheme: test_case.scheme.clone(),
            query_type: test_case.query_type,
            max_batch_query_count: 1,
            min_batch_size: batch_size,
            max_batch_size: match test_case.query_type {
                QueryType::TimeInterval => None,
                QueryType::FixedSize => Some(batch_size),
            },
            time_precision: TIME_PRECISION,
            task_expiration: Time::DISTANT_FUTURE,
        }
    }
}

/// A task known to the leader, helper and collector.
#[derive(Clone, Debug)]
pub struct ProvisionedTask {
    pub task_id: TaskId,
    /// Leader endpoint for the task, as reachable from the other participants.
    pub leader_endpoint: Url,
    /// Helper endpoint for the task, as reachable from the other participants.
    pub helper_endpoint: Url,
    pub parameters: TaskParameters,
    pub leader_authentication_token: AuthenticationToken,
    pub collector_authentication_token: AuthenticationToken,
    pub verify_key: VerifyKey,
    pub collector_hpke_config: CollectorHpkeConfig,
}

/// Provision a fresh task for `test_case`.
///
/// The aggregators' task endpoints are resolved first, then the collector is given the task so
/// that its HPKE configuration can be handed to the aggregators, and finally the leader and helper
/// are given the task concurrently. Any failure aborts provisioning.
#[tracing::instrument(skip_all, fields(test_case = %test_case.name), err)]
pub async fn provision_task<L, H, C>(
    leader: &L,
    helper: &H,
    collector: &C,
    test_case: &TestCase,
) -> Result<ProvisionedTask, Error>
where
    L: AggregatorApi + ?Sized,
    H: AggregatorApi + ?Sized,
    C: CollectorApi + ?Sized,
{
    let parameters = TaskParameters::for_test_case(test_case);
    let verify_key = generate_verify_key(&parameters.scheme)?;
    let task_id: TaskId = rand::random();
    let leader_authentication_token = AuthenticationToken::generate("leader");
    let collector_authentication_token = AuthenticationToken::generate("collector");

    let (leader_endpoint, helper_endpoint) = futures::try_join!(
        leader.endpoint_for_task(&task_id, AggregatorRole::Leader),
        helper.endpoint_for_task(&task_id, AggregatorRole::Helper),
    )?;

    let collector_hpke_config = collector
        .add_task(&CollectorAddTaskRequest {
            task_id,
            leader: leader_endpoint.clone(),
            vdaf: parameters.scheme.clone(),
            collector_authentication_token: collector_authentication_token.clone(),
            query_type: parameters.query_type,
        })
        .await?;

    let aggregator_request = |role: AggregatorRole,
                              collector_authentication_token: Option<AuthenticationToken>| {
        AggregatorAddTaskRequest {
            task_id,
            leader: leader_endpoint.clone(),
            helper: helper_endpoint.clone(),
            vdaf: parameters.scheme.clone(),
            leader_authentication_token: leader_authentication_token.clone(),
            collector_authentication_token,
            role,
            vdaf_verify_key: verify_key.clone(),
            max_batch_query_count: parameters.max_batch_query_count,
            query_type: parameters.query_type,
            min_batch_size: parameters.min_batch_size,
            max_batch_size: parameters.max_batch_size,
            time_precision: parameters.time_precision,
            collector_hpke_config: collector_hpke_config.clone(),
            task_expiration: parameters.task_expiration,
        }
    };
    let leader_request = aggregator_request(
        AggregatorRole::Leader,
        Some(collector_authentication_token.clone()),
    );
    let helper_request = aggregator_request(AggregatorRole::Helper, None);
    futures::try_join!(
        leader.add_task(&leader_request),
        helper.add_task(&helper_request),
    )?;

    info!(%task_id, %leader_endpoint, %helper_endpoint, "provisioned task");
    Ok(ProvisionedTask {
        task_id,
        leader_endpoint,
        helper_endpoint,
        parameters,
        leader_authentication_token,
        collector_authentication_token,
        verify_key,
        collector_hpke_config,
    })
}
