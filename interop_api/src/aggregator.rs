//! The Aggregator role, played by both the Leader and the Helper.

use crate::{
    Error, InteropApiClient,
    models::{
        AggregatorAddTaskRequest, AggregatorRole, EndpointForTaskRequest, EndpointForTaskResponse,
    },
};
use async_trait::async_trait;
use dap_interop_core::{task::TaskId, url_ensure_trailing_slash};
use serde::de::IgnoredAny;
use url::Url;

/// Operations of a DAP aggregator under test.
#[async_trait]
pub trait AggregatorApi: Send + Sync {
    /// Ask the aggregator where it will serve `task_id` when acting as `role`. The returned URL
    /// is reachable from the other containers of the test network.
    async fn endpoint_for_task(&self, task_id: &TaskId, role: AggregatorRole)
    -> Result<Url, Error>;

    /// Register a task with the aggregator.
    async fn add_task(&self, request: &AggregatorAddTaskRequest) -> Result<(), Error>;
}

/// [`AggregatorApi`] backed by a container's interop API.
#[derive(Clone, Debug)]
pub struct InteropAggregator {
    api: InteropApiClient,
    internal_base_url: Url,
    hostname: String,
}

impl InteropAggregator {
    /// `internal_base_url` is the aggregator's address on the test network, against which the
    /// endpoints it reports are resolved; `hostname` is its name on that network.
    pub fn new(api: InteropApiClient, internal_base_url: Url, hostname: impl Into<String>) -> Self {
        Self {
            api,
            internal_base_url: url_ensure_trailing_slash(internal_base_url),
            hostname: hostname.into(),
        }
    }

    pub fn api(&self) -> &InteropApiClient {
        &self.api
    }
}

#[async_trait]
impl AggregatorApi for InteropAggregator {
    #[tracing::instrument(skip(self), fields(image = %self.api.image()), err)]
    async fn endpoint_for_task(
        &self,
        task_id: &TaskId,
        role: AggregatorRole,
    ) -> Result<Url, Error> {
        let response: EndpointForTaskResponse = self
            .api
            .post(
                "endpoint_for_task",
                &EndpointForTaskRequest {
                    task_id: *task_id,
                    role,
                    hostname: self.hostname.clone(),
                },
            )
            .await?;
        Ok(url_ensure_trailing_slash(
            self.internal_base_url.join(&response.endpoint)?,
        ))
    }

    #[tracing::instrument(skip(self, request), fields(image = %self.api.image(), task_id = %request.task_id, role = %request.role), err)]
    async fn add_task(&self, request: &AggregatorAddTaskRequest) -> Result<(), Error> {
        self.api.post::<_, IgnoredAny>("add_task", request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        aggregator::{AggregatorApi, InteropAggregator},
        models::{AggregatorAddTaskRequest, AggregatorRole, CollectorHpkeConfig},
        test_util::api_client,
    };
    use dap_interop_core::{
        task::{AuthenticationToken, QueryType, TaskId, VerifyKey},
        test_util::install_test_trace_subscriber,
        time::{Duration, Time},
        vdaf::MeasurementScheme,
    };
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn endpoint_for_task() {
        install_test_trace_subscriber();
        let mut server = mockito::Server::new_async().await;
        let task_id = TaskId::from([2; TaskId::LEN]);

        for (endpoint, expected) in [
            ("/", "http://dap-leader-01:8080/"),
            ("/dap", "http://dap-leader-01:8080/dap/"),
            ("dap/", "http://dap-leader-01:8080/dap/"),
        ] {
            let mock = server
                .mock("POST", "/internal/test/endpoint_for_task")
                .match_body(Matcher::Json(json!({
                    "task_id": task_id.to_string(),
                    "role": "leader",
                    "hostname": "dap-leader-01",
                })))
                .with_status(200)
                .with_body(json!({"status": "success", "endpoint": endpoint}).to_string())
                .expect(1)
                .create_async()
                .await;

            let aggregator = InteropAggregator::new(
                api_client(&server, "leader"),
                "http://dap-leader-01:8080".parse().unwrap(),
                "dap-leader-01",
            );
            let url = aggregator
                .endpoint_for_task(&task_id, AggregatorRole::Leader)
                .await
                .unwrap();
            assert_eq!(url.as_str(), expected);

            mock.assert_async().await;
            mock.remove_async().await;
        }
    }

    #[tokio::test]
    async fn add_task() {
        install_test_trace_subscriber();
        let mut server = mockito::Server::new_async().await;
        let request = AggregatorAddTaskRequest {
            task_id: TaskId::from([3; TaskId::LEN]),
            leader: "http://dap-leader-01:8080/".parse().unwrap(),
            helper: "http://dap-helper-01:8080/".parse().unwrap(),
            vdaf: MeasurementScheme::Count,
            leader_authentication_token: AuthenticationToken::generate("leader"),
            collector_authentication_token: Some(AuthenticationToken::generate("collector")),
            role: AggregatorRole::Leader,
            vdaf_verify_key: VerifyKey::generate(),
            max_batch_query_count: 1,
            query_type: QueryType::FixedSize,
            min_batch_size: 10,
            max_batch_size: Some(10),
            time_precision: Duration::from_hours(1),
            collector_hpke_config: CollectorHpkeConfig::new("hpke"),
            task_expiration: Time::DISTANT_FUTURE,
        };
        let mock = server
            .mock("POST", "/internal/test/add_task")
            .match_body(Matcher::PartialJson(json!({
                "role": "leader",
                "query_type": 2,
                "max_batch_size": 10,
                "collector_authentication_token":
                    request.collector_authentication_token.as_ref().unwrap().as_str(),
            })))
            .with_status(200)
            .with_body(r#"{"status": "success"}"#)
            .expect(1)
            .create_async()
            .await;

        InteropAggregator::new(
            api_client(&server, "leader"),
            "http://dap-leader-01:8080/".parse().unwrap(),
            "dap-leader-01",
        )
        .add_task(&request)
        .await
        .unwrap();
        mock.assert_async().await;
    }
}
