//! Runs test scenarios: one image set against one test case, from starting the participants to
//! checking the collected aggregate.

use crate::{
    Error,
    logs::{CopyLogs, PROCESS_LOG_FILE_NAME},
    models::{ImageSet, Role, TestCase},
    poller::{CollectionPollerConfig, collect},
    provision::provision_task,
    readiness::{ReadinessConfig, await_ready},
    report::ScenarioResult,
    substrate::{ServiceInstance, Substrate},
};
use dap_interop_api::{
    AggregatorApi, ClientApi, CollectorApi, InteropAggregator, InteropApiClient, InteropClient,
    InteropCollector, default_http_client, models::UploadRequest,
};
use dap_interop_core::{
    task::{FixedSizeQuery, Query, QueryType},
    time::Clock,
    vdaf::{aggregate_measurements, generate_measurement},
};
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

/// Configuration of test scenarios.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Logs of the participants of failed scenarios are saved below this directory.
    pub error_log_directory: PathBuf,
    /// Timeout for each request to a participant's interop API.
    pub request_timeout_secs: u64,
    pub readiness: ReadinessConfig,
    pub collection: CollectionPollerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            error_log_directory: PathBuf::from("error_logs"),
            request_timeout_secs: 30,
            readiness: ReadinessConfig::default(),
            collection: CollectionPollerConfig::default(),
        }
    }
}

/// The network and instances of one scenario. Whatever was acquired is given back by
/// [`Self::release`].
pub struct ScenarioResources<'a, S: Substrate> {
    substrate: &'a S,
    network: S::Network,
    instances: Vec<S::Instance>,
}

impl<'a, S: Substrate> ScenarioResources<'a, S> {
    pub async fn new(substrate: &'a S, network_name: &str) -> Result<Self, Error> {
        let network = substrate.create_network(network_name).await?;
        Ok(Self {
            substrate,
            network,
            instances: Vec::new(),
        })
    }

    pub async fn start_instance(
        &mut self,
        role: Role,
        image: &str,
        name: &str,
    ) -> Result<&S::Instance, Error> {
        let instance = self
            .substrate
            .start_instance(&self.network, role, image, name)
            .await?;
        self.instances.push(instance);
        Ok(&self.instances[self.instances.len() - 1])
    }

    /// Instances started so far, in the order they were started.
    pub fn instances(&self) -> &[S::Instance] {
        &self.instances
    }

    /// Stops every instance, most recently started first, then removes the network. Failures
    /// are logged.
    pub async fn release(mut self) {
        while let Some(instance) = self.instances.pop() {
            let role = instance.role();
            if let Err(error) = self.substrate.stop_instance(instance).await {
                warn!(%role, %error, "couldn't stop instance");
            }
        }
        if let Err(error) = self.substrate.remove_network(self.network).await {
            warn!(%error, "couldn't remove network");
        }
    }
}

/// The four participants of a scenario, as seen through their interop APIs.
#[derive(Clone, Copy)]
pub struct Participants<'a> {
    pub client: &'a dyn ClientApi,
    pub leader: &'a dyn AggregatorApi,
    pub helper: &'a dyn AggregatorApi,
    pub collector: &'a dyn CollectorApi,
}

/// Provision a task, upload the test case's measurements, collect them and check the aggregate.
/// All participants must already be ready.
pub async fn run_scenario<C: Clock>(
    clock: &C,
    collection_config: &CollectionPollerConfig,
    participants: Participants<'_>,
    test_case: &TestCase,
) -> Result<(), Error> {
    let task = provision_task(
        participants.leader,
        participants.helper,
        participants.collector,
        test_case,
    )
    .await?;
    let time_precision = task.parameters.time_precision;

    // Reports are timestamped by the client, so the batch interval is fixed before any upload.
    let batch_interval_start = clock.now().to_batch_interval_start(&time_precision)?;

    let mut measurements = Vec::with_capacity(test_case.measurement_count);
    for _ in 0..test_case.measurement_count {
        let measurement = generate_measurement(&test_case.scheme)?;
        participants
            .client
            .upload(&UploadRequest {
                task_id: task.task_id,
                leader: task.leader_endpoint.clone(),
                helper: task.helper_endpoint.clone(),
                vdaf: test_case.scheme.clone(),
                measurement: measurement.clone(),
                time: None,
                time_precision,
            })
            .await?;
        measurements.push(measurement);
    }
    info!(count = measurements.len(), "uploaded measurements");

    let query = match test_case.query_type {
        QueryType::TimeInterval => Query::TimeInterval {
            batch_interval_start,
            batch_interval_duration: time_precision.checked_mul(2)?,
        },
        QueryType::FixedSize => Query::FixedSize(FixedSizeQuery::CurrentBatch),
    };
    let actual = collect(participants.collector, collection_config, &task.task_id, &query).await?;

    let expected = aggregate_measurements(&test_case.scheme, &measurements)?;
    if actual != expected {
        return Err(Error::ResultMismatch { expected, actual });
    }
    Ok(())
}

/// A started instance's interop API, plus how other instances reach it.
struct StartedInstance {
    api: InteropApiClient,
    internal_base_url: Url,
    hostname: String,
}

impl StartedInstance {
    fn aggregator(self) -> InteropAggregator {
        InteropAggregator::new(self.api, self.internal_base_url, self.hostname)
    }
}

/// Runs scenarios on a [`Substrate`].
pub struct Orchestrator<S, C> {
    substrate: S,
    clock: C,
    config: OrchestratorConfig,
    http_client: reqwest::Client,
}

impl<S: Substrate, C: Clock> Orchestrator<S, C> {
    pub fn new(substrate: S, clock: C, config: OrchestratorConfig) -> Result<Self, Error> {
        let http_client = default_http_client(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self {
            substrate,
            clock,
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `test_case` against a fresh deployment of `image_set`.
    ///
    /// Every network and instance is released before returning. If the scenario fails after
    /// instances were started, their logs are saved below the error log directory first.
    pub async fn run_test(&self, image_set: &ImageSet, test_case: &TestCase) -> Result<(), Error> {
        let scenario_id = hex::encode(rand::random::<[u8; 5]>());
        let span = info_span!("run_test", test_case = %test_case.name, %scenario_id);

        async {
            let mut resources =
                ScenarioResources::new(&self.substrate, &format!("dap-interop-{scenario_id}"))
                    .await?;
            let result = self
                .run_in(&mut resources, image_set, test_case, &scenario_id)
                .await;
            if let Err(error) = &result {
                warn!(%error, "test failed");
                self.save_logs(
                    resources.instances(),
                    &format!("{}-{scenario_id}", test_case.name),
                )
                .await;
            }
            resources.release().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run_in(
        &self,
        resources: &mut ScenarioResources<'_, S>,
        image_set: &ImageSet,
        test_case: &TestCase,
        scenario_id: &str,
    ) -> Result<(), Error> {
        let client = InteropClient::new(
            self.start(resources, Role::Client, image_set, scenario_id)
                .await?
                .api,
        );
        let leader = self
            .start(resources, Role::Leader, image_set, scenario_id)
            .await?
            .aggregator();
        let helper = self
            .start(resources, Role::Helper, image_set, scenario_id)
            .await?
            .aggregator();
        let collector = InteropCollector::new(
            self.start(resources, Role::Collector, image_set, scenario_id)
                .await?
                .api,
        );

        let readiness = &self.config.readiness;
        futures::try_join!(
            await_ready(client.api(), Role::Client, readiness),
            await_ready(leader.api(), Role::Leader, readiness),
            await_ready(helper.api(), Role::Helper, readiness),
            await_ready(collector.api(), Role::Collector, readiness),
        )?;
        debug!("all participants are ready");

        run_scenario(
            &self.clock,
            &self.config.collection,
            Participants {
                client: &client,
                leader: &leader,
                helper: &helper,
                collector: &collector,
            },
            test_case,
        )
        .await
    }

    async fn start(
        &self,
        resources: &mut ScenarioResources<'_, S>,
        role: Role,
        image_set: &ImageSet,
        scenario_id: &str,
    ) -> Result<StartedInstance, Error> {
        let instance = resources
            .start_instance(role, image_set.image(role), &format!("dap-{role}-{scenario_id}"))
            .await?;
        Ok(StartedInstance {
            api: InteropApiClient::new(
                self.http_client.clone(),
                instance.host_base_url().clone(),
                instance.image(),
            ),
            internal_base_url: instance.internal_base_url().clone(),
            hostname: instance.hostname().to_string(),
        })
    }

    /// Save each instance's logs to `<error log directory>/<scenario>/<role>/`.
    async fn save_logs(&self, instances: &[S::Instance], scenario: &str) {
        if instances.is_empty() {
            return;
        }
        let scenario_directory = self.config.error_log_directory.join(scenario);
        for instance in instances {
            let role = instance.role();
            let directory = scenario_directory.join(role.as_str());
            if let Err(error) = tokio::fs::create_dir_all(&directory).await {
                warn!(%role, %error, directory = %directory.display(), "couldn't create log directory");
                continue;
            }
            if let Err(error) = instance.copy_logs_directory(&directory).await {
                warn!(%role, %error, "couldn't copy log directory");
            }
            if let Err(error) = instance
                .save_process_logs(&directory.join(PROCESS_LOG_FILE_NAME))
                .await
            {
                warn!(%role, %error, "couldn't save process logs");
            }
        }
        info!(directory = %scenario_directory.display(), "saved logs of failed test");
    }

    /// Run every test case against every image set, at most `jobs` scenarios at a time. Results
    /// are yielded in image set order, then test case order.
    pub fn run_matrix<'a>(
        &'a self,
        image_sets: &'a [ImageSet],
        test_cases: &'a [&'a TestCase],
        jobs: usize,
    ) -> impl Stream<Item = ScenarioResult> + 'a {
        stream::iter(image_sets.iter().flat_map(move |image_set| {
            test_cases
                .iter()
                .map(move |test_case| (image_set, *test_case))
        }))
        .map(move |(image_set, test_case)| async move {
            let result = self.run_test(image_set, test_case).await;
            ScenarioResult::new(image_set.clone(), test_case.name.clone(), result)
        })
        .buffered(jobs.max(1))
    }
}
