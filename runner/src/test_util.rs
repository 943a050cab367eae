//! In-memory stand-ins for a deployment under test.

use crate::{
    logs::CopyLogs,
    models::Role,
    substrate::{self, ServiceInstance, Substrate},
};
use async_trait::async_trait;
use dap_interop_api::{
    AggregatorApi, ClientApi, CollectorApi, Error,
    models::{
        AggregatorAddTaskRequest, AggregatorRole, CollectionHandle, CollectorAddTaskRequest,
        CollectorHpkeConfig, UploadRequest,
    },
};
use dap_interop_core::{
    task::{Query, TaskId},
    vdaf::{AggregateResult, aggregate_measurements},
};
use reqwest::StatusCode;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
};
use url::Url;

/// A call made against a [`FakeDeployment`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    EndpointForTask(AggregatorRole),
    CollectorAddTask,
    AggregatorAddTask(AggregatorRole),
    Upload,
    CollectionStart,
    CollectionPoll,
}

#[derive(Default)]
struct DeploymentState {
    events: Vec<Event>,
    aggregator_tasks: HashMap<AggregatorRole, AggregatorAddTaskRequest>,
    collector_task: Option<CollectorAddTaskRequest>,
    uploads: Vec<UploadRequest>,
    failing_add_task: HashSet<AggregatorRole>,
    in_progress_polls: usize,
    wrong_result: bool,
    collections: Vec<(TaskId, Query)>,
}

/// A client, two aggregators and a collector that share state in memory.
///
/// Uploads are only accepted once both aggregators know the task, and the collector reports the
/// aggregate of everything uploaded so far.
#[derive(Clone, Default)]
pub struct FakeDeployment {
    state: Arc<Mutex<DeploymentState>>,
}

impl FakeDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> FakeClient {
        FakeClient {
            state: Arc::clone(&self.state),
        }
    }

    pub fn leader(&self) -> FakeAggregator {
        FakeAggregator {
            role: AggregatorRole::Leader,
            state: Arc::clone(&self.state),
        }
    }

    pub fn helper(&self) -> FakeAggregator {
        FakeAggregator {
            role: AggregatorRole::Helper,
            state: Arc::clone(&self.state),
        }
    }

    pub fn collector(&self) -> FakeCollector {
        FakeCollector {
            state: Arc::clone(&self.state),
        }
    }

    /// Every call made so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn aggregator_task(&self, role: AggregatorRole) -> Option<AggregatorAddTaskRequest> {
        self.state.lock().unwrap().aggregator_tasks.get(&role).cloned()
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn collections(&self) -> Vec<(TaskId, Query)> {
        self.state.lock().unwrap().collections.clone()
    }

    /// Make the aggregator playing `role` fail to add tasks with an HTTP error.
    pub fn fail_add_task(&self, role: AggregatorRole) {
        self.state.lock().unwrap().failing_add_task.insert(role);
    }

    /// Report the next `polls` collection polls as still in progress.
    pub fn set_in_progress_polls(&self, polls: usize) {
        self.state.lock().unwrap().in_progress_polls = polls;
    }

    /// Have the collector report an aggregate that differs from the correct one.
    pub fn report_wrong_result(&self) {
        self.state.lock().unwrap().wrong_result = true;
    }
}

fn fake_url(host: &str) -> Url {
    Url::parse(&format!("http://{host}.fake/")).unwrap()
}

fn application_error(host: &str, message: impl Into<String>) -> Error {
    Error::Application {
        url: fake_url(host),
        status: "error".to_string(),
        message: message.into(),
    }
}

pub struct FakeClient {
    state: Arc<Mutex<DeploymentState>>,
}

#[async_trait]
impl ClientApi for FakeClient {
    async fn upload(&self, request: &UploadRequest) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Upload);
        let known = [AggregatorRole::Leader, AggregatorRole::Helper]
            .iter()
            .all(|role| {
                state
                    .aggregator_tasks
                    .get(role)
                    .is_some_and(|task| task.task_id == request.task_id)
            });
        if !known {
            return Err(application_error("client", "unknown task"));
        }
        state.uploads.push(request.clone());
        Ok(())
    }
}

pub struct FakeAggregator {
    role: AggregatorRole,
    state: Arc<Mutex<DeploymentState>>,
}

#[async_trait]
impl AggregatorApi for FakeAggregator {
    async fn endpoint_for_task(
        &self,
        _task_id: &TaskId,
        role: AggregatorRole,
    ) -> Result<Url, Error> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(Event::EndpointForTask(role));
        Ok(fake_url(&format!("dap-{}", self.role)).join("dap/")?)
    }

    async fn add_task(&self, request: &AggregatorAddTaskRequest) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::AggregatorAddTask(request.role));
        if state.failing_add_task.contains(&self.role) {
            return Err(Error::HttpStatus {
                url: fake_url(&format!("dap-{}", self.role)),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "database unavailable".to_string(),
            });
        }
        state.aggregator_tasks.insert(self.role, request.clone());
        Ok(())
    }
}

pub struct FakeCollector {
    state: Arc<Mutex<DeploymentState>>,
}

#[async_trait]
impl CollectorApi for FakeCollector {
    async fn add_task(
        &self,
        request: &CollectorAddTaskRequest,
    ) -> Result<CollectorHpkeConfig, Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::CollectorAddTask);
        state.collector_task = Some(request.clone());
        Ok(CollectorHpkeConfig::new("ACAAAQABACA"))
    }

    async fn collection_start(
        &self,
        task_id: &TaskId,
        _aggregation_parameter: &[u8],
        query: &Query,
    ) -> Result<CollectionHandle, Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::CollectionStart);
        state.collections.push((*task_id, query.clone()));
        Ok(CollectionHandle::new(format!(
            "handle-{}",
            state.collections.len()
        )))
    }

    async fn collection_poll(
        &self,
        _handle: &CollectionHandle,
    ) -> Result<Option<AggregateResult>, Error> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::CollectionPoll);
        if state.in_progress_polls > 0 {
            state.in_progress_polls -= 1;
            return Ok(None);
        }

        let Some(task) = &state.collector_task else {
            return Err(application_error("collector", "unknown task"));
        };
        let measurements: Vec<_> = state
            .uploads
            .iter()
            .map(|upload| upload.measurement.clone())
            .collect();
        let result = aggregate_measurements(&task.vdaf, &measurements)
            .map_err(|error| application_error("collector", error.to_string()))?;

        Ok(Some(if state.wrong_result {
            match result {
                AggregateResult::Number(value) => AggregateResult::Number(value + 1),
                AggregateResult::NumberVec(mut values) => {
                    values.push(1);
                    AggregateResult::NumberVec(values)
                }
            }
        } else {
            result
        }))
    }
}

/// A lifecycle operation performed by a [`MockSubstrate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubstrateEvent {
    CreateNetwork(String),
    StartInstance { role: Role, name: String },
    StopInstance(Role),
    RemoveNetwork(String),
}

/// A [`Substrate`] whose instances are services already listening at fixed URLs, such as mock
/// HTTP servers.
#[derive(Clone, Default)]
pub struct MockSubstrate {
    base_urls: HashMap<Role, Url>,
    events: Arc<Mutex<Vec<SubstrateEvent>>>,
}

impl MockSubstrate {
    pub fn new(base_urls: impl IntoIterator<Item = (Role, Url)>) -> Self {
        Self {
            base_urls: base_urls.into_iter().collect(),
            events: Arc::default(),
        }
    }

    pub fn events(&self) -> Vec<SubstrateEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: SubstrateEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Debug)]
pub struct MockNetwork {
    name: String,
}

/// Writes canned logs when asked to copy them.
#[derive(Debug)]
pub struct MockInstance {
    role: Role,
    image: String,
    name: String,
    base_url: Url,
}

impl ServiceInstance for MockInstance {
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
        &self.base_url
    }

    fn internal_base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl CopyLogs for MockInstance {
    async fn copy_logs_directory(&self, destination: &Path) -> Result<(), substrate::Error> {
        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::write(
            destination.join(format!("{}.log", self.role)),
            format!("{} log\n", self.image),
        )
        .await?;
        Ok(())
    }

    async fn save_process_logs(&self, destination: &Path) -> Result<(), substrate::Error> {
        tokio::fs::write(destination, format!("{} started\n", self.name)).await?;
        Ok(())
    }
}

#[async_trait]
impl Substrate for MockSubstrate {
    type Network = MockNetwork;
    type Instance = MockInstance;

    async fn create_network(&self, name: &str) -> Result<MockNetwork, substrate::Error> {
        self.record(SubstrateEvent::CreateNetwork(name.to_string()));
        Ok(MockNetwork {
            name: name.to_string(),
        })
    }

    async fn start_instance(
        &self,
        _network: &MockNetwork,
        role: Role,
        image: &str,
        name: &str,
    ) -> Result<MockInstance, substrate::Error> {
        self.record(SubstrateEvent::StartInstance {
            role,
            name: name.to_string(),
        });
        let base_url = self
            .base_urls
            .get(&role)
            .cloned()
            .ok_or_else(|| std::io::Error::other(format!("no service for {role}")))?;
        Ok(MockInstance {
            role,
            image: image.to_string(),
            name: name.to_string(),
            base_url,
        })
    }

    async fn stop_instance(&self, instance: MockInstance) -> Result<(), substrate::Error> {
        self.record(SubstrateEvent::StopInstance(instance.role));
        Ok(())
    }

    async fn remove_network(&self, network: MockNetwork) -> Result<(), substrate::Error> {
        self.record(SubstrateEvent::RemoveNetwork(network.name));
        Ok(())
    }
}
