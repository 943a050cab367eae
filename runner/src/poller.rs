//! Driving a collection to completion.
//!
//! A collection is started at the collector, which hands back a handle that is then polled until
//! the collector reports a result. Participants may not have finished aggregating by the time
//! the collection is requested, so errors reported by the collector itself, as well as a handle
//! that never completes, lead to a fresh collection being started. Transport errors end the
//! collection immediately.

use crate::Error;
use backon::{BackoffBuilder, ConstantBuilder};
use dap_interop_api::{CollectorApi, models::CollectionHandle};
use dap_interop_core::{
    retries::constant_backoff,
    task::{Query, TaskId},
    vdaf::AggregateResult,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry budgets of the collection poller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionPollerConfig {
    /// Number of times a collection is started before giving up.
    pub max_start_attempts: usize,
    /// Delay before starting a collection again.
    pub start_retry_delay_ms: u64,
    /// Number of polls of one collection handle before starting over. At least one poll is
    /// always made.
    pub max_poll_attempts: usize,
    pub poll_interval_ms: u64,
}

impl Default for CollectionPollerConfig {
    fn default() -> Self {
        Self {
            max_start_attempts: 5,
            start_retry_delay_ms: 1000,
            max_poll_attempts: 30,
            poll_interval_ms: 1000,
        }
    }
}

impl CollectionPollerConfig {
    fn start_backoff(&self) -> ConstantBuilder {
        constant_backoff(
            Duration::from_millis(self.start_retry_delay_ms),
            self.max_start_attempts,
        )
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

enum CollectionState {
    Starting,
    Polling {
        handle: CollectionHandle,
        polls: usize,
    },
}

/// Collect the batch of `task_id` selected by `query`, returning the aggregate reported by the
/// collector.
#[tracing::instrument(skip(collector, config), err)]
pub async fn collect<C>(
    collector: &C,
    config: &CollectionPollerConfig,
    task_id: &TaskId,
    query: &Query,
) -> Result<AggregateResult, Error>
where
    C: CollectorApi + ?Sized,
{
    let mut start_backoff = config.start_backoff().build();
    let mut start_attempts = 0;
    let mut state = CollectionState::Starting;

    loop {
        state = match state {
            CollectionState::Starting => {
                start_attempts += 1;
                match collector.collection_start(task_id, &[], query).await {
                    Ok(handle) => {
                        debug!(%handle, start_attempts, "started collection");
                        CollectionState::Polling { handle, polls: 0 }
                    }
                    Err(error) if error.is_application_error() => {
                        warn!(%error, start_attempts, "collector could not start collection");
                        restart(&mut start_backoff, start_attempts).await?
                    }
                    Err(error) => return Err(error.into()),
                }
            }

            CollectionState::Polling { handle, polls } => {
                let polls = polls + 1;
                match collector.collection_poll(&handle).await {
                    Ok(Some(result)) => {
                        info!(%handle, start_attempts, polls, %result, "collection complete");
                        return Ok(result);
                    }
                    Ok(None) if polls < config.max_poll_attempts => {
                        sleep(config.poll_interval()).await;
                        CollectionState::Polling { handle, polls }
                    }
                    Ok(None) => {
                        warn!(%handle, polls, "collection still in progress, starting over");
                        restart(&mut start_backoff, start_attempts).await?
                    }
                    Err(error) if error.is_application_error() => {
                        warn!(%handle, %error, "collector failed to poll collection");
                        restart(&mut start_backoff, start_attempts).await?
                    }
                    Err(error) => return Err(error.into()),
                }
            }
        };
    }
}

async fn restart(
    backoff: &mut impl Iterator<Item = Duration>,
    start_attempts: usize,
) -> Result<CollectionState, Error> {
    match backoff.next() {
        Some(delay) => {
            sleep(delay).await;
            Ok(CollectionState::Starting)
        }
        None => Err(Error::CollectionTimeout { start_attempts }),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Error,
        poller::{CollectionPollerConfig, collect},
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use dap_interop_api::{
        CollectorApi,
        models::{CollectionHandle, CollectorAddTaskRequest, CollectorHpkeConfig},
    };
    use dap_interop_core::{
        task::{FixedSizeQuery, Query, TaskId},
        test_util::install_test_trace_subscriber,
        vdaf::AggregateResult,
    };
    use std::{collections::VecDeque, sync::Mutex};

    type StartResponse = Result<CollectionHandle, dap_interop_api::Error>;
    type PollResponse = Result<Option<AggregateResult>, dap_interop_api::Error>;

    /// Replies to each call with the next scripted response. Once a script runs out, starts fail
    /// with an application error and polls report the collection as in progress.
    #[derive(Default)]
    struct ScriptedCollector {
        starts: Mutex<VecDeque<StartResponse>>,
        polls: Mutex<VecDeque<PollResponse>>,
        start_count: Mutex<usize>,
        polled_handles: Mutex<Vec<CollectionHandle>>,
    }

    impl ScriptedCollector {
        fn new(
            starts: impl IntoIterator<Item = StartResponse>,
            polls: impl IntoIterator<Item = PollResponse>,
        ) -> Self {
            Self {
                starts: Mutex::new(starts.into_iter().collect()),
                polls: Mutex::new(polls.into_iter().collect()),
                ..Default::default()
            }
        }

        fn start_count(&self) -> usize {
            *self.start_count.lock().unwrap()
        }

        fn polled_handles(&self) -> Vec<CollectionHandle> {
            self.polled_handles.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CollectorApi for ScriptedCollector {
        async fn add_task(
            &self,
            _: &CollectorAddTaskRequest,
        ) -> Result<CollectorHpkeConfig, dap_interop_api::Error> {
            unreachable!("the poller never adds tasks")
        }

        async fn collection_start(
            &self,
            _: &TaskId,
            _: &[u8],
            _: &Query,
        ) -> Result<CollectionHandle, dap_interop_api::Error> {
            *self.start_count.lock().unwrap() += 1;
            self.starts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(application_error()))
        }

        async fn collection_poll(
            &self,
            handle: &CollectionHandle,
        ) -> Result<Option<AggregateResult>, dap_interop_api::Error> {
            self.polled_handles.lock().unwrap().push(handle.clone());
            self.polls.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    fn application_error() -> dap_interop_api::Error {
        dap_interop_api::Error::Application {
            url: "http://collector/internal/test/collection_start".parse().unwrap(),
            status: "error".to_string(),
            message: "batch not ready".to_string(),
        }
    }

    fn transport_error() -> dap_interop_api::Error {
        dap_interop_api::Error::MalformedResponse {
            url: "http://collector/internal/test/collection_poll".parse().unwrap(),
            message: "not JSON".to_string(),
        }
    }

    fn handle(value: &str) -> StartResponse {
        Ok(CollectionHandle::new(value))
    }

    async fn run(
        collector: &ScriptedCollector,
        config: &CollectionPollerConfig,
    ) -> Result<AggregateResult, Error> {
        collect(
            collector,
            config,
            &TaskId::from([7; TaskId::LEN]),
            &Query::FixedSize(FixedSizeQuery::CurrentBatch),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_complete() {
        install_test_trace_subscriber();
        let collector = ScriptedCollector::new(
            [handle("first")],
            [Ok(None), Ok(None), Ok(Some(AggregateResult::Number(7)))],
        );

        let result = run(&collector, &CollectionPollerConfig::default()).await.unwrap();
        assert_eq!(result, AggregateResult::Number(7));
        assert_eq!(collector.start_count(), 1);
        assert_eq!(
            collector.polled_handles(),
            vec![CollectionHandle::new("first"); 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_poll_budget() {
        install_test_trace_subscriber();
        let collector = ScriptedCollector::new(
            [handle("first"), handle("second")],
            [
                Ok(None),
                Ok(None),
                Ok(Some(AggregateResult::NumberVec(Vec::from([1, 2])))),
            ],
        );
        let config = CollectionPollerConfig {
            max_poll_attempts: 2,
            ..Default::default()
        };

        let result = run(&collector, &config).await.unwrap();
        assert_eq!(result, AggregateResult::NumberVec(Vec::from([1, 2])));
        assert_eq!(collector.start_count(), 2);
        assert_eq!(
            collector.polled_handles(),
            [
                CollectionHandle::new("first"),
                CollectionHandle::new("first"),
                CollectionHandle::new("second"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_application_errors() {
        install_test_trace_subscriber();
        let collector = ScriptedCollector::new(
            [Err(application_error()), handle("first"), handle("second")],
            [Err(application_error()), Ok(Some(AggregateResult::Number(3)))],
        );

        let result = run(&collector, &CollectionPollerConfig::default()).await.unwrap();
        assert_eq!(result, AggregateResult::Number(3));
        assert_eq!(collector.start_count(), 3);
        assert_eq!(
            collector.polled_handles(),
            [CollectionHandle::new("first"), CollectionHandle::new("second")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        install_test_trace_subscriber();
        let collector = ScriptedCollector::new([], []);
        let config = CollectionPollerConfig {
            max_start_attempts: 3,
            ..Default::default()
        };

        assert_matches!(
            run(&collector, &config).await,
            Err(Error::CollectionTimeout { start_attempts: 3 })
        );
        assert_eq!(collector.start_count(), 3);
        assert!(collector.polled_handles().is_empty());

        // Handles that never complete exhaust the same budget.
        let collector = ScriptedCollector::new([handle("a"), handle("b"), handle("c")], []);
        assert_matches!(
            run(&collector, &config).await,
            Err(Error::CollectionTimeout { start_attempts: 3 })
        );
        assert_eq!(collector.polled_handles().len(), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_fatal() {
        install_test_trace_subscriber();
        let collector = ScriptedCollector::new([handle("first")], [Err(transport_error())]);
        assert_matches!(
            run(&collector, &CollectionPollerConfig::default()).await,
            Err(Error::InteropApi(dap_interop_api::Error::MalformedResponse { .. }))
        );
        assert_eq!(collector.start_count(), 1);

        let collector = ScriptedCollector::new([Err(transport_error())], []);
        assert_matches!(
            run(&collector, &CollectionPollerConfig::default()).await,
            Err(Error::InteropApi(_))
        );
        assert_eq!(collector.start_count(), 1);
        assert!(collector.polled_handles().is_empty());
    }
}
