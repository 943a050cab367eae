//! Waiting for freshly started participants to serve their interop API.

use crate::{Error, models::Role};
use backon::{BackoffBuilder, ExponentialBuilder};
use dap_interop_api::InteropApiClient;
use dap_interop_core::retries::exponential_backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// How long to wait for a participant to become ready.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Number of readiness probes before giving up.
    pub max_attempts: usize,
    /// Delay after the first failed probe. Doubles after each further failure.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay between probes.
    pub max_delay_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl ReadinessConfig {
    pub fn backoff(&self) -> ExponentialBuilder {
        exponential_backoff(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }
}

/// Probe `api` until it reports ready, or fail with [`Error::ReadinessTimeout`] once the probes
/// allowed by `config` are used up.
pub async fn await_ready(
    api: &InteropApiClient,
    role: Role,
    config: &ReadinessConfig,
) -> Result<(), Error> {
    let mut backoff = config.backoff().build();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match api.ready().await {
            Ok(()) => {
                debug!(%role, image = api.image(), attempts, "instance is ready");
                return Ok(());
            }
            Err(error) => error,
        };

        match backoff.next() {
            Some(delay) => {
                debug!(%role, image = api.image(), %error, ?delay, "instance not ready yet");
                sleep(delay).await;
            }
            None => {
                return Err(Error::ReadinessTimeout {
                    role,
                    image: api.image().to_string(),
                    attempts,
                    last_error: error.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Error,
        models::Role,
        readiness::{ReadinessConfig, await_ready},
    };
    use assert_matches::assert_matches;
    use dap_interop_api::{InteropApiClient, default_http_client};
    use dap_interop_core::test_util::install_test_trace_subscriber;
    use std::time::Duration;

    fn config(max_attempts: usize) -> ReadinessConfig {
        ReadinessConfig {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn api_client(server: &mockito::ServerGuard, image: &str) -> InteropApiClient {
        InteropApiClient::new(
            default_http_client(Duration::from_secs(5)).unwrap(),
            server.url().parse().unwrap(),
            image,
        )
    }

    #[tokio::test]
    async fn ready() {
        install_test_trace_subscriber();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/internal/test/ready")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        await_ready(&api_client(&server, "leader-image"), Role::Leader, &config(10))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn ready_after_failed_probes() {
        install_test_trace_subscriber();
        let mut server = mockito::Server::new_async().await;
        let not_ready = server
            .mock("POST", "/internal/test/ready")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let ready = server
            .mock("POST", "/internal/test/ready")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        await_ready(&api_client(&server, "client-image"), Role::Client, &config(5))
            .await
            .unwrap();
        not_ready.assert_async().await;
        ready.assert_async().await;
    }

    #[tokio::test]
    async fn readiness_timeout() {
        install_test_trace_subscriber();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/internal/test/ready")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let error = await_ready(&api_client(&server, "helper-image"), Role::Helper, &config(4))
            .await
            .unwrap_err();
        assert_matches!(error, Error::ReadinessTimeout { role: Role::Helper, attempts: 4, image, last_error } => {
            assert_eq!(image, "helper-image");
            assert!(last_error.contains("503"), "{last_error}");
        });
        mock.assert_async().await;
    }

    #[test]
    fn default_schedule() {
        use backon::BackoffBuilder;

        let delays: Vec<_> = ReadinessConfig::default().backoff().build().collect();
        assert_eq!(delays.len(), 9);
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[8], Duration::from_secs(10));
    }
}
