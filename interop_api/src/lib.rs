//! Clients for the test-control API of draft-dcook-ppm-dap-interop-test-design.
//!
//! Each container under test serves JSON endpoints below `/internal/test/`. [`InteropApiClient`]
//! implements the request/response conventions shared by all of them, and the role-specific
//! clients in [`client`], [`aggregator`] and [`collector`] build on it.

use dap_interop_core::{initialize_rustls, url_ensure_trailing_slash};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub mod aggregator;
pub mod client;
pub mod collector;
pub mod models;

pub use aggregator::{AggregatorApi, InteropAggregator};
pub use client::{ClientApi, InteropClient};
pub use collector::{CollectorApi, InteropCollector};

/// Values of the `status` field of interop API responses.
pub mod status {
    pub static SUCCESS: &str = "success";
    pub static COMPLETE: &str = "complete";
    pub static IN_PROGRESS: &str = "in progress";
}

/// Path prefix of every test-control endpoint.
const INTERNAL_TEST_PATH: &str = "internal/test/";

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors from interop API requests.
///
/// [`Error::Application`] means the service understood the request and reported a failure in its
/// response body; callers may retry those. Every other variant is a transport-level failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("URL parse: {0}")]
    Url(#[from] url::ParseError),
    #[error("{url} responded with HTTP status {status}: {body}")]
    HttpStatus {
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("malformed response from {url}: {message}")]
    MalformedResponse { url: Url, message: String },
    #[error("{url} reported status {status:?}: {message}")]
    Application {
        url: Url,
        status: String,
        message: String,
    },
}

impl Error {
    /// Returns true if the service itself reported this error, as opposed to the request failing
    /// in transit or the response being unintelligible.
    pub fn is_application_error(&self) -> bool {
        matches!(self, Error::Application { .. })
    }
}

/// Construct an HTTP client suitable for talking to interop test containers.
pub fn default_http_client(request_timeout: Duration) -> Result<reqwest::Client, Error> {
    initialize_rustls();
    Ok(reqwest::Client::builder()
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()?)
}

/// Sends requests to the test-control API of one container.
#[derive(Clone, Debug)]
pub struct InteropApiClient {
    http_client: reqwest::Client,
    base_url: Url,
    image: String,
}

impl InteropApiClient {
    /// `base_url` must be reachable from the test runner; `image` is used in diagnostics only.
    pub fn new(http_client: reqwest::Client, base_url: Url, image: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: url_ensure_trailing_slash(base_url),
            image: image.into(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(INTERNAL_TEST_PATH)?.join(path)?)
    }

    /// Probe the service's readiness endpoint once. Only HTTP 200 counts as ready.
    pub async fn ready(&self) -> Result<(), Error> {
        let url = self.endpoint("ready")?;
        let response = self
            .http_client
            .post(url.clone())
            .json(&Map::new())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(Error::HttpStatus {
                url,
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// POST `body` to the endpoint at `path`, check the `status` of the response and decode the
    /// rest of the response body as `R`.
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(image = %self.image, %url, "sending interop API request");

        let response = self.http_client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url,
                status,
                body: text,
            });
        }

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(body)) => body,
            Ok(_) => {
                return Err(Error::MalformedResponse {
                    url,
                    message: "response body is not a JSON object".to_string(),
                });
            }
            Err(error) => {
                return Err(Error::MalformedResponse {
                    url,
                    message: format!("{error} (content type {content_type:?})"),
                });
            }
        };
        check_status(&url, &body)?;

        serde_json::from_value(Value::Object(body)).map_err(|error| Error::MalformedResponse {
            url,
            message: error.to_string(),
        })
    }
}

fn check_status(url: &Url, body: &Map<String, Value>) -> Result<(), Error> {
    let status = match body.get("status") {
        Some(Value::String(status)) => status,
        Some(_) => {
            return Err(Error::MalformedResponse {
                url: url.clone(),
                message: "\"status\" is not a string".to_string(),
            });
        }
        None => {
            return Err(Error::MalformedResponse {
                url: url.clone(),
                message: "response is missing \"status\"".to_string(),
            });
        }
    };

    if [status::SUCCESS, status::COMPLETE, status::IN_PROGRESS].contains(&status.as_str()) {
        return Ok(());
    }
    let message = match body.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => "no error message".to_string(),
    };
    Err(Error::Application {
        url: url.clone(),
        status: status.clone(),
        message,
    })
}
