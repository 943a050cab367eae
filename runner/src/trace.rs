//! Configures a tracing subscriber for the test runner.

use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::LevelFilter, layer::SubscriberExt};

/// Errors from initializing trace subscriber.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tracing error: {0}")]
    SetGlobalTracingSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("logging error: {0}")]
    SetGlobalLogger(#[from] tracing_log::log_tracer::SetLoggerError),
}

/// Configuration for the tracing subscriber.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfiguration {
    /// If true, uses a [`tracing_subscriber::fmt::TestWriter`] to capture trace events when
    /// running tests.
    #[serde(default)]
    pub use_test_writer: bool,
    /// If true OR if stderr is not a tty, trace events are output in JSON format by
    /// [`tracing_subscriber::fmt::format::Json`]. Otherwise, trace events are output in pretty
    /// format by [`tracing_subscriber::fmt::format::Pretty`].
    #[serde(default)]
    pub force_json_output: bool,
}

/// Create a base tracing layer with configuration used in all subscribers
fn base_layer<S>() -> tracing_subscriber::fmt::Layer<S> {
    tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_level(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
}

/// Configures and installs a tracing subscriber, to capture events logged with
/// [`tracing::info`] and the like. Events are written to stderr, leaving stdout for test results.
///
/// `RUST_LOG` takes precedence over `default_level` when it is set.
pub fn install_trace_subscriber(
    config: &TraceConfiguration,
    default_level: LevelFilter,
) -> Result<(), Error> {
    let output_json = !std::io::stderr().is_terminal() || config.force_json_output;
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let layer = match (output_json, config.use_test_writer) {
        (_, true) => base_layer()
            .pretty()
            .with_test_writer()
            .with_filter(filter)
            .boxed(),
        (true, false) => base_layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        (false, false) => base_layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    let subscriber = Registry::default().with(layer);
    tracing::subscriber::set_global_default(subscriber)?;

    // Install a logger that converts logs into tracing events
    LogTracer::init()?;

    Ok(())
}

/// Maps a count of `-v` flags to the level logged when `RUST_LOG` is unset.
pub fn verbosity_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}
