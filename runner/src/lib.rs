#![cfg_attr(docsrs, feature(doc_cfg))]

//! Drives DAP interoperability tests: starts a client, two aggregators and a collector from
//! container images, provisions a task across them, uploads measurements and checks that the
//! collected aggregate matches what the measurements imply.

use crate::models::Role;
use dap_interop_core::{time, vdaf, vdaf::AggregateResult};

pub mod catalog;
pub mod config;
pub mod container;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod provision;
pub mod readiness;
pub mod report;
pub mod substrate;
#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod trace;

/// Reasons a test scenario fails.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("substrate error: {0}")]
    Substrate(#[from] substrate::Error),
    #[error("interop API error: {0}")]
    InteropApi(#[from] dap_interop_api::Error),
    #[error("{role} ({image}) was not ready after {attempts} attempts: {last_error}")]
    ReadinessTimeout {
        role: Role,
        image: String,
        attempts: usize,
        last_error: String,
    },
    #[error("collection did not complete after {start_attempts} start attempts")]
    CollectionTimeout { start_attempts: usize },
    #[error("incorrect aggregate result, expected {expected}, got {actual}")]
    ResultMismatch {
        expected: AggregateResult,
        actual: AggregateResult,
    },
    #[error("aggregation scheme error: {0}")]
    Vdaf(#[from] vdaf::Error),
    #[error("time error: {0}")]
    Time(#[from] time::Error),
}
