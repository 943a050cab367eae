//! Functionality for extracting logs from a DAP participant under test.

use crate::substrate::Error;
use async_trait::async_trait;
use std::path::Path;

/// Name of the file holding a participant's combined stdout and stderr.
pub const PROCESS_LOG_FILE_NAME: &str = "container_process.log";

#[async_trait]
pub trait CopyLogs {
    /// Copies log files out of the participant's `/logs` directory and into `destination` on the
    /// host filesystem for later analysis.
    async fn copy_logs_directory(&self, destination: &Path) -> Result<(), Error>;

    /// Writes the participant's combined stdout and stderr stream to the file at `destination`.
    /// No file is left behind if the stream is empty.
    async fn save_process_logs(&self, destination: &Path) -> Result<(), Error>;
}
