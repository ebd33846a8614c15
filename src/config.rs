//! Runtime configuration for an [`crate::executor::Executor`].
//!
//! A `Default` impl plus a constructor and `with_*` builders, with
//! environment-variable fallback via `dotenvy` for settings not given
//! explicitly on the CLI. The executor itself only needs solver tuning; the
//! persistence directory is resolved here for the CLI's benefit but handed
//! to storage construction directly rather than threaded through the
//! executor.

use std::path::PathBuf;

use crate::optimizer::OptimizerConfig;

/// Default persistence directory when `--payloaddir` is not given.
pub const DEFAULT_PAYLOAD_DIR: &str = "./payloads";

/// Configuration carried by the executor for its own lifetime: solver
/// tuning, and (indirectly, via the CLI) which driver to run.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub optimizer: OptimizerConfig,
}

impl ExecutorConfig {
    #[must_use]
    pub fn new(optimizer: OptimizerConfig) -> Self {
        Self { optimizer }
    }

    /// Resolve the payload directory: an explicit value wins, otherwise
    /// fall back to an environment variable (after loading a `.env` file if
    /// present), then to a hardcoded default.
    #[must_use]
    pub fn resolve_payload_dir(provided: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = provided {
            return dir;
        }
        dotenvy::dotenv().ok();
        std::env::var("LABSCHED_PAYLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PAYLOAD_DIR))
    }

    #[must_use]
    pub fn with_buffer_seconds(mut self, buffer_seconds: i64) -> Self {
        self.optimizer.buffer_seconds = buffer_seconds;
        self
    }

    #[must_use]
    pub fn with_solver_time_limit(mut self, seconds: u32) -> Self {
        self.optimizer.solver_time_limit_seconds = seconds;
        self
    }
}
