//! Instrument driver contract.
//!
//! The driver is the only suspension point that crosses a process boundary:
//! a black box taking a `Protocol`'s name and returning, asynchronously,
//! either a list of produced file paths or nothing. The scheduler never
//! inspects what a driver does internally.

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by a driver invocation.
#[derive(Debug, Error, Diagnostic)]
#[error("driver failed executing `{name}`: {message}")]
#[diagnostic(code(labsched::driver::failure))]
pub struct DriverError {
    pub name: String,
    pub message: String,
}

/// Opaque instrument-facing work-unit executor.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Run the named work unit, returning any produced file paths.
    async fn execute(&self, name: &str) -> Result<Option<Vec<String>>, DriverError>;
}

/// Built-in dummy instrument adapter that simulates work by sleeping for a
/// fixed duration.
pub struct DummyDriver {
    sleep_for: Duration,
}

impl DummyDriver {
    #[must_use]
    pub fn new(sleep_for: Duration) -> Self {
        Self { sleep_for }
    }
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Driver for DummyDriver {
    async fn execute(&self, name: &str) -> Result<Option<Vec<String>>, DriverError> {
        tracing::info!(task_name = name, "dummy driver starting");
        tokio::time::sleep(self.sleep_for).await;
        tracing::info!(task_name = name, "dummy driver finished");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dummy_driver_returns_no_files() {
        let driver = DummyDriver::new(Duration::from_millis(1));
        let result = driver.execute("P1").await.unwrap();
        assert!(result.is_none());
    }
}
