#![allow(dead_code)]

use std::error::Error;
use std::time::Duration;

use taskrail::exec::{ExecuteOptions, Executor};
use taskrail::process::{ManagerSettings, ProcessManager};

pub use taskrail_test_utils::{CallLog, FakeProcessTable, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Short timings so kill / retry tests finish quickly.
pub fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        poll_interval: Duration::from_millis(10),
        settle_timeout: Duration::from_millis(200),
        graceful_timeout: Duration::from_millis(500),
    }
}

pub fn executor() -> Executor {
    Executor::new(ProcessManager::new(fast_settings()))
}

/// `sh -c <script>` with a short retry delay.
pub fn sh(script: &str) -> ExecuteOptions {
    ExecuteOptions::shell(script).retry_delay(Duration::from_millis(10))
}
