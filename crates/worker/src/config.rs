//! Worker configuration loaded from environment variables.

use std::time::Duration;

use event_bus::ReceiveOptions;

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `INVENTORY_QUEUE_NAME` — queue to consume (default: `"inventory-orders"`)
/// - `WORKER_MAX_BATCH` — messages per receive (default: `10`)
/// - `WORKER_WAIT_SECS` — long-poll duration (default: `20`)
/// - `WORKER_VISIBILITY_SECS` — visibility timeout (default: `30`)
/// - `WORKER_RESOLVE_RETRY_SECS` — delay between queue-resolution attempts
///   (default: `1`)
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    pub max_batch: usize,
    pub wait: Duration,
    pub visibility_timeout: Duration,
    pub resolve_retry_delay: Duration,
}

impl WorkerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_name: std::env::var("INVENTORY_QUEUE_NAME")
                .unwrap_or(defaults.queue_name),
            max_batch: env_parse("WORKER_MAX_BATCH").unwrap_or(defaults.max_batch),
            wait: env_parse("WORKER_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait),
            visibility_timeout: env_parse("WORKER_VISIBILITY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            resolve_retry_delay: env_parse("WORKER_RESOLVE_RETRY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.resolve_retry_delay),
        }
    }

    /// Returns the receive parameters for one long-poll.
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.max_batch,
            wait: self.wait,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: "inventory-orders".to_string(),
            max_batch: 10,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
            resolve_retry_delay: Duration::from_secs(1),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
