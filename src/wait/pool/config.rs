/*!
 * Wait Pool Configuration
 *
 * Runtime configuration for the reactor and its callback workers
 */

use serde::{Deserialize, Serialize};

/// Environment variable overriding the worker count
pub const ENV_WORKERS: &str = "OSAWAIT_POOL_WORKERS";
/// Environment variable overriding the epoll batch size
pub const ENV_MAX_EVENTS: &str = "OSAWAIT_POOL_MAX_EVENTS";

/// Wait pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Threads running registration callbacks
    pub workers: usize,
    /// Maximum readiness events drained per epoll_wait
    pub max_events: usize,
    /// Name of the reactor thread
    pub reactor_thread_name: String,
    /// Name prefix of worker threads
    pub worker_thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_events: 64,
            reactor_thread_name: "wait-reactor".to_string(),
            worker_thread_name: "wait-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Minimal pool: one worker, small batches
    pub fn minimal() -> Self {
        Self {
            workers: 1,
            max_events: 16,
            ..Self::default()
        }
    }

    /// Defaults overridden from the environment
    ///
    /// Unparseable or zero values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = read_env_count(ENV_WORKERS) {
            config.workers = workers;
        }
        if let Some(max_events) = read_env_count(ENV_MAX_EVENTS) {
            config.max_events = max_events;
        }
        config
    }

    /// Clamp values to usable minimums
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.max_events = self.max_events.max(1);
        self
    }
}

fn read_env_count(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}
