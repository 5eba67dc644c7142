//! Virtual-user fan-out over session iterations.
//!
//! The runner is deliberately thin: spawn one task per virtual user, let
//! each run its iterations back to back, and fold the reports into one
//! summary. Sessions share nothing but the check ledger they are merged
//! into afterwards.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::check::CheckLedger;
use crate::config::{Endpoint, SessionConfig};
use crate::observer::SessionObserver;
use crate::session::{IterationReport, SessionRunner, SessionState};

/// Fan-out configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Concurrently running virtual users.
    ///
    /// Default: 1
    pub virtual_users: usize,

    /// Iterations each virtual user executes sequentially.
    ///
    /// Default: 1
    pub iterations: usize,

    /// Upper bound on simultaneously open sessions.
    ///
    /// Default: 256
    pub max_concurrent: usize,

    /// Delay between consecutive virtual-user starts.
    ///
    /// Default: zero (all start together)
    pub stagger: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            virtual_users: 1,
            iterations: 1,
            max_concurrent: 256,
            stagger: Duration::ZERO,
        }
    }
}

impl RunnerConfig {
    /// Create a configuration with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of virtual users.
    #[must_use]
    pub const fn with_virtual_users(mut self, virtual_users: usize) -> Self {
        self.virtual_users = virtual_users;
        self
    }

    /// Set the iterations per virtual user.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the concurrent session cap.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the start stagger between virtual users.
    #[must_use]
    pub const fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }
}

/// Aggregated result of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations completed (including failed handshakes).
    pub iterations: u64,
    /// Subscribe messages sent across all sessions.
    pub messages_sent: u64,
    /// Data frames received across all sessions.
    pub server_messages: u64,
    /// Iterations that never reached the open state.
    pub handshake_failures: u64,
    /// Check outcomes folded across all iterations.
    pub ledger: CheckLedger,
}

impl RunSummary {
    /// Fold one iteration report in.
    pub fn absorb(&mut self, report: &IterationReport) {
        self.iterations += 1;
        self.messages_sent += report.messages_sent;
        self.server_messages += report.server_messages;
        if report.state == SessionState::Failed {
            self.handshake_failures += 1;
        }
        for check in &report.checks {
            self.ledger.record(*check);
        }
    }

    /// Fold another summary in.
    pub fn merge(&mut self, other: &RunSummary) {
        self.iterations += other.iterations;
        self.messages_sent += other.messages_sent;
        self.server_messages += other.server_messages;
        self.handshake_failures += other.handshake_failures;
        self.ledger.merge(&other.ledger);
    }

    /// True when every check across the run held.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.ledger.all_passed()
    }
}

/// Schedules virtual users over a [`SessionRunner`].
pub struct Runner {
    session: SessionRunner,
    config: RunnerConfig,
}

impl Runner {
    /// Create a runner against the given endpoint with default settings.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            session: SessionRunner::new(endpoint),
            config: RunnerConfig::default(),
        }
    }

    /// Set the per-session timing configuration.
    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = self.session.with_config(config);
        self
    }

    /// Set the fan-out configuration.
    #[must_use]
    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the lifecycle observer shared by all sessions.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.session = self.session.with_observer(observer);
        self
    }

    /// Run all virtual users to completion and summarize.
    pub async fn run(&self) -> RunSummary {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut set = JoinSet::new();

        for vu in 0..self.config.virtual_users {
            let session = self.session.clone();
            let semaphore = semaphore.clone();
            let iterations = self.config.iterations;
            let delay = self.config.stagger * vu as u32;

            set.spawn(async move {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }

                let mut local = RunSummary::default();
                for iteration in 0..iterations {
                    // Semaphore never closes while the runner is alive.
                    let Ok(permit) = semaphore.acquire().await else {
                        break;
                    };
                    let id = (vu * iterations + iteration) as u64;
                    let report = session.run_iteration(id).await;
                    drop(permit);
                    local.absorb(&report);
                }
                local
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(local) => summary.merge(&local),
                Err(err) => tracing::error!(%err, "virtual user task failed"),
            }
        }
        summary
    }
}
