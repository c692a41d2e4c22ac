//! # Poll Primitive
//!
//! Bridges a synchronous step and an asynchronous remote operation: fetch the
//! remote status until it lands in the caller's success set, fails fast on the
//! caller's error set, and gives up after a bounded number of attempts.
//!
//! The primitive knows no platform vocabulary. Callers supply the status sets
//! and the fetcher; [`observe`] turns a remote `get` into an [`Observation`].
//!
//! "Not found" and transient remote errors are kept apart: a missing entity is
//! tolerated for a short grace period right after creation, a transient error
//! (5xx, 408, 429) is tolerated up to a small budget, and anything else fails
//! the poll.
//!
//! ```rust
//! use resource_orchestrator::polling::{poll, Observation, PollSpec};
//! use resource_orchestrator::error::RemoteError;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let spec = PollSpec::new("volume create", &["available"], &["error"])
//!     .with_interval(Duration::from_millis(1));
//! let mut statuses = vec!["available", "creating"];
//! let outcome = poll(
//!     &spec,
//!     || {
//!         let status = statuses.pop().unwrap_or("available");
//!         std::future::ready(Ok::<_, RemoteError>(Observation::Status(status.to_string())))
//!     },
//!     |_| {},
//! )
//! .await
//! .unwrap();
//! assert_eq!(outcome.attempts, 2);
//! # });
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::error::{OrchestratorError, RemoteError, Result};
use crate::remote::StatusRecord;

/// Status reported for an entity that exists but has no status vocabulary
pub const PRESENT_STATUS: &str = "present";

/// One observation of the remote entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Status(String),
    /// Visible but no status yet
    Pending,
    /// Not found on the remote side
    Gone,
}

/// Map the result of a remote `get` to an observation
pub fn observe(record: Option<StatusRecord>) -> Observation {
    match record {
        None => Observation::Gone,
        Some(record) => match record.normalized_status() {
            Some(status) if !status.is_empty() => Observation::Status(status),
            _ => Observation::Status(PRESENT_STATUS.to_string()),
        },
    }
}

#[derive(Debug, Clone)]
pub struct PollSpec {
    /// Human-readable operation name used in errors and logs
    pub operation: String,
    /// What is being polled, usually the ext_id
    pub target: Option<String>,
    pub success: HashSet<String>,
    pub error: HashSet<String>,
    pub interval: Duration,
    pub max_attempts: u32,
    /// Leading `Gone` observations tolerated before any status was seen
    pub not_found_grace: u32,
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
    /// Deletions poll until the entity disappears
    pub gone_is_success: bool,
    pub transient_error_budget: u32,
}

impl PollSpec {
    pub fn new<S: AsRef<str>>(operation: impl Into<String>, success: &[S], error: &[S]) -> Self {
        Self::from_config(operation, success, error, &PollingConfig::default())
    }

    pub fn from_config<S: AsRef<str>>(
        operation: impl Into<String>,
        success: &[S],
        error: &[S],
        config: &PollingConfig,
    ) -> Self {
        Self {
            operation: operation.into(),
            target: None,
            success: normalize(success),
            error: normalize(error),
            interval: config.interval(),
            max_attempts: config.max_attempts,
            not_found_grace: config.not_found_grace_attempts,
            backoff_multiplier: config.backoff_multiplier,
            max_interval: config.max_interval(),
            gone_is_success: false,
            transient_error_budget: config.transient_error_budget,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_not_found_grace(mut self, attempts: u32) -> Self {
        self.not_found_grace = attempts;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    pub fn with_transient_error_budget(mut self, budget: u32) -> Self {
        self.transient_error_budget = budget;
        self
    }

    pub fn gone_is_success(mut self) -> Self {
        self.gone_is_success = true;
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= 1.0 {
            return current;
        }
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_multiplier)
            .map(|next| next.min(self.max_interval))
            .unwrap_or(self.max_interval)
    }

    fn target_label(&self) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| self.operation.clone())
    }
}

fn normalize<S: AsRef<str>>(statuses: &[S]) -> HashSet<String> {
    statuses
        .iter()
        .map(|s| s.as_ref().to_ascii_lowercase())
        .collect()
}

/// Terminal result of a successful poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Matching success status; `None` when success was the entity disappearing
    pub status: Option<String>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl PollOutcome {
    pub fn is_gone(&self) -> bool {
        self.status.is_none()
    }
}

/// Passed to the progress callback after every attempt
#[derive(Debug)]
pub struct PollProgress<'a> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub observation: &'a Observation,
}

/// Poll `fetch` until a terminal status.
///
/// Sleeps between attempts, never after the last one, so a poll that never
/// reaches a terminal status fails after `max_attempts` fetches.
pub async fn poll<F, Fut, P>(spec: &PollSpec, mut fetch: F, mut progress: P) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Observation, RemoteError>>,
    P: FnMut(&PollProgress<'_>),
{
    let started = Instant::now();
    let mut interval = spec.interval;
    let mut last_status: Option<String> = None;
    let mut seen_entity = false;
    let mut gone_count = 0u32;
    let mut transient_errors = 0u32;

    for attempt in 1..=spec.max_attempts {
        let observation = match fetch().await {
            Ok(Observation::Status(status)) => Observation::Status(status.to_ascii_lowercase()),
            Ok(other) => other,
            Err(e) if e.is_not_found() => Observation::Gone,
            Err(e) if e.is_transient() && transient_errors < spec.transient_error_budget => {
                transient_errors += 1;
                warn!(
                    operation = %spec.operation,
                    attempt = attempt,
                    error = %e,
                    "Transient error while polling, retrying"
                );
                Observation::Pending
            }
            Err(e) => return Err(OrchestratorError::remote(spec.operation.clone(), &e)),
        };

        progress(&PollProgress {
            attempt,
            max_attempts: spec.max_attempts,
            observation: &observation,
        });

        match &observation {
            Observation::Status(status) => {
                seen_entity = true;
                if spec.success.contains(status) {
                    debug!(
                        operation = %spec.operation,
                        status = %status,
                        attempt = attempt,
                        "Poll reached success status"
                    );
                    return Ok(PollOutcome {
                        status: Some(status.clone()),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                if spec.error.contains(status) {
                    return Err(OrchestratorError::RemoteOperation {
                        operation: spec.operation.clone(),
                        reason: format!("{} reached error status {status}", spec.target_label()),
                        status_code: None,
                    });
                }
                last_status = Some(status.clone());
            }
            Observation::Pending => {
                seen_entity = true;
            }
            Observation::Gone => {
                if spec.gone_is_success {
                    return Ok(PollOutcome {
                        status: None,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                gone_count += 1;
                if seen_entity || gone_count > spec.not_found_grace {
                    return Err(OrchestratorError::not_found(
                        "Remote entity",
                        spec.target_label(),
                    ));
                }
            }
        }

        if attempt < spec.max_attempts {
            tokio::time::sleep(interval).await;
            interval = spec.next_interval(interval);
        }
    }

    Err(OrchestratorError::Timeout {
        operation: spec.operation.clone(),
        attempts: spec.max_attempts,
        elapsed: started.elapsed(),
        last_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use crate::constants::defaults;

    fn fast(spec: PollSpec) -> PollSpec {
        spec.with_interval(Duration::from_millis(1))
    }

    fn scripted(
        items: Vec<std::result::Result<Observation, RemoteError>>,
    ) -> impl FnMut() -> std::future::Ready<std::result::Result<Observation, RemoteError>> {
        let mut queue: VecDeque<_> = items.into();
        move || {
            let next = queue.pop_front().unwrap_or(Ok(Observation::Pending));
            std::future::ready(next)
        }
    }

    fn status(s: &str) -> std::result::Result<Observation, RemoteError> {
        Ok(Observation::Status(s.to_string()))
    }

    #[tokio::test]
    async fn test_reaches_success_after_hidden_first_cycle() {
        let spec = fast(PollSpec::new("volume create", &["available"], &["error"]));
        let fetch = scripted(vec![
            Ok(Observation::Gone),
            status("creating"),
            status("creating"),
            status("available"),
        ]);
        let mut seen = Vec::new();
        let outcome = poll(&spec, fetch, |p| seen.push(p.observation.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.status.as_deref(), Some("available"));
        assert_eq!(outcome.attempts, 4);
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn test_error_status_fails_immediately() {
        let spec = fast(PollSpec::new("volume create", &["available"], &["error"]));
        let fetch = scripted(vec![status("creating"), status("ERROR"), status("available")]);
        let mut attempts = 0;
        let err = poll(&spec, fetch, |p| attempts = p.attempt).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::RemoteOperation { .. }));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout_reports_last_status() {
        let spec = fast(PollSpec::new("stack create", &["create_complete"], &["create_failed"]))
            .with_max_attempts(3);
        let fetch = scripted(vec![
            status("create_in_progress"),
            status("create_in_progress"),
            status("create_in_progress"),
            status("create_complete"),
        ]);
        let err = poll(&spec, fetch, |_| {}).await.unwrap_err();

        match err {
            OrchestratorError::Timeout {
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_status.as_deref(), Some("create_in_progress"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gone_beyond_grace_is_not_found() {
        let spec = fast(PollSpec::new("volume create", &["available"], &["error"]))
            .with_not_found_grace(1)
            .with_target("V1");
        let fetch = scripted(vec![Ok(Observation::Gone), Ok(Observation::Gone)]);
        let err = poll(&spec, fetch, |_| {}).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("V1"));
    }

    #[tokio::test]
    async fn test_disappearing_after_seen_is_not_found() {
        let spec = fast(PollSpec::new("server start", &["active"], &["error"]));
        let fetch = scripted(vec![status("build"), Ok(Observation::Gone)]);
        assert!(poll(&spec, fetch, |_| {}).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_gone_is_success_for_deletes() {
        let spec = fast(PollSpec::new("volume delete", &["deleted"], &["error_deleting"]))
            .gone_is_success();
        let fetch = scripted(vec![status("deleting"), Err(RemoteError::not_found("os", "V1"))]);
        let outcome = poll(&spec, fetch, |_| {}).await.unwrap();
        assert!(outcome.is_gone());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_transient_errors_within_budget_are_tolerated() {
        let spec = fast(PollSpec::new("server boot", &["active"], &["error"]))
            .with_transient_error_budget(2);
        let fetch = scripted(vec![
            Err(RemoteError::new("os", 503, "unavailable")),
            Err(RemoteError::new("os", 504, "gateway timeout")),
            status("active"),
        ]);
        assert_eq!(poll(&spec, fetch, |_| {}).await.unwrap().attempts, 3);

        let spec = spec.with_transient_error_budget(0);
        let fetch = scripted(vec![Err(RemoteError::new("os", 503, "unavailable"))]);
        let err = poll(&spec, fetch, |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), "remote_operation");
    }

    #[tokio::test]
    async fn test_non_transient_error_fails() {
        let spec = fast(PollSpec::new("server boot", &["active"], &["error"]));
        let fetch = scripted(vec![Err(RemoteError::new("os", 403, "forbidden"))]);
        let err = poll(&spec, fetch, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::RemoteOperation {
                status_code: Some(403),
                ..
            }
        ));
    }

    #[test]
    fn test_backoff_is_capped() {
        let spec = PollSpec::new("x", &["a"], &["b"])
            .with_interval(Duration::from_millis(100))
            .with_backoff(2.0, Duration::from_millis(300));
        let second = spec.next_interval(Duration::from_millis(100));
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(spec.next_interval(second), Duration::from_millis(300));
    }

    #[test]
    fn test_oversized_backoff_saturates_at_max_interval() {
        let spec = PollSpec::new("x", &["a"], &["b"])
            .with_interval(Duration::from_millis(1))
            .with_backoff(1e30, Duration::from_millis(50));
        let mut interval = Duration::from_millis(1);
        for _ in 0..3 {
            interval = spec.next_interval(interval);
            assert_eq!(interval, Duration::from_millis(50));
        }

        let spec = spec.with_backoff(f64::INFINITY, Duration::from_millis(50));
        assert_eq!(spec.next_interval(interval), Duration::from_millis(50));

        let spec = spec.with_backoff(f64::NAN, Duration::from_millis(50));
        assert_eq!(spec.next_interval(Duration::from_millis(7)), Duration::from_millis(7));
    }

    #[test]
    fn test_transient_budget_comes_from_config() {
        let config = PollingConfig {
            transient_error_budget: 7,
            ..PollingConfig::default()
        };
        let spec = PollSpec::from_config("x", &["a"], &["b"], &config);
        assert_eq!(spec.transient_error_budget, 7);
        assert_eq!(
            PollSpec::new("x", &["a"], &["b"]).transient_error_budget,
            defaults::POLL_TRANSIENT_ERROR_BUDGET
        );
    }

    #[test]
    fn test_observe_maps_missing_status_to_present() {
        use crate::models::ResourceKind;
        assert_eq!(observe(None), Observation::Gone);
        assert_eq!(
            observe(Some(StatusRecord::new("S1", ResourceKind::Subnet))),
            Observation::Status(PRESENT_STATUS.to_string())
        );
        assert_eq!(
            observe(Some(StatusRecord::new("V1", ResourceKind::Volume).with_status("In-Use"))),
            Observation::Status("in-use".to_string())
        );
    }
}
