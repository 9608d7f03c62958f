//! Readiness polling for freshly spawned servers.
//!
//! A bounded loop with a fixed interval: each attempt issues one probe and
//! yields a typed outcome. A probe error and a negative answer are treated
//! the same way: retry while attempts remain, fail on the last one. When the
//! supervised process exits during the wait, polling stops immediately.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ClientError;
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::process::{ProcessExit, ProcessState};

/// A lightweight "are you ready" call against a server.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn ready(&self) -> std::result::Result<bool, ClientError>;
}

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Maximum number of probes (at least one is always issued).
    pub max_attempts: u32,
    /// Fixed delay between consecutive probes.
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl ReadinessPolicy {
    /// Longest time spent sleeping before a timeout is declared.
    pub fn worst_case_wait(&self) -> Duration {
        self.interval * self.max_attempts.max(1).saturating_sub(1)
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The server reported ready.
    Ready,
    /// Not ready yet; another attempt follows.
    Retry(String),
    /// Not ready and no attempts remain.
    Exhausted(String),
    /// The server process is gone.
    Exited(ProcessExit),
}

impl AttemptOutcome {
    /// Classify a probe result for attempt `attempt` (1-based) of `max_attempts`.
    pub fn classify(
        result: std::result::Result<bool, ClientError>,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        let reason = match result {
            Ok(true) => return AttemptOutcome::Ready,
            Ok(false) => "server reported not ready".to_string(),
            Err(e) => e.to_string(),
        };
        if attempt >= max_attempts {
            AttemptOutcome::Exhausted(reason)
        } else {
            AttemptOutcome::Retry(reason)
        }
    }
}

/// Blocks until a server is ready or the attempt budget is spent.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    name: String,
    policy: ReadinessPolicy,
}

impl ReadinessPoller {
    pub fn new(name: impl Into<String>, policy: ReadinessPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    /// Poll `probe` until it reports ready.
    ///
    /// With `exit` set, a process exit observed before or during any attempt
    /// or sleep fails with [`SidecarError::ProcessExitedBeforeReady`].
    /// Returns the number of probes issued.
    pub async fn wait_until_ready<P>(
        &self,
        probe: &P,
        mut exit: Option<watch::Receiver<ProcessState>>,
    ) -> Result<u32>
    where
        P: ReadinessProbe + ?Sized,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let start = Instant::now();

        tracing::debug!(
            "Waiting for sidecar '{}' to become ready ({} attempts, {:?} apart)",
            self.name,
            max_attempts,
            self.policy.interval
        );

        for attempt in 1..=max_attempts {
            let outcome = match exit.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        biased;
                        exited = wait_for_exit(rx) => AttemptOutcome::Exited(exited),
                        result = probe.ready() => AttemptOutcome::classify(result, attempt, max_attempts),
                    }
                }
                None => AttemptOutcome::classify(probe.ready().await, attempt, max_attempts),
            };

            match outcome {
                AttemptOutcome::Ready => {
                    tracing::info!(
                        "Sidecar '{}' ready after {} attempt(s) ({:?})",
                        self.name,
                        attempt,
                        start.elapsed()
                    );
                    return Ok(attempt);
                }
                AttemptOutcome::Exited(exited) => return Err(self.exited(exited)),
                AttemptOutcome::Exhausted(reason) => {
                    tracing::error!("Sidecar '{}' failed readiness: {}", self.name, reason);
                    return Err(SidecarError::ReadinessTimeout {
                        name: self.name.clone(),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                        reason,
                    });
                }
                AttemptOutcome::Retry(reason) => {
                    tracing::trace!(
                        "Sidecar '{}' not ready (attempt {}/{}): {}",
                        self.name,
                        attempt,
                        max_attempts,
                        reason
                    );
                }
            }

            match exit.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        biased;
                        exited = wait_for_exit(rx) => return Err(self.exited(exited)),
                        () = tokio::time::sleep(self.policy.interval) => {}
                    }
                }
                None => tokio::time::sleep(self.policy.interval).await,
            }
        }

        unreachable!("the final attempt always returns")
    }

    fn exited(&self, exit: ProcessExit) -> SidecarError {
        tracing::error!(
            "Sidecar '{}' exited while waiting for readiness ({})",
            self.name,
            exit
        );
        SidecarError::ProcessExitedBeforeReady {
            name: self.name.clone(),
            exit,
        }
    }
}

/// Resolve once the watched process has exited. Pends forever if the
/// sender is dropped without an exit being published.
async fn wait_for_exit(rx: &mut watch::Receiver<ProcessState>) -> ProcessExit {
    loop {
        if let Some(exit) = rx.borrow_and_update().exit() {
            return exit;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Replays scripted probe results, then keeps answering `fallback`.
    struct ScriptedProbe {
        script: Mutex<VecDeque<std::result::Result<bool, ClientError>>>,
        fallback: bool,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(script: Vec<std::result::Result<bool, ClientError>>, fallback: bool) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReadinessProbe for ScriptedProbe {
        async fn ready(&self) -> std::result::Result<bool, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(self.fallback))
        }
    }

    fn refused() -> ClientError {
        ClientError::Request {
            endpoint: "/ready".to_string(),
            reason: "connection failed".to_string(),
        }
    }

    fn policy(max_attempts: u32, millis: u64) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts,
            interval: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(AttemptOutcome::classify(Ok(true), 10, 10), AttemptOutcome::Ready);
        assert!(matches!(
            AttemptOutcome::classify(Ok(false), 1, 10),
            AttemptOutcome::Retry(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Err(refused()), 9, 10),
            AttemptOutcome::Retry(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Err(refused()), 10, 10),
            AttemptOutcome::Exhausted(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(false), 10, 10),
            AttemptOutcome::Exhausted(_)
        ));
    }

    #[test]
    fn test_worst_case_wait() {
        assert_eq!(
            ReadinessPolicy::default().worst_case_wait(),
            Duration::from_secs(9)
        );
        assert_eq!(policy(1, 500).worst_case_wait(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_ready_after_transient_failures() {
        let probe = ScriptedProbe::new(vec![Err(refused()), Ok(false), Err(refused())], true);
        let poller = ReadinessPoller::new("test", policy(10, 5));

        let attempts = poller.wait_until_ready(&probe, None).await.unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test]
    async fn test_timeout_respects_budget_and_interval() {
        let probe = ScriptedProbe::new(Vec::new(), false);
        let poller = ReadinessPoller::new("test", policy(4, 20));
        let start = Instant::now();

        let err = poller.wait_until_ready(&probe, None).await.unwrap_err();

        assert_eq!(probe.calls(), 4);
        assert!(start.elapsed() >= Duration::from_millis(60));
        match err {
            SidecarError::ReadinessTimeout {
                attempts, reason, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(reason, "server reported not ready");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_last_error_is_surfaced() {
        let probe = ScriptedProbe::new(vec![Ok(false), Err(refused())], false);
        let poller = ReadinessPoller::new("test", policy(2, 1));

        let err = poller.wait_until_ready(&probe, None).await.unwrap_err();

        assert!(err.to_string().contains("connection failed"));
    }

    #[test]
    fn test_zero_attempts_still_probes_once() {
        let probe = ScriptedProbe::new(Vec::new(), true);
        let poller = ReadinessPoller::new("test", policy(0, 1));

        assert_eq!(
            tokio_test::block_on(poller.wait_until_ready(&probe, None)).unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_process_exit_fails_fast() {
        let probe = ScriptedProbe::new(Vec::new(), false);
        let poller = ReadinessPoller::new("test", policy(10, 1_000));
        let (tx, rx) = watch::channel(ProcessState::Running { pid: Some(1) });
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send_replace(ProcessState::Exited(ProcessExit {
                code: Some(1),
                signal: None,
                requested: false,
            }));
            // Keep the sender alive until the poller has observed the exit.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = poller.wait_until_ready(&probe, Some(rx)).await.unwrap_err();

        assert!(matches!(
            err,
            SidecarError::ProcessExitedBeforeReady { exit, .. } if exit.code == Some(1)
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_already_exited_process_is_not_probed() {
        let probe = ScriptedProbe::new(Vec::new(), true);
        let poller = ReadinessPoller::new("test", policy(3, 1));
        let (_tx, rx) = watch::channel(ProcessState::Exited(ProcessExit {
            code: Some(0),
            signal: None,
            requested: false,
        }));

        let err = poller.wait_until_ready(&probe, Some(rx)).await.unwrap_err();

        assert!(matches!(err, SidecarError::ProcessExitedBeforeReady { .. }));
        assert_eq!(probe.calls(), 0);
    }
}
