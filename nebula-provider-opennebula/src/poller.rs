//! Convergence poller
//!
//! Waits for an asynchronously provisioned remote object to reach a target
//! state. Each tick fetches the object, maps its raw `(state, lcm_state)`
//! pair to a [`VmState`] and stops on the target, on boot failure, on a hard
//! fetch error or at the deadline. Not-found fetches count as pending to
//! absorb read-after-write lag.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::config::Timeouts;
use crate::error::{OneError, OneResult};
use crate::record::VmRecord;

pub const STATE_ACTIVE: i64 = 3;
pub const STATE_DONE: i64 = 6;
pub const LCM_RUNNING: i64 = 3;
pub const LCM_BOOT_FAILURE: i64 = 36;

/// Symbolic state of a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Anything else
    Pending,
    Running,
    Done,
    BootFailure,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Pending => "pending",
            VmState::Running => "running",
            VmState::Done => "done",
            VmState::BootFailure => "boot_failure",
        };
        f.write_str(s)
    }
}

/// Map a raw state pair
pub fn classify(state: i64, lcm_state: i64) -> VmState {
    match (state, lcm_state) {
        (STATE_DONE, _) => VmState::Done,
        (STATE_ACTIVE, LCM_RUNNING) => VmState::Running,
        (STATE_ACTIVE, LCM_BOOT_FAILURE) => VmState::BootFailure,
        _ => VmState::Pending,
    }
}

/// A remote object exposing a state pair and an error detail
pub trait Observed {
    fn states(&self) -> (i64, i64);

    fn error_message(&self) -> Option<&str>;
}

impl Observed for VmRecord {
    fn states(&self) -> (i64, i64) {
        VmRecord::states(self)
    }

    fn error_message(&self) -> Option<&str> {
        self.user_template.error.as_deref()
    }
}

/// Timing of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    /// Wait before the first fetch
    pub delay: Duration,
    pub poll_interval: Duration,
    pub min_poll_interval: Duration,
}

impl PollSettings {
    pub fn new(timeout: Duration, timeouts: &Timeouts) -> Self {
        Self {
            timeout,
            delay: timeouts.delay,
            poll_interval: timeouts.poll_interval,
            min_poll_interval: timeouts.min_poll_interval,
        }
    }

    fn tick(&self) -> Duration {
        self.poll_interval.max(self.min_poll_interval)
    }
}

fn describe(last_seen: Option<(i64, i64)>) -> String {
    match last_seen {
        Some((state, lcm)) => format!("state {} lcm {} ({})", state, lcm, classify(state, lcm)),
        None => "never observed".to_string(),
    }
}

/// Poll `fetch` until the object reaches `target` (`Running` or `Done`)
pub async fn wait_for<T, F, Fut>(
    id: i64,
    target: VmState,
    settings: &PollSettings,
    mut fetch: F,
) -> OneResult<T>
where
    T: Observed,
    F: FnMut() -> Fut,
    Fut: Future<Output = OneResult<T>>,
{
    if !matches!(target, VmState::Running | VmState::Done) {
        return Err(OneError::validation(format!(
            "cannot wait for VM {} to become {}",
            id, target
        )));
    }

    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut last_seen = None;

    sleep(settings.delay.min(settings.timeout)).await;

    loop {
        match fetch().await {
            Ok(observed) => {
                let (state, lcm) = observed.states();
                last_seen = Some((state, lcm));
                let current = classify(state, lcm);
                log::debug!(
                    "VM {}: state {} lcm {} is {}, waiting for {}",
                    id,
                    state,
                    lcm,
                    current,
                    target
                );

                if current == target {
                    return Ok(observed);
                }
                if current == VmState::BootFailure {
                    return Err(OneError::BootFailure {
                        id,
                        message: observed
                            .error_message()
                            .unwrap_or("no error reported")
                            .to_string(),
                    });
                }
            }
            Err(OneError::NotFound(message)) => {
                log::warn!("VM {} not visible yet, still waiting: {}", id, message);
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(OneError::Timeout {
                id,
                target: target.to_string(),
                elapsed: now - started,
                last_seen: describe(last_seen),
            });
        }
        sleep(settings.tick().min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Probe {
        state: i64,
        lcm: i64,
        error: Option<String>,
    }

    impl Observed for Probe {
        fn states(&self) -> (i64, i64) {
            (self.state, self.lcm)
        }

        fn error_message(&self) -> Option<&str> {
            self.error.as_deref()
        }
    }

    fn probe(state: i64, lcm: i64) -> OneResult<Probe> {
        Ok(Probe {
            state,
            lcm,
            error: None,
        })
    }

    fn settings() -> PollSettings {
        PollSettings {
            timeout: Duration::from_secs(60),
            delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            min_poll_interval: Duration::from_secs(3),
        }
    }

    /// Replays scripted responses, repeating the last one forever
    fn scripted(
        responses: Vec<OneResult<Probe>>,
    ) -> (
        impl FnMut() -> std::future::Ready<OneResult<Probe>>,
        Arc<Mutex<usize>>,
    ) {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut queue: VecDeque<_> = responses.into();
        let fetch = move || {
            *counter.lock().unwrap() += 1;
            let next = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                match queue.front().unwrap() {
                    Ok(p) => Ok(p.clone()),
                    Err(_) => Err(OneError::NotFound("vm".to_string())),
                }
            };
            std::future::ready(next)
        };
        (fetch, calls)
    }

    #[test]
    fn state_table() {
        assert_eq!(classify(3, 3), VmState::Running);
        assert_eq!(classify(6, 0), VmState::Done);
        assert_eq!(classify(6, 36), VmState::Done);
        assert_eq!(classify(3, 36), VmState::BootFailure);
        assert_eq!(classify(3, 2), VmState::Pending);
        assert_eq!(classify(1, 0), VmState::Pending);
        assert_eq!(classify(8, 3), VmState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_running_after_pending_ticks() {
        let (fetch, calls) = scripted(vec![
            Err(OneError::NotFound("vm 7".to_string())),
            probe(3, 1),
            probe(3, 2),
            probe(3, 3),
        ]);

        let started = Instant::now();
        let vm = wait_for(7, VmState::Running, &settings(), fetch)
            .await
            .unwrap();

        assert_eq!(vm.states(), (3, 3));
        assert_eq!(*calls.lock().unwrap(), 4);
        // delay + three ticks
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_last_seen_state() {
        let (fetch, _) = scripted(vec![probe(3, 2)]);

        let started = Instant::now();
        let result = wait_for(7, VmState::Running, &settings(), fetch).await;

        match result {
            Err(OneError::Timeout { last_seen, target, .. }) => {
                assert_eq!(target, "running");
                assert_eq!(last_seen, "state 3 lcm 2 (pending)");
            }
            other => panic!("Expected Timeout, got {:?}", other.map(|p| p.states())),
        }
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn boot_failure_aborts_before_deadline() {
        let (fetch, _) = scripted(vec![
            probe(3, 2),
            Ok(Probe {
                state: 3,
                lcm: 36,
                error: Some("Cannot dispatch VM".to_string()),
            }),
        ]);

        let started = Instant::now();
        let result = wait_for(7, VmState::Running, &settings(), fetch).await;

        match result {
            Err(OneError::BootFailure { id, message }) => {
                assert_eq!(id, 7);
                assert_eq!(message, "Cannot dispatch VM");
            }
            other => panic!("Expected BootFailure, got {:?}", other.map(|p| p.states())),
        }
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn other_fetch_errors_propagate() {
        let (fetch, calls) = scripted(vec![
            Err(OneError::remote("one.vm.info", "denied")),
            probe(3, 3),
        ]);

        let result = wait_for(7, VmState::Done, &settings(), fetch).await;
        assert!(matches!(result, Err(OneError::RemoteOperation { .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_never_below_minimum() {
        let (fetch, _) = scripted(vec![probe(3, 2), probe(6, 0)]);
        let settings = PollSettings {
            delay: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
            ..settings()
        };

        let started = Instant::now();
        wait_for(7, VmState::Done, &settings, fetch).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn rejects_non_terminal_targets() {
        let (fetch, calls) = scripted(vec![probe(3, 3)]);
        let result = wait_for(7, VmState::Pending, &settings(), fetch).await;
        assert!(matches!(result, Err(OneError::Validation(_))));
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
