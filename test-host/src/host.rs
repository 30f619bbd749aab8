//! One test run: start the guest, watch its output for a terminal marker,
//! stop the guest.
//!
//! ```text
//! NotStarted -> Running -> Finished(Passed | Failed | TimedOut | BackendError)
//!     \___________________ Finished(BackendError)   (start failed)
//! ```

use std::future::Future;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, GuestBackend};
use crate::config::HostConfig;
use crate::error::HostError;
use crate::guest::GuestSpec;
use crate::markers::{Markers, Verdict};
use crate::result::{RunResult, RunState, RunStatus};
use crate::signal;

struct Outcome {
    status: RunStatus,
    message: Option<String>,
}

impl From<HostError> for Outcome {
    fn from(err: HostError) -> Self {
        Outcome {
            status: err.status(),
            message: Some(err.to_string()),
        }
    }
}

pub struct TestHost {
    config: HostConfig,
    markers: Markers,
    echo: bool,
}

impl TestHost {
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        let markers = Markers::new(&config.markers)?;
        Ok(Self {
            config,
            markers,
            echo: true,
        })
    }

    /// Print guest output lines to stdout as they arrive.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Run the guest described by `spec`, stopping early on SIGINT/SIGTERM.
    pub async fn run(&self, spec: &GuestSpec) -> RunResult {
        let backend = Backend::for_spec(spec, &self.config);
        self.run_backend(spec.to_string(), backend, signal::shutdown())
            .await
    }

    /// Drive an already constructed backend. `cancel` resolving ends the
    /// run as interrupted.
    pub async fn run_backend<B, C>(&self, guest: String, mut backend: B, cancel: C) -> RunResult
    where
        B: GuestBackend,
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut states = vec![RunState::NotStarted];
        let mut output = Vec::new();

        let outcome = match backend.start().await {
            Err(e) => {
                error!(%guest, error = %e, "backend failed to start");
                Outcome::from(e)
            }
            Ok(()) => {
                transition(&mut states, RunState::Running);
                info!(%guest, timeout_secs = self.config.timeout_secs, "guest running");

                let outcome = self.watch(&mut backend, &mut output, cancel).await;
                if let Err(e) = backend.stop().await {
                    warn!(%guest, error = %e, "backend did not stop cleanly");
                }
                outcome
            }
        };

        transition(&mut states, RunState::Finished(outcome.status));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        RunResult::new(guest, outcome.status, outcome.message, output, elapsed_ms)
            .with_states(states)
    }

    async fn watch<B, C>(&self, backend: &mut B, output: &mut Vec<String>, cancel: C) -> Outcome
    where
        B: GuestBackend,
        C: Future<Output = ()>,
    {
        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        tokio::pin!(cancel);

        loop {
            let now = Instant::now();
            if now >= deadline {
                return HostError::TimedOut(timeout).into();
            }
            let wait = self.config.line_timeout().min(deadline - now);

            let read = tokio::select! {
                biased;
                _ = &mut cancel => {
                    return Outcome {
                        status: RunStatus::BackendError,
                        message: Some("run interrupted".to_string()),
                    };
                }
                read = backend.read_line(wait) => read,
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(e) => return e.into(),
            };

            debug!(target: "guest", "{}", line);
            if self.echo {
                println!("{line}");
            }
            let verdict = self.markers.classify(&line);
            output.push(line);

            match verdict {
                Some(Verdict::Pass) => {
                    return Outcome {
                        status: RunStatus::Passed,
                        message: None,
                    }
                }
                Some(Verdict::Fail(reason)) => {
                    return Outcome {
                        status: RunStatus::Failed,
                        message: Some(reason),
                    }
                }
                None => {}
            }
        }
    }
}

fn transition(states: &mut Vec<RunState>, next: RunState) {
    let from = states.last().copied();
    debug_assert!(!from.is_some_and(RunState::is_terminal), "run already finished");
    debug!(?from, to = ?next, "run state");
    states.push(next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::pending;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    enum Step {
        Line(&'static str),
        Silence,
        Fail,
    }

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        reads: AtomicUsize,
        stops: AtomicUsize,
    }

    /// Plays back a fixed script; silent forever once it runs out.
    struct Scripted {
        steps: VecDeque<Step>,
        fail_start: bool,
        counters: Arc<Counters>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let backend = Self {
                steps: steps.into(),
                fail_start: false,
                counters: counters.clone(),
            };
            (backend, counters)
        }

        fn failing_start() -> (Self, Arc<Counters>) {
            let (mut backend, counters) = Self::new(Vec::new());
            backend.fail_start = true;
            (backend, counters)
        }
    }

    impl GuestBackend for Scripted {
        async fn start(&mut self) -> Result<(), HostError> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(HostError::DeviceNotFound("/dev/ttyUSB0".into()));
            }
            Ok(())
        }

        async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HostError> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            match self.steps.pop_front() {
                Some(Step::Line(line)) => Ok(Some(line.to_string())),
                Some(Step::Fail) => Err(HostError::BackendRead(std::io::Error::other("uart gone"))),
                Some(Step::Silence) | None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }

        async fn stop(&mut self) -> Result<(), HostError> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn host(timeout_secs: u64) -> TestHost {
        let config = HostConfig {
            timeout_secs,
            ..HostConfig::default()
        };
        TestHost::new(config).unwrap().echo(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_marker() {
        let (backend, counters) = Scripted::new(vec![Step::Line("boot..."), Step::Line("PASS")]);
        let result = host(60).run_backend("qemu".into(), backend, pending()).await;

        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, ["boot...", "PASS"]);
        assert_eq!(result.message, None);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.states,
            [
                RunState::NotStarted,
                RunState::Running,
                RunState::Finished(RunStatus::Passed)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_marker_stops_reading() {
        let (backend, counters) = Scripted::new(vec![
            Step::Line("boot..."),
            Step::Line("FAIL"),
            Step::Line("PASS"),
        ]);
        let result = host(60).run_backend("qemu".into(), backend, pending()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.output, ["boot...", "FAIL"]);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 2);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_through_idle_reads() {
        let (backend, _) = Scripted::new(vec![
            Step::Line("boot..."),
            Step::Silence,
            Step::Silence,
            Step::Line("[runner] ** ALL TESTS PASSED **"),
        ]);
        let result = host(60).run_backend("qemu".into(), backend, pending()).await;
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.output.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_marker() {
        let (backend, counters) = Scripted::new(vec![Step::Line("boot...")]);
        let result = host(5).run_backend("qemu".into(), backend, pending()).await;

        assert_eq!(result.status, RunStatus::TimedOut);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.output, ["boot..."]);
        assert!(result.elapsed_ms >= 5000);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_never_runs() {
        let (backend, counters) = Scripted::failing_start();
        let result = host(60)
            .run_backend("serial:/dev/ttyUSB0".into(), backend, pending())
            .await;

        assert_eq!(result.status, RunStatus::BackendError);
        assert_eq!(result.exit_code, 3);
        assert!(result.message.unwrap().contains("/dev/ttyUSB0"));
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
        assert!(!result.states.contains(&RunState::Running));
        assert_eq!(
            result.states,
            [
                RunState::NotStarted,
                RunState::Finished(RunStatus::BackendError)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_still_stops() {
        let (backend, counters) = Scripted::new(vec![Step::Line("boot..."), Step::Fail]);
        let result = host(60).run_backend("qemu".into(), backend, pending()).await;

        assert_eq!(result.status, RunStatus::BackendError);
        assert!(result.message.unwrap().contains("uart gone"));
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_backend() {
        let (backend, counters) = Scripted::new(Vec::new());
        let cancel = tokio::time::sleep(Duration::from_secs(3));
        let result = host(60).run_backend("qemu".into(), backend, cancel).await;

        assert_eq!(result.status, RunStatus::BackendError);
        assert_eq!(result.message.as_deref(), Some("run interrupted"));
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed_without_marker() {
        struct Closed;
        impl GuestBackend for Closed {
            async fn start(&mut self) -> Result<(), HostError> {
                Ok(())
            }
            async fn read_line(&mut self, _: Duration) -> Result<Option<String>, HostError> {
                Err(HostError::StreamClosed)
            }
            async fn stop(&mut self) -> Result<(), HostError> {
                Ok(())
            }
        }

        let result = host(60).run_backend("qemu".into(), Closed, pending()).await;
        assert_eq!(result.status, RunStatus::BackendError);
        assert_eq!(
            result.message.as_deref(),
            Some("guest output ended before a terminal marker")
        );
    }
}
