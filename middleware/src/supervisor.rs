//! Child-process supervisor: spawns a launcher binary, restarts it on
//! unexpected exit with doubling backoff, and gives up after too many
//! crashes within the restart window.
//!
//! Grounded on the reference pack's spawn/poll-until-ready launcher
//! (`loom-cli`'s `backend::auto_start`), generalized from a one-shot spawn
//! into a supervised restart loop, and on the teacher's `Arc<Mutex<_>>`-guarded
//! process state idiom.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::breaker::CircuitBreaker;
use crate::clock::Clock;

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Started { pid: u32 },
    Crash { code: Option<i32>, signal: Option<i32> },
    Error { err: String },
    Stopped,
    MaxRestartsExceeded,
}

pub type Observer = Box<dyn Fn(SupervisorEvent) + Send + Sync>;

pub struct SupervisorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub restart_window_ms: i64,
    pub max_attempts: usize,
}

struct Inner {
    pid: Option<u32>,
    current_delay_ms: u64,
    restart_timestamps: Vec<i64>,
    manual_stop: bool,
}

pub struct Supervisor {
    config: SupervisorConfig,
    clock: Arc<dyn Clock>,
    breaker: Arc<CircuitBreaker>,
    observer: Mutex<Option<Observer>>,
    inner: Mutex<Inner>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, clock: Arc<dyn Clock>, breaker: Arc<CircuitBreaker>) -> Arc<Self> {
        let initial_delay = config.initial_delay_ms;
        Arc::new(Self {
            config,
            clock,
            breaker,
            observer: Mutex::new(None),
            inner: Mutex::new(Inner { pid: None, current_delay_ms: initial_delay, restart_timestamps: Vec::new(), manual_stop: false }),
            watch_task: Mutex::new(None),
        })
    }

    pub fn set_observer(&self, observer: Observer) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(event);
        }
    }

    fn is_alive(&self) -> bool {
        self.inner.lock().unwrap().pid.is_some()
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        Command::new(&self.config.program)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// Idempotent: does nothing if a child is already alive.
    pub fn start(self: &Arc<Self>, on_line: impl FnMut(bool, String) + Send + 'static) {
        if self.is_alive() {
            return;
        }
        self.inner.lock().unwrap().manual_stop = false;

        let child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                self.emit(SupervisorEvent::Error { err: e.to_string() });
                return;
            }
        };

        let Some(pid) = child.id() else {
            self.emit(SupervisorEvent::Error { err: "spawned child has no pid".to_string() });
            return;
        };
        self.inner.lock().unwrap().pid = Some(pid);
        self.emit(SupervisorEvent::Started { pid });

        let this = self.clone();
        let handle = tokio::spawn(async move { this.watch(child, on_line).await });
        *self.watch_task.lock().unwrap() = Some(handle);
    }

    /// Line-split stdout/stderr, each prefixed with its stream, fed through a
    /// channel into the single `on_line` callback this watch loop owns.
    async fn watch(self: Arc<Self>, mut child: Child, mut on_line: impl FnMut(bool, String) + Send + 'static) {
        use tokio::io::{AsyncBufReadExt, BufReader};
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel::<(bool, String)>();

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send((false, line));
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send((true, line));
                }
            });
        }
        drop(tx);

        let status = loop {
            tokio::select! {
                Some((is_stderr, line)) = rx.recv() => on_line(is_stderr, line),
                result = child.wait() => break result,
            }
        };
        while let Ok((is_stderr, line)) = rx.try_recv() {
            on_line(is_stderr, line);
        }
        self.inner.lock().unwrap().pid = None;

        if self.inner.lock().unwrap().manual_stop {
            self.emit(SupervisorEvent::Stopped);
            return;
        }

        match status {
            Ok(status) => {
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;
                self.emit(SupervisorEvent::Crash { code: status.code(), signal });
            }
            Err(e) => self.emit(SupervisorEvent::Error { err: e.to_string() }),
        }

        self.breaker.record_failure();
        self.maybe_restart(on_line).await;
    }

    async fn maybe_restart(self: &Arc<Self>, on_line: impl FnMut(bool, String) + Send + 'static) {
        let now = self.clock.now_ms();
        let (should_restart, delay_ms) = {
            let mut inner = self.inner.lock().unwrap();
            inner.restart_timestamps.retain(|&t| now - t < self.config.restart_window_ms);
            if inner.restart_timestamps.len() >= self.config.max_attempts {
                (false, 0)
            } else {
                inner.restart_timestamps.push(now);
                let delay = inner.current_delay_ms;
                inner.current_delay_ms = (inner.current_delay_ms * 2).min(self.config.max_delay_ms);
                (true, delay)
            }
        };

        if !should_restart {
            self.emit(SupervisorEvent::MaxRestartsExceeded);
            return;
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        self.start(on_line);
    }

    /// Stops the child (if any) and resets backoff. Idempotent.
    pub fn stop(&self) {
        self.inner.lock().unwrap().manual_stop = true;
        self.inner.lock().unwrap().current_delay_ms = self.config.initial_delay_ms;
        if let Some(handle) = self.watch_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Stops and immediately restarts, resetting backoff first.
    pub fn restart(self: &Arc<Self>, on_line: impl FnMut(bool, String) + Send + 'static) {
        self.stop();
        self.inner.lock().unwrap().pid = None;
        self.inner.lock().unwrap().manual_stop = false;
        self.start(on_line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            program: "true".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            restart_window_ms: 60_000,
            max_attempts: 3,
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let clock = Arc::new(FakeClock::new());
        let breaker = Arc::new(CircuitBreaker::new(clock.clone(), 100, 1_000));
        let supervisor = Supervisor::new(config(), clock, breaker);
        let mut inner = supervisor.inner.lock().unwrap();
        for _ in 0..5 {
            inner.current_delay_ms = (inner.current_delay_ms * 2).min(supervisor.config.max_delay_ms);
        }
        assert_eq!(inner.current_delay_ms, 1_000);
    }

    #[test]
    fn stop_resets_current_delay() {
        let clock = Arc::new(FakeClock::new());
        let breaker = Arc::new(CircuitBreaker::new(clock.clone(), 100, 1_000));
        let supervisor = Supervisor::new(config(), clock, breaker);
        supervisor.inner.lock().unwrap().current_delay_ms = 800;
        supervisor.stop();
        assert_eq!(supervisor.inner.lock().unwrap().current_delay_ms, 100);
    }

    #[test]
    fn max_attempts_exhausted_stops_scheduling() {
        let clock = Arc::new(FakeClock::new());
        let breaker = Arc::new(CircuitBreaker::new(clock.clone(), 100, 1_000));
        let mut cfg = config();
        cfg.max_attempts = 2;
        let supervisor = Supervisor::new(cfg, clock, breaker);
        let now = supervisor.clock.now_ms();
        let mut inner = supervisor.inner.lock().unwrap();
        inner.restart_timestamps = vec![now, now];
        assert!(inner.restart_timestamps.len() >= supervisor.config.max_attempts);
    }
}
