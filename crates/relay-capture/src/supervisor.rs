//! Capture process supervision.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use relay_hub::Hub;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::policy::SupervisorState;
use crate::{CaptureResult, CHUNK_CHANNEL_CAPACITY};

/// What the reader thread sends back.
enum ReadEvent {
    Data(Bytes),
    Eof,
    Error(std::io::Error),
}

/// How a session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The capture process closed its stdout.
    Eof,
    /// Stop was requested.
    Stopped,
}

/// Runs the capture process and keeps it running.
pub struct CaptureSupervisor {
    config: CaptureConfig,
    hub: Arc<Hub>,
    state: Arc<RwLock<SupervisorState>>,
    stop_rx: Receiver<()>,
}

impl CaptureSupervisor {
    /// Start supervising on a dedicated thread.
    pub fn spawn(config: CaptureConfig, hub: Arc<Hub>) -> CaptureResult<SupervisorHandle> {
        let state = Arc::new(RwLock::new(SupervisorState::Starting));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);

        let supervisor = CaptureSupervisor {
            config,
            hub,
            state: Arc::clone(&state),
            stop_rx,
        };

        let thread = thread::Builder::new()
            .name("capture-supervisor".into())
            .spawn(move || supervisor.run())?;

        Ok(SupervisorHandle {
            state,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    #[instrument(name = "capture_supervisor", skip(self), fields(command = %self.config.command_line()))]
    fn run(self) {
        info!("Capture supervisor starting");
        let policy = self.config.restart.clone();
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let outcome = self.run_session();
            let uptime = started.elapsed();

            let reason = match outcome {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Eof) => {
                    info!(uptime_secs = uptime.as_secs_f32(), "Capture process ended");
                    "capture process ended".to_string()
                }
                Err(e) => {
                    warn!(error = %e, uptime_secs = uptime.as_secs_f32(), "Capture session failed");
                    e.to_string()
                }
            };

            if policy.is_stable(uptime) {
                attempt = 0;
            }
            attempt += 1;

            if !policy.should_retry(attempt) {
                error!(attempt, %reason, "Giving up on capture");
                self.transition_to(SupervisorState::Failed { reason });
                return;
            }

            self.transition_to(SupervisorState::Restarting { attempt });
            let delay = policy.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Restarting capture after delay");

            // Interruptible sleep: the stop channel disconnects when stop is requested
            if self.stop_rx.recv_timeout(delay).is_err_and(|e| e.is_disconnected()) {
                break;
            }
        }

        self.transition_to(SupervisorState::Stopped);
        info!("Capture supervisor stopped");
    }

    /// Run one capture process to completion.
    fn run_session(&self) -> CaptureResult<SessionEnd> {
        let mut child = self.spawn_child()?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                reap(&mut child);
                return Err(CaptureError::NoStdout);
            }
        };

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(CHUNK_CHANNEL_CAPACITY);
        let read_chunk_size = self.config.read_chunk_size.max(1);
        // Not joined; the reader exits once the pipe closes or the channel drops
        if let Err(e) = thread::Builder::new()
            .name("capture-reader".into())
            .spawn(move || read_loop(stdout, chunk_tx, read_chunk_size))
        {
            reap(&mut child);
            return Err(CaptureError::Io(e));
        }

        // Bytes left over from a previous process must not prefix this one
        self.hub.reset_pending();
        self.transition_to(SupervisorState::Streaming);

        let outcome = self.pump(&chunk_rx);

        reap(&mut child);
        drop(chunk_rx);

        outcome
    }

    /// Forward chunks to the hub until the process ends, stalls, or stop is requested.
    fn pump(&self, chunk_rx: &Receiver<ReadEvent>) -> CaptureResult<SessionEnd> {
        let stall_timeout = self.config.stall_timeout();
        let mut bytes_read: u64 = 0;

        loop {
            select! {
                recv(chunk_rx) -> event => match event {
                    Ok(ReadEvent::Data(chunk)) => {
                        bytes_read += chunk.len() as u64;
                        self.hub.ingest(&chunk);
                    }
                    Ok(ReadEvent::Eof) => {
                        debug!(bytes_read, "Capture stdout closed");
                        return Ok(SessionEnd::Eof);
                    }
                    Ok(ReadEvent::Error(e)) => return Err(CaptureError::Read(e)),
                    Err(_) => return Err(CaptureError::ReaderDisconnected),
                },
                recv(self.stop_rx) -> _ => return Ok(SessionEnd::Stopped),
                default(stall_timeout) => return Err(CaptureError::Stalled(stall_timeout)),
            }
        }
    }

    #[instrument(name = "capture_spawn", skip(self))]
    fn spawn_child(&self) -> CaptureResult<Child> {
        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        info!(pid = child.id(), "Capture process started");
        Ok(child)
    }

    fn transition_to(&self, new_state: SupervisorState) {
        let previous = std::mem::replace(&mut *self.state.write(), new_state.clone());
        if previous != new_state {
            debug!(previous = ?previous, current = ?new_state, "Supervisor state transition");
        }
    }
}

/// Kill the child if it is still running and collect its exit status.
fn reap(child: &mut Child) {
    // Fails only if the process already exited
    let _ = child.kill();
    match child.wait() {
        Ok(status) => debug!(%status, "Capture process reaped"),
        Err(e) => warn!(error = %e, "Failed to reap capture process"),
    }
}

/// Blocking reads from the capture process, forwarded as chunks.
fn read_loop(mut stdout: ChildStdout, chunk_tx: Sender<ReadEvent>, chunk_size: usize) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let event = match stdout.read(&mut buf) {
            Ok(0) => ReadEvent::Eof,
            Ok(n) => ReadEvent::Data(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => ReadEvent::Error(e),
        };
        let done = !matches!(event, ReadEvent::Data(_));
        if chunk_tx.send(event).is_err() || done {
            return;
        }
    }
}

/// Read-only view of the supervisor state, shareable across tasks.
#[derive(Clone)]
pub struct SupervisorStatus(Arc<RwLock<SupervisorState>>);

impl SupervisorStatus {
    pub fn get(&self) -> SupervisorState {
        self.0.read().clone()
    }
}

/// Handle to a running [`CaptureSupervisor`].
pub struct SupervisorHandle {
    state: Arc<RwLock<SupervisorState>>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Current supervisor state.
    pub fn state(&self) -> SupervisorState {
        self.state.read().clone()
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus(Arc::clone(&self.state))
    }

    /// Whether the supervisor thread has finished.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the capture process and wait for the supervisor to exit.
    #[instrument(name = "capture_stop", skip(self))]
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel, waking the supervisor
        if let Some(stop_tx) = self.stop_tx.take() {
            if !self.is_finished() {
                info!("Stopping capture supervisor");
            }
            drop(stop_tx);
        }
        self.join_thread();
    }

    /// Wait for the supervisor to finish on its own and return its final state.
    pub fn join(mut self) -> SupervisorState {
        self.join_thread();
        self.state()
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture supervisor thread panicked");
            }
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use relay_hub::UnitKind;

    use super::*;
    use crate::policy::RestartPolicy;

    // SPS, PPS, IDR and a terminating start code
    const PRINTF_STREAM: &str = r"printf '\000\000\000\001\147\102\000\000\001\150\316\000\000\001\145\210\000\000\000\001'";
    const STREAM_LEN: u64 = 20;

    fn sh(script: &str, max_attempts: u32) -> CaptureConfig {
        CaptureConfig {
            stall_timeout_ms: 2_000,
            restart: RestartPolicy {
                max_attempts: Some(max_attempts),
                base_delay_ms: 10,
                max_delay_ms: 20,
                stable_after_ms: 60_000,
            },
            ..CaptureConfig::command("sh", ["-c", script])
        }
    }

    #[test]
    fn test_process_output_reaches_hub() {
        let hub = Arc::new(Hub::default());
        let handle = CaptureSupervisor::spawn(sh(PRINTF_STREAM, 1), Arc::clone(&hub)).unwrap();

        let state = handle.join();
        assert!(matches!(state, SupervisorState::Failed { .. }));

        let kinds: Vec<_> = hub.cached_units().iter().map(|u| u.kind()).collect();
        assert_eq!(kinds, vec![UnitKind::Sps, UnitKind::Pps, UnitKind::Idr]);
    }

    #[test]
    fn test_restarts_until_attempts_exhausted() {
        let hub = Arc::new(Hub::default());
        let handle = CaptureSupervisor::spawn(sh(PRINTF_STREAM, 3), Arc::clone(&hub)).unwrap();
        handle.join();

        let stats = hub.stats();
        assert_eq!(stats.bytes_ingested, 3 * STREAM_LEN);
        // The trailing start code of each run is discarded by the next reset
        assert_eq!(stats.units_produced, 9);
        assert_eq!(stats.key_units, 3);
    }

    #[test]
    fn test_stalled_process_is_killed() {
        let hub = Arc::new(Hub::default());
        let mut config = sh("exec sleep 30", 1);
        config.stall_timeout_ms = 100;

        let started = Instant::now();
        let state = CaptureSupervisor::spawn(config, hub).unwrap().join();

        assert!(started.elapsed() < Duration::from_secs(10));
        match state {
            SupervisorState::Failed { reason } => assert!(reason.contains("stalled"), "{}", reason),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_missing_program_fails() {
        let hub = Arc::new(Hub::default());
        let mut config = CaptureConfig::command("relay-capture-test-no-such-program", Vec::<String>::new());
        config.restart.max_attempts = Some(2);
        config.restart.base_delay_ms = 1;

        let state = CaptureSupervisor::spawn(config, hub).unwrap().join();
        match state {
            SupervisorState::Failed { reason } => assert!(reason.contains("Failed to spawn"), "{}", reason),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_stop_interrupts_running_process() {
        let hub = Arc::new(Hub::default());
        let mut handle = CaptureSupervisor::spawn(sh("exec sleep 30", 5), hub).unwrap();
        let status = handle.status();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !status.get().is_streaming() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.state().is_streaming());

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.state(), SupervisorState::Stopped);
        assert_eq!(status.get(), SupervisorState::Stopped);
        assert!(handle.is_finished());
    }
}
