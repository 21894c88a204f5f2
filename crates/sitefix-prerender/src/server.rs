//! Preview server process handle.
//!
//! Lifecycle: spawn → wait for readiness → use → terminate (graceful, then a
//! forced kill once the grace period runs out). The child runs in its own
//! process group; dropping a [`PreviewServer`] that is still running kills
//! the whole group, so an early return or a cancelled future cannot leave a
//! server holding the port.

use std::process::Stdio;
use std::time::{Duration, Instant};

use sitefix_core::{ReadinessPolicy, Result, SiteConfig, SiteFixError};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::obs;
use crate::probe::HttpProbe;

/// How a server shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Had already exited before shutdown was requested.
    AlreadyExited,
    /// Exited within the grace period after the terminate signal.
    Graceful,
    /// Had to be killed.
    Killed,
}

/// A running preview server.
#[derive(Debug)]
pub struct PreviewServer {
    child: Child,
    port: u16,
}

impl PreviewServer {
    /// Start the preview server and wait until it answers HTTP.
    ///
    /// Each attempt spawns a fresh process and probes it under the readiness
    /// deadline; a process that exits early aborts the attempt. Attempts are
    /// separated by the `server_retry` backoff. Exhausting them is a
    /// [`SiteFixError::ServerStartFailure`].
    pub async fn start(config: &SiteConfig) -> Result<Self> {
        let port = config.preview_port;
        let probe = HttpProbe::new(
            &config.preview_base_url(),
            Duration::from_millis(config.readiness.probe_timeout_ms),
        )?;
        let retry = config.server_retry;
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=retry.max_attempts {
            obs::emit_server_attempt(port, attempt, retry.max_attempts);
            let started = Instant::now();

            match spawn(config) {
                Ok(child) => {
                    let mut server = Self { child, port };
                    match wait_until_ready(&mut server.child, &probe, &config.readiness).await {
                        Ok(()) => {
                            obs::emit_server_ready(port, attempt, started.elapsed().as_millis() as u64);
                            return Ok(server);
                        }
                        Err(reason) => {
                            obs::emit_server_attempt_failed(port, attempt, &reason);
                            if let Err(e) = server.shutdown(Duration::from_secs(1)).await {
                                warn!(port = port, error = %e, "failed to stop unready server");
                            }
                            last_reason = reason;
                        }
                    }
                }
                Err(e) => {
                    last_reason = format!("spawn failed: {e}");
                    obs::emit_server_attempt_failed(port, attempt, &last_reason);
                }
            }

            if attempt < retry.max_attempts {
                let delay = retry.delay_for(attempt);
                debug!(port = port, delay_ms = delay.as_millis() as u64, "backing off before next server attempt");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SiteFixError::ServerStartFailure {
            attempts: retry.max_attempts,
            reason: last_reason,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Terminate the server: SIGTERM to its process group, then a forced
    /// kill if it is still running after `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> Result<ShutdownKind> {
        if self.child.try_wait()?.is_some() {
            return Ok(ShutdownKind::AlreadyExited);
        }

        if signal_group(&self.child, Signal::Terminate) {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(port = self.port, status = %status, "preview server stopped");
                    return Ok(ShutdownKind::Graceful);
                }
                Err(_) => {
                    warn!(
                        port = self.port,
                        grace_ms = grace.as_millis() as u64,
                        "preview server ignored terminate; killing"
                    );
                }
            }
        }

        signal_group(&self.child, Signal::Kill);
        self.child.kill().await?;
        info!(port = self.port, "preview server killed");
        Ok(ShutdownKind::Killed)
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        // A reaped child reports its status here, so this is a no-op after
        // `shutdown`.
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!(port = self.port, "preview server dropped while running; killing its process group");
            signal_group(&self.child, Signal::Kill);
        }
    }
}

fn spawn(config: &SiteConfig) -> Result<Child> {
    let args = config.preview.args_for_port(config.preview_port);
    info!(
        command = %config.preview.program,
        args = ?args,
        port = config.preview_port,
        "spawning preview server"
    );
    let mut cmd = Command::new(&config.preview.program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    Ok(cmd.spawn()?)
}

/// Poll until the probe succeeds, the process exits or the deadline passes.
async fn wait_until_ready(
    child: &mut Child,
    probe: &HttpProbe,
    policy: &ReadinessPolicy,
) -> std::result::Result<(), String> {
    let deadline = Instant::now() + policy.deadline();
    tokio::time::sleep(Duration::from_millis(policy.initial_delay_ms)).await;

    let mut poll = 0u32;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Err(format!("server process exited early ({status})")),
            Ok(None) => {}
            Err(e) => return Err(format!("cannot query server process: {e}")),
        }
        if probe.check().await {
            return Ok(());
        }

        poll += 1;
        let now = Instant::now();
        if now >= deadline {
            return Err(format!(
                "no HTTP response from {} within {}ms",
                probe.url(),
                policy.deadline_ms
            ));
        }
        let wait = policy.interval_for(poll).min(deadline - now);
        debug!(poll = poll, wait_ms = wait.as_millis() as u64, "server not ready yet");
        tokio::time::sleep(wait).await;
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Signal the child's process group. Returns `false` when no signal could
/// be delivered (process gone, or a platform without process groups).
#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // The child leads its own group, so the negative pid addresses the group.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
    rc == 0
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _signal: Signal) -> bool {
    false
}
