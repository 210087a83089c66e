use crate::models::error::{BackupError, Result};
use crate::service::backup::BackupManager;
use crate::utils::cancel::CancellationToken;
use log::{debug, error, info};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Wake,
    Shutdown,
}

/// How long the engine may sleep before it has to look at the store again,
/// `None` when a pass should run now.
///
/// A pass is due once both the earliest directory (`next_due`) and the
/// `earliest` allowed wake time have arrived. Sleeps never exceed `poll`, so
/// directories added or requested by another process are noticed.
pub fn next_wake_delay(
    next_due: Option<i64>,
    earliest: i64,
    now: i64,
    poll: Duration,
) -> Option<Duration> {
    let wake_at = match next_due {
        Some(due) => due.max(earliest),
        None => return Some(poll),
    };
    if wake_at <= now {
        return None;
    }
    let until_wake = Duration::from_secs(wake_at.saturating_sub(now) as u64);
    Some(until_wake.min(poll))
}

/// Runs backup passes on a dedicated engine thread.
///
/// A pass runs at start-up, then whenever the earliest directory becomes due
/// or someone asks for one. Between passes the store is re-read every
/// `min_check_interval`, and passes are at least that far apart unless requested.
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    token: CancellationToken,
    signals: Sender<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    pub fn start(manager: Arc<BackupManager>) -> Result<Self> {
        let (signals, receiver) = mpsc::channel();
        let token = CancellationToken::new();

        let thread = {
            let manager = Arc::clone(&manager);
            let token = token.clone();
            thread::Builder::new()
                .name("backup-engine".to_string())
                .spawn(move || run_loop(&manager, &token, &receiver))?
        };

        info!("Backup scheduler started");
        Ok(Self {
            manager,
            token,
            signals,
            thread: Some(thread),
        })
    }

    /// Runs a pass as soon as the engine thread is free.
    pub fn check_now(&self) -> Result<()> {
        self.signals
            .send(Signal::Wake)
            .map_err(|_| BackupError::SchedulerStopped)
    }

    /// Makes one directory, or all of them, due and starts a pass.
    pub fn backup_now(&self, directory_id: Option<i64>) -> Result<usize> {
        let cleared = self.manager.request_backup(directory_id)?;
        self.check_now()?;
        Ok(cleared)
    }

    /// Interrupts a running pass and waits for the engine thread to stop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.token.cancel();
        let _ = self.signals.send(Signal::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Backup engine thread panicked");
            }
            info!("Backup scheduler stopped");
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(manager: &BackupManager, token: &CancellationToken, signals: &Receiver<Signal>) {
    let floor = manager.config().min_check_interval();
    let mut run_pass = true;
    let mut earliest = 0;

    loop {
        if token.is_cancelled() {
            break;
        }

        if run_pass {
            match manager.check_for_backups(token) {
                Ok(summary) => debug!("Pass at {} done: {}", summary.pass_time, summary),
                Err(e) => manager
                    .sink()
                    .error(format!("Backup check failed: {}", e)),
            }
            if token.is_cancelled() {
                break;
            }
            earliest = chrono::Utc::now()
                .timestamp()
                .saturating_add(floor.as_secs() as i64);
            run_pass = false;
        }

        let now = chrono::Utc::now().timestamp();
        let next_due = match manager.next_due_time() {
            Ok(next_due) => next_due,
            Err(e) => {
                error!("Cannot compute the next backup time: {}", e);
                None
            }
        };

        let delay = match next_wake_delay(next_due, earliest, now, floor) {
            Some(delay) => delay,
            None => {
                run_pass = true;
                continue;
            }
        };
        match next_due {
            Some(due) => debug!(
                "Next backup due in {} seconds, checking again in {} seconds",
                due.max(earliest).saturating_sub(now),
                delay.as_secs()
            ),
            None => debug!(
                "No backup directories configured, checking again in {} seconds",
                delay.as_secs()
            ),
        }

        match signals.recv_timeout(delay) {
            Ok(Signal::Wake) => run_pass = true,
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    debug!("Backup engine loop finished");
}
