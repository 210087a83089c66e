//! A single background thread that owns some state and runs queued jobs on it.
//!
//! Jobs run exactly once, one at a time, in the order they were submitted.
//! Dropping the [`JobThread`] closes the queue; the thread finishes every job
//! already queued before it exits, so a caller blocked in
//! [`JobThread::execute_blocking`] always gets its answer.

use crate::models::error::{BackupError, Result};
use log::debug;
use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

pub struct JobThread<S> {
    sender: Option<Sender<Job<S>>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: 'static> JobThread<S> {
    /// Starts the thread and builds its state there with `init`.
    ///
    /// Returns once `init` has finished; its error is handed back unchanged.
    pub fn spawn<F, E>(name: &str, init: F) -> std::result::Result<Self, E>
    where
        F: FnOnce() -> std::result::Result<S, E> + Send + 'static,
        E: Send + From<io::Error> + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Job<S>>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), E>>();
        let thread_name = name.to_string();

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Ok(job) = receiver.recv() {
                    job(&mut state);
                }
                debug!("Job queue of '{}' drained, thread exiting", thread_name);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                sender: Some(sender),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(E::from(io::Error::other(format!(
                    "thread '{}' stopped during startup",
                    name
                ))))
            }
        }
    }

    /// Queues `job` and returns immediately.
    pub fn execute_nonblocking<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(BackupError::StorageClosed)?;
        sender
            .send(Box::new(job))
            .map_err(|_| BackupError::StorageClosed)
    }

    /// Queues `job` and waits for its result.
    ///
    /// Must not be called from a job already running on this thread.
    pub fn execute_blocking<R, F>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        self.execute_nonblocking(move |state| {
            let _ = result_tx.send(job(state));
        })?;
        result_rx.recv().map_err(|_| BackupError::StorageClosed)
    }

    /// Blocks until every job queued before this call has run.
    pub fn wait_job_done(&self) -> Result<()> {
        self.execute_blocking(|_| ())
    }
}

impl<S> Drop for JobThread<S> {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what is queued and exit
        drop(self.sender.take());

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            let _ = thread.join();
        }
    }
}
