//! Worker-thread pool for user-visible completion callbacks.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tern_common::error::{TernError, TernResult};

use crate::client::{CallbackPool, CallbackTask};

/// Fixed-size worker pool draining one shared task queue.
///
/// After `shutdown`, further submissions are rejected so callers can fall
/// back to running callbacks inline.
#[derive(Debug)]
pub struct WorkerCallbackPool {
    sender: Mutex<Option<Sender<CallbackTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerCallbackPool {
    /// Spawns a pool with the given number of worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error when a worker thread cannot be spawned.
    pub fn new(worker_count: usize) -> TernResult<Self> {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel::<CallbackTask>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("tern-callback-{index}"))
                .spawn(move || Self::worker_loop(&receiver))
                .map_err(|error| {
                    TernError::Io(format!("spawn callback worker {index} failed: {error}"))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    fn worker_loop(receiver: &Arc<Mutex<Receiver<CallbackTask>>>) {
        loop {
            let task = {
                let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                receiver.recv()
            };
            match task {
                Ok(task) => task(),
                Err(_) => break,
            }
        }
    }

    /// Stops accepting tasks, drains the queue, and joins the workers.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl CallbackPool for WorkerCallbackPool {
    fn submit(&self, task: CallbackTask) -> TernResult<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(task).map_err(|_| {
                TernError::IllegalState("callback pool workers are gone".to_owned())
            }),
            None => Err(TernError::IllegalState(
                "callback pool is shut down".to_owned(),
            )),
        }
    }
}

impl Drop for WorkerCallbackPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
