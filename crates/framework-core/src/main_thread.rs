//! Main-thread executor: marshals calls onto the one thread allowed to touch
//! a DCC scripting API.
//!
//! The thread that creates the executor is the main thread. Other threads
//! post work with [`MainThreadHandle::call`] and block until the main thread
//! drains the queue through [`MainThreadExecutor::process_pending`].
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Owned by the main thread; drains queued jobs.
pub struct MainThreadExecutor {
    main_thread: ThreadId,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

/// Cloneable, thread-safe handle used to post work.
#[derive(Clone)]
pub struct MainThreadHandle {
    main_thread: ThreadId,
    sender: Sender<Job>,
}

impl MainThreadExecutor {
    /// Binds the executor to the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            main_thread: thread::current().id(),
            sender,
            receiver,
        }
    }

    pub fn handle(&self) -> MainThreadHandle {
        MainThreadHandle {
            main_thread: self.main_thread,
            sender: self.sender.clone(),
        }
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Runs every job queued so far. Returns how many ran.
    pub fn process_pending(&self) -> Result<usize> {
        self.require_main_thread()?;
        let mut count = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            count += 1;
        }
        Ok(count)
    }

    /// Keeps draining jobs until `duration` has elapsed.
    pub fn process_for(&self, duration: Duration) -> Result<usize> {
        self.require_main_thread()?;
        let deadline = Instant::now() + duration;
        let mut count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(count);
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(job) => {
                    job();
                    count += 1;
                }
                Err(RecvTimeoutError::Timeout) => return Ok(count),
                Err(RecvTimeoutError::Disconnected) => return Ok(count),
            }
        }
    }

    /// Drains jobs until `done` returns true or `timeout` elapses.
    pub fn process_until<F>(&self, timeout: Duration, mut done: F) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return Ok(true);
            }
            self.process_for(Duration::from_millis(10))?;
        }
        Ok(done())
    }

    fn require_main_thread(&self) -> Result<()> {
        if self.is_main_thread() {
            Ok(())
        } else {
            Err(CoreError::main_thread(
                "queue can only be drained from the main thread",
            ))
        }
    }
}

impl Default for MainThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadHandle {
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Runs `f` on the main thread and blocks for its result.
    ///
    /// Called from the main thread itself, `f` runs inline.
    pub fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_main_thread() {
            return Ok(f());
        }
        let (reply_tx, reply_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        self.sender
            .send(job)
            .map_err(|_| CoreError::main_thread("main thread executor is gone"))?;
        tracing::trace!("waiting for main thread");
        reply_rx
            .recv()
            .map_err(|_| CoreError::main_thread("main thread dropped the job"))
    }
}
