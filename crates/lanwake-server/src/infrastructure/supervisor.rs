//! Owns every background worker and stops them together.
//!
//! lanwake runs two kinds of workers:
//!
//! - **Tokio tasks** – scan loops, the challenge gate, the HTTP API.
//! - **OS threads** – pnet capture loops, which block on `recv()` and must
//!   not run on the async runtime.
//!
//! All of them poll the same `running` flag at least every 200 ms.
//! [`BackgroundServices::shutdown`] clears the flag and then waits for each
//! worker in turn, so the process exits only after every socket is closed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry of running workers sharing one shutdown flag.
pub struct BackgroundServices {
    running: Arc<AtomicBool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    threads: Vec<(String, thread::JoinHandle<()>)>,
}

impl Default for BackgroundServices {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundServices {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            tasks: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// The shared flag.  Hand a clone to every worker.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawns `future` on the runtime and tracks it under `name`.
    pub fn spawn_task<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(worker = %name, "task started");
        self.tasks.push((name, tokio::spawn(future)));
    }

    /// Tracks an already-spawned OS thread.
    pub fn add_thread(&mut self, name: impl Into<String>, handle: thread::JoinHandle<()>) {
        self.threads.push((name.into(), handle));
    }

    /// Number of tracked workers.
    pub fn len(&self) -> usize {
        self.tasks.len() + self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the flag without waiting.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Clears the flag and waits for every worker to exit.
    ///
    /// A worker that panicked is logged and skipped.
    pub async fn shutdown(self) {
        self.request_stop();
        info!(workers = self.len(), "stopping background services");

        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(worker = %name, "task ended abnormally: {e}");
            }
        }

        for (name, handle) in self.threads {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!(worker = %name, "thread panicked"),
                Err(e) => warn!(worker = %name, "could not join thread: {e}"),
            }
        }
        info!("background services stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
