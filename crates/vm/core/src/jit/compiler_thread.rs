//! Background compilation thread.
//!
//! Provides a single background thread that processes compile requests in
//! arrival order. Invoking threads enqueue a request and keep
//! interpreting; synchronous requesters block on the request's waiter
//! instead of on the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use super::request::CompileRequest;
use super::types::JitError;

/// Handle to the background compiler thread.
///
/// Holds the sender half of an mpsc channel. On `Drop`, the sender is
/// closed (causing the background thread's `recv()` to return `Err`) and
/// the thread is joined.
pub struct CompilerThread {
    sender: Option<mpsc::Sender<CompileRequest>>,
    handle: Option<thread::JoinHandle<()>>,
    abandon: Arc<AtomicBool>,
}

impl CompilerThread {
    /// Start the background compiler thread.
    ///
    /// The `handler_fn` closure is invoked for each request on the
    /// background thread and is responsible for completing it.
    pub fn start<F>(handler_fn: F) -> Result<Self, JitError>
    where
        F: Fn(CompileRequest) + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<CompileRequest>();
        let abandon = Arc::new(AtomicBool::new(false));
        let abandon_flag = Arc::clone(&abandon);

        let handle = thread::Builder::new()
            .name("jit-compiler".to_string())
            .spawn(move || {
                while let Ok(request) = receiver.recv() {
                    if abandon_flag.load(Ordering::Acquire) {
                        // Dropping the request wakes its waiter.
                        drop(request);
                        continue;
                    }
                    handler_fn(request);
                }
            })
            .map_err(|err| JitError::ThreadSpawn(err.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            abandon,
        })
    }

    /// Queue a request.
    ///
    /// Returns `false` if the channel is disconnected. The request is then
    /// dropped, which resolves it as abandoned.
    pub fn send(&self, request: CompileRequest) -> bool {
        self.sender
            .as_ref()
            .map(|s| s.send(request).is_ok())
            .unwrap_or(false)
    }

    /// Abandon every request dequeued from now on instead of compiling it.
    /// The request being compiled finishes normally.
    pub fn abandon_pending(&self) {
        self.abandon.store(true, Ordering::Release);
    }

    /// Stop the thread, abandoning whatever is still queued.
    pub fn shutdown(self) {
        self.abandon_pending();
        // Drop closes the channel and joins.
    }
}

impl Drop for CompilerThread {
    fn drop(&mut self) {
        // Drop the sender first so the background thread's recv() returns Err
        drop(self.sender.take());

        if let Some(handle) = self.handle.take()
            && let Err(panic_payload) = handle.join()
        {
            // Log panic but don't re-panic during drop (double-panic = abort)
            tracing::error!(
                payload = ?panic_payload.downcast_ref::<&str>(),
                "compiler thread panicked"
            );
        }
    }
}

impl std::fmt::Debug for CompilerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerThread")
            .field("active", &self.sender.is_some())
            .field("abandoning", &self.abandon.load(Ordering::Relaxed))
            .finish()
    }
}
