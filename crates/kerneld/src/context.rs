//! Shared kernel context.
//!
//! One [`KernelContext`] exists per kernel process, created by the runloop
//! and handed (behind an `Arc`) to every event loop and handler. Ambient
//! globals are forbidden so tests can construct isolated kernels.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify};

use jupyter_wire::{Message, Signer};

use crate::backend::{ExecutionBackend, StdioCapture};
use crate::iopub::IopubPublisher;
use crate::session::SessionState;

/// Open comm channels by id, mapped to their target name.
///
/// Enough state to answer comm traffic correctly: opens are recorded,
/// messages for unknown ids are answered with a close, closes remove.
#[derive(Default)]
pub struct CommState {
    open: StdMutex<HashMap<String, String>>,
}

impl CommState {
    pub fn open(&self, comm_id: &str, target_name: &str) {
        self.open
            .lock()
            .unwrap()
            .insert(comm_id.to_owned(), target_name.to_owned());
    }

    pub fn is_open(&self, comm_id: &str) -> bool {
        self.open.lock().unwrap().contains_key(comm_id)
    }

    pub fn close(&self, comm_id: &str) -> bool {
        self.open.lock().unwrap().remove(comm_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().unwrap().is_empty()
    }
}

/// Everything a handler needs: session state, the iopub publisher, the
/// execution backend, and the interrupt/shutdown signals.
pub struct KernelContext {
    /// Kernel-side session id stamped on outbound headers.
    pub session_id: String,
    pub username: String,
    pub signer: Signer,
    /// Mutable session state. Mutated only while servicing one request on
    /// the shell channel; the lock enforces that serialization.
    pub session: Mutex<SessionState>,
    pub iopub: IopubPublisher,
    pub backend: Box<dyn ExecutionBackend>,
    /// Buffer for backend stdio writes, drained by the owning event loop.
    pub stdio: StdioCapture,
    pub comms: CommState,
    /// Cooperative cancellation of the in-flight execution.
    interrupt: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl KernelContext {
    pub fn new(
        session_id: &str,
        username: &str,
        signer: Signer,
        iopub: IopubPublisher,
        backend: Box<dyn ExecutionBackend>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        KernelContext {
            session_id: session_id.to_owned(),
            username: username.to_owned(),
            signer,
            session: Mutex::new(SessionState::new()),
            iopub,
            backend,
            stdio: StdioCapture::default(),
            comms: CommState::default(),
            interrupt: Notify::new(),
            shutdown_tx,
        }
    }

    /// Build a reply to a request, stamped with the kernel's identity.
    pub fn reply_to(&self, request: &Message, msg_type: &str, content: Value) -> Message {
        request.reply(msg_type, &self.session_id, &self.username, content)
    }

    /// Signal the in-flight execution (if any) to abort. Only executions
    /// currently at a cancellation checkpoint observe it.
    pub fn interrupt_execution(&self) {
        self.interrupt.notify_waiters();
    }

    /// Wait for an interrupt signal. Used by the execute engine to race the
    /// backend invocation.
    pub async fn interrupted(&self) {
        self.interrupt.notified().await;
    }

    /// Ask every channel loop and the iopub pump to stop.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
