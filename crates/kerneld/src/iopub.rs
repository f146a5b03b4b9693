//! Status/result broadcasting on the iopub channel.
//!
//! Every broadcast is observable by all connected front-ends, not just the
//! requester. Handlers and the event loops enqueue messages through
//! [`IopubPublisher`]; a single pump task owns the PUB socket and preserves
//! enqueue order, which is what guarantees busy/idle bracketing of each
//! request's broadcasts.

use log::{debug, error, info};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use zeromq::{PubSocket, SocketSend};

use jupyter_wire::{encode, Message, Signer};

use crate::backend::{ErrorReport, StreamName};
use crate::channel::zmq_message_from_frames;

/// Handle for enqueueing broadcasts. Cheap to clone; all clones feed the
/// same pump task.
#[derive(Clone)]
pub struct IopubPublisher {
    session: String,
    username: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl IopubPublisher {
    /// Create a publisher and the queue consumed by the pump task.
    pub fn new(session: &str, username: &str) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            IopubPublisher {
                session: session.to_owned(),
                username: username.to_owned(),
                tx,
            },
            rx,
        )
    }

    /// Enqueue a fully-formed broadcast.
    pub fn publish(&self, message: Message) {
        // Failure means the pump is gone, which only happens at shutdown.
        let _ = self.tx.send(message);
    }

    fn broadcast(&self, msg_type: &str, content: Value, parent: Option<&Message>) {
        let mut message = Message::new(msg_type, &self.session, &self.username, content);
        if let Some(parent) = parent {
            message = message.with_parent(parent);
        }
        self.publish(message);
    }

    /// Announce the kernel's execution state (`starting`, `busy`, `idle`),
    /// correlated to the request being serviced when there is one.
    pub fn status(&self, state: &str, parent: Option<&Message>) {
        self.broadcast("status", json!({"execution_state": state}), parent);
    }

    /// Publish captured stdout/stderr text.
    pub fn stream(&self, name: StreamName, text: &str, parent: &Message) {
        self.broadcast(
            "stream",
            json!({"name": name.as_str(), "text": text}),
            Some(parent),
        );
    }

    /// Publish the rendering of an execution result.
    pub fn execute_result(&self, execution_count: usize, data: Value, parent: &Message) {
        self.broadcast(
            "execute_result",
            json!({
                "execution_count": execution_count,
                "data": data,
                "metadata": {}
            }),
            Some(parent),
        );
    }

    /// Publish an execution failure. Never used for interruptions.
    pub fn error(&self, report: &ErrorReport, parent: Option<&Message>) {
        self.broadcast(
            "error",
            json!({
                "ename": report.ename,
                "evalue": report.evalue,
                "traceback": report.traceback,
            }),
            parent,
        );
    }

    /// Ask front-ends to clear the output area for a request.
    pub fn clear_output(&self, wait: bool, parent: &Message) {
        self.broadcast("clear_output", json!({"wait": wait}), Some(parent));
    }

    /// Tell front-ends a comm is gone (e.g. a comm_msg for an unknown id).
    pub fn comm_close(&self, comm_id: &str, parent: &Message) {
        self.broadcast(
            "comm_close",
            json!({"comm_id": comm_id, "data": {}}),
            Some(parent),
        );
    }
}

/// Pump task: drains the broadcast queue onto the PUB socket.
///
/// The pump runs until every publisher handle is dropped. The queue keeps
/// yielding buffered messages after the last sender is gone, so broadcasts
/// enqueued by the final request (its idle status in particular) are sent
/// before the task exits. The runloop drops the context, and with it the
/// last publisher, only after the channel loops have stopped.
pub async fn run_pump(mut socket: PubSocket, mut rx: mpsc::UnboundedReceiver<Message>, signer: Signer) {
    while let Some(message) = rx.recv().await {
        send_broadcast(&mut socket, &message, &signer).await;
    }
    info!("[iopub] pump stopped");
}

async fn send_broadcast(socket: &mut PubSocket, message: &Message, signer: &Signer) {
    debug!("[iopub] {}", message.msg_type());
    let frames = match encode(message, signer) {
        Ok(frames) => frames,
        Err(e) => {
            error!("[iopub] failed to encode {}: {}", message.msg_type(), e);
            return;
        }
    };
    let zmq_message = match zmq_message_from_frames(frames) {
        Ok(zmq_message) => zmq_message,
        Err(e) => {
            error!("[iopub] failed to frame {}: {}", message.msg_type(), e);
            return;
        }
    };
    if let Err(e) = socket.send(zmq_message).await {
        error!("[iopub] send failed: {}", e);
    }
}
