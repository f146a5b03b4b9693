//! Heartbeat channel: echo frames back unmodified until the socket closes.
//!
//! No parsing, no authentication. Front-ends use the echo to prove the
//! kernel process is alive.

use log::{info, warn};
use tokio::sync::watch;
use zeromq::{RepSocket, SocketRecv, SocketSend};

/// Run the echo loop until shutdown or a socket error.
pub async fn run_heartbeat(mut socket: RepSocket, mut shutdown: watch::Receiver<bool>) {
    info!("[heartbeat] listening");
    loop {
        let message = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            message = socket.recv() => match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("[heartbeat] receive failed, closing: {}", e);
                    break;
                }
            },
        };
        if let Err(e) = socket.send(message).await {
            warn!("[heartbeat] echo failed, closing: {}", e);
            break;
        }
    }
    info!("[heartbeat] stopped");
}
