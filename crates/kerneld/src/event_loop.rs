//! Per-channel event loop.
//!
//! One loop task per non-heartbeat channel. Each iteration receives raw
//! frames, authenticates and decodes them, brackets handling in busy/idle
//! status broadcasts, dispatches to the handler table, and flushes captured
//! stdio. Handler failures are contained per-request: they become error
//! broadcasts, never loop terminations. The one exception is interruption,
//! which restarts the loop to preserve liveness after a user-requested
//! cancel.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;

use jupyter_wire::WireError;

use crate::backend::ErrorReport;
use crate::channel::{Channel, ChannelRole};
use crate::context::KernelContext;
use crate::dispatch::DispatchTable;
use crate::error::KernelError;

pub struct EventLoop {
    channel: Channel,
    table: DispatchTable,
    ctx: Arc<KernelContext>,
    shutdown: watch::Receiver<bool>,
}

impl EventLoop {
    pub fn new(channel: Channel, table: DispatchTable, ctx: Arc<KernelContext>) -> Self {
        let shutdown = ctx.shutdown_signal();
        EventLoop {
            channel,
            table,
            ctx,
            shutdown,
        }
    }

    /// Run until the channel closes or shutdown is requested.
    pub async fn run(mut self) {
        let role = self.channel.role;
        info!("[{}] listening", role.as_str());
        loop {
            let frames = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                frames = self.channel.recv() => match frames {
                    Some(frames) => frames,
                    None => {
                        info!("[{}] channel closed", role.as_str());
                        break;
                    }
                },
            };

            let message = match self.channel.decode(&frames, &self.ctx.signer) {
                Ok(message) => message,
                Err(KernelError::Wire(WireError::AuthenticationFailed)) => {
                    // Unauthenticated input is dropped without a reply.
                    warn!("[{}] dropping message with bad signature", role.as_str());
                    continue;
                }
                Err(e) => {
                    warn!("[{}] undecodable message: {}", role.as_str(), e);
                    self.ctx.iopub.error(
                        &ErrorReport::new("FormatError", e.to_string()),
                        None,
                    );
                    continue;
                }
            };

            if self.ctx.session.lock().await.verbose {
                info!("[{}] <- {}", role.as_str(), message.msg_type());
            } else {
                debug!("[{}] <- {}", role.as_str(), message.msg_type());
            }

            self.ctx.iopub.status("busy", Some(&message));
            if role == ChannelRole::Shell {
                self.ctx.session.lock().await.set_current_request(message.clone());
            }

            match self.table.dispatch(&self.ctx, &mut self.channel, &message).await {
                Ok(()) => {}
                Err(KernelError::Interrupted) => {
                    // User-requested cancellation: no error broadcast, the
                    // loop simply resumes listening.
                    info!("[{}] handler interrupted; restarting loop", role.as_str());
                }
                Err(e) => {
                    warn!("[{}] handler for {} failed: {}", role.as_str(), message.msg_type(), e);
                    self.ctx.iopub.error(
                        &ErrorReport::new("HandlerError", e.to_string()),
                        Some(&message),
                    );
                }
            }

            // Flush stdio captured during handling, then close the bracket.
            for (stream, text) in self.ctx.stdio.drain() {
                self.ctx.iopub.stream(stream, &text, &message);
            }
            self.ctx.iopub.status("idle", Some(&message));

            if role == ChannelRole::Shell {
                self.ctx.session.lock().await.clear_current_request();
            }
        }
        info!("[{}] loop stopped", role.as_str());
    }
}
