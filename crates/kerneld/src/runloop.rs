//! Top-level runloop: binds the five sockets, starts one task per channel,
//! and tears everything down on shutdown.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use log::info;
use uuid::Uuid;
use zeromq::{PubSocket, RepSocket, RouterSocket, Socket};

use jupyter_wire::{ConnectionInfo, Signer};

use crate::backend::ExecutionBackend;
use crate::channel::{Channel, ChannelRole, ZmqTransport};
use crate::context::KernelContext;
use crate::dispatch::{control_table, shell_table, stdin_table};
use crate::event_loop::EventLoop;
use crate::heartbeat::run_heartbeat;
use crate::iopub::{run_pump, IopubPublisher};

/// The kernel process: owns channel lifecycles and the shared context.
pub struct Kernel {
    connection: ConnectionInfo,
    backend: Box<dyn ExecutionBackend>,
    verbose: bool,
}

impl Kernel {
    pub fn new(connection: ConnectionInfo, backend: Box<dyn ExecutionBackend>) -> Self {
        Kernel {
            connection,
            backend,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn bind_router(&self, role: ChannelRole, port: u16) -> Result<RouterSocket> {
        let endpoint = self.connection.endpoint(port);
        let mut socket = RouterSocket::new();
        socket
            .bind(&endpoint)
            .await
            .with_context(|| format!("failed to bind {} socket to {}", role.as_str(), endpoint))?;
        info!("[runloop] {} bound to {}", role.as_str(), endpoint);
        Ok(socket)
    }

    /// Bind every channel, run until shutdown, and join all loop tasks
    /// before returning so no in-flight reply is dropped mid-write.
    pub async fn run(self) -> Result<()> {
        let signer = Signer::new(&self.connection.signature_scheme, &self.connection.key)?;
        let session_id = Uuid::new_v4().to_string();
        let username = "kernel".to_owned();

        let shell_socket = self.bind_router(ChannelRole::Shell, self.connection.shell_port).await?;
        let control_socket = self
            .bind_router(ChannelRole::Control, self.connection.control_port)
            .await?;
        let stdin_socket = self.bind_router(ChannelRole::Stdin, self.connection.stdin_port).await?;

        let iopub_endpoint = self.connection.endpoint(self.connection.iopub_port);
        let mut iopub_socket = PubSocket::new();
        iopub_socket
            .bind(&iopub_endpoint)
            .await
            .with_context(|| format!("failed to bind iopub socket to {}", iopub_endpoint))?;
        info!("[runloop] iopub bound to {}", iopub_endpoint);

        let hb_endpoint = self.connection.endpoint(self.connection.hb_port);
        let mut hb_socket = RepSocket::new();
        hb_socket
            .bind(&hb_endpoint)
            .await
            .with_context(|| format!("failed to bind heartbeat socket to {}", hb_endpoint))?;
        info!("[runloop] heartbeat bound to {}", hb_endpoint);

        let (iopub, iopub_rx) = IopubPublisher::new(&session_id, &username);
        let ctx = Arc::new(KernelContext::new(
            &session_id,
            &username,
            signer.clone(),
            iopub,
            self.backend,
        ));
        ctx.session.lock().await.verbose = self.verbose;

        // Announce liveness before any request arrives.
        ctx.iopub.status("starting", None);

        let pump = tokio::spawn(run_pump(iopub_socket, iopub_rx, signer));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_heartbeat(hb_socket, ctx.shutdown_signal())));

        for (role, socket, table) in [
            (ChannelRole::Shell, shell_socket, shell_table()),
            (ChannelRole::Control, control_socket, control_table()),
            (ChannelRole::Stdin, stdin_socket, stdin_table()),
        ] {
            let channel = Channel::new(role, Box::new(ZmqTransport::new(role, socket)));
            let event_loop = EventLoop::new(channel, table, ctx.clone());
            tasks.push(tokio::spawn(event_loop.run()));
        }

        info!("[runloop] kernel ready (session {})", session_id);

        // Wait for a shutdown_request handler to flip the signal.
        let mut shutdown = ctx.shutdown_signal();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("[runloop] shutting down; waiting for channel loops");
        for task in tasks {
            // A panicked loop task is already logged by the runtime; nothing
            // useful left to do with it during teardown.
            let _ = task.await;
        }

        // Dropping the context drops the last publisher handle; the pump
        // drains the remaining broadcasts and exits.
        drop(ctx);
        let _ = pump.await;
        info!("[runloop] shutdown complete");
        Ok(())
    }
}
