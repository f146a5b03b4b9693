//! Handlers for everything other than `execute_request`.

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use serde_json::json;

use jupyter_wire::{reply_type_for, Message, PROTOCOL_VERSION};

use crate::channel::Channel;
use crate::context::KernelContext;
use crate::error::Result;

/// Fallback for unregistered message types: an explicit unsupported-type
/// error reply, never a silent drop.
pub fn handle_unknown<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        warn!(
            "[{}] unsupported message type: {}",
            channel.role.as_str(),
            request.msg_type()
        );
        let reply = ctx.reply_to(
            request,
            &reply_type_for(request.msg_type()),
            json!({
                "status": "error",
                "ename": "UnsupportedMessageType",
                "evalue": format!("unsupported message type: {}", request.msg_type()),
                "traceback": [],
            }),
        );
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

pub fn handle_kernel_info<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let info = ctx.backend.language_info();
        let reply = ctx.reply_to(
            request,
            "kernel_info_reply",
            json!({
                "status": "ok",
                "protocol_version": PROTOCOL_VERSION,
                "implementation": "kerneld",
                "implementation_version": env!("CARGO_PKG_VERSION"),
                "language_info": {
                    "name": info.name,
                    "version": info.version,
                    "mimetype": info.mimetype,
                    "file_extension": info.file_extension,
                },
                "banner": ctx.backend.banner(),
                "help_links": [],
            }),
        );
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

pub fn handle_complete<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let code = request.content["code"].as_str().unwrap_or_default();
        let cursor_pos = request.content["cursor_pos"].as_u64().unwrap_or(0) as usize;
        let result = ctx.backend.complete(code, cursor_pos);
        let reply = ctx.reply_to(
            request,
            "complete_reply",
            json!({
                "status": "ok",
                "matches": result.matches,
                "cursor_start": result.cursor_start,
                "cursor_end": result.cursor_end,
                "metadata": {},
            }),
        );
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

pub fn handle_inspect<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let code = request.content["code"].as_str().unwrap_or_default();
        let cursor_pos = request.content["cursor_pos"].as_u64().unwrap_or(0) as usize;
        let result = ctx.backend.inspect(code, cursor_pos);
        let reply = ctx.reply_to(
            request,
            "inspect_reply",
            json!({
                "status": "ok",
                "found": result.found,
                "data": result.data,
                "metadata": {},
            }),
        );
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

pub fn handle_is_complete<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let code = request.content["code"].as_str().unwrap_or_default();
        let status = ctx.backend.is_complete(code);
        let reply = ctx.reply_to(
            request,
            "is_complete_reply",
            json!({"status": status.as_str()}),
        );
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

/// `history_request`: report input history as `(session, line, input)`
/// triples in index order.
pub fn handle_history<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let session = ctx.session.lock().await;
        let history: Vec<_> = session
            .input_history()
            .map(|(index, code)| json!([0, index, code]))
            .collect();
        drop(session);
        let reply = ctx.reply_to(
            request,
            "history_reply",
            json!({"status": "ok", "history": history}),
        );
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

pub fn handle_comm_open<'a>(
    ctx: &'a KernelContext,
    _channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let comm_id = request.content["comm_id"].as_str().unwrap_or_default();
        let target_name = request.content["target_name"].as_str().unwrap_or_default();
        if comm_id.is_empty() || target_name.is_empty() {
            warn!("[shell] comm_open missing comm_id or target_name; ignoring");
            return Ok(());
        }
        debug!("[shell] comm_open {} target {}", comm_id, target_name);
        ctx.comms.open(comm_id, target_name);
        Ok(())
    }
    .boxed()
}

/// `comm_msg` for an unknown comm id is answered with a `comm_close`
/// broadcast so the front-end can tear down its side.
pub fn handle_comm_msg<'a>(
    ctx: &'a KernelContext,
    _channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let comm_id = request.content["comm_id"].as_str().unwrap_or_default();
        if !ctx.comms.is_open(comm_id) {
            warn!("[shell] comm_msg for unknown comm {}", comm_id);
            ctx.iopub.comm_close(comm_id, request);
        }
        Ok(())
    }
    .boxed()
}

pub fn handle_comm_close<'a>(
    ctx: &'a KernelContext,
    _channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let comm_id = request.content["comm_id"].as_str().unwrap_or_default();
        if !ctx.comms.close(comm_id) {
            debug!("[shell] comm_close for unknown comm {}", comm_id);
        }
        Ok(())
    }
    .boxed()
}

/// Reply first, then ask every loop to stop; the runloop joins them before
/// the process exits.
pub fn handle_shutdown<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let restart = request.content["restart"].as_bool().unwrap_or(false);
        info!("[{}] shutdown requested (restart={})", channel.role.as_str(), restart);
        let reply = ctx.reply_to(
            request,
            "shutdown_reply",
            json!({"status": "ok", "restart": restart}),
        );
        channel.send_message(&reply, &ctx.signer).await?;
        ctx.request_shutdown();
        Ok(())
    }
    .boxed()
}

/// `interrupt_request` on the control channel: signal the in-flight
/// execution, if any, and acknowledge.
pub fn handle_interrupt<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        info!("[control] interrupt requested");
        ctx.interrupt_execution();
        let reply = ctx.reply_to(request, "interrupt_reply", json!({"status": "ok"}));
        channel.send_message(&reply, &ctx.signer).await
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::CalcBackend;
    use crate::channel::{ChannelRole, MemoryTransport};
    use crate::iopub::IopubPublisher;
    use jupyter_wire::Signer;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_kernel() -> (
        Arc<KernelContext>,
        UnboundedReceiver<Message>,
        Channel,
        Channel,
    ) {
        let (iopub, iopub_rx) = IopubPublisher::new("kernel-sess", "kernel");
        let ctx = Arc::new(KernelContext::new(
            "kernel-sess",
            "kernel",
            Signer::unsigned(),
            iopub,
            Box::new(CalcBackend::new()),
        ));
        let (client, server) = MemoryTransport::pair();
        (
            ctx,
            iopub_rx,
            Channel::new(ChannelRole::Shell, Box::new(client)),
            Channel::new(ChannelRole::Shell, Box::new(server)),
        )
    }

    async fn reply_of(client: &mut Channel, signer: &Signer) -> Message {
        let frames = client.recv().await.unwrap();
        client.decode(&frames, signer).unwrap()
    }

    #[tokio::test]
    async fn test_kernel_info_reply() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new("kernel_info_request", "client", "user", json!({}));
        handle_kernel_info(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.msg_type(), "kernel_info_reply");
        assert_eq!(reply.content["status"], "ok");
        assert_eq!(reply.content["protocol_version"], PROTOCOL_VERSION);
        assert_eq!(reply.content["language_info"]["name"], "calc");
        assert!(reply.content["banner"].as_str().unwrap().contains("calc"));
    }

    #[tokio::test]
    async fn test_unknown_type_gets_error_reply() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new("bogus_request", "client", "user", json!({}));
        handle_unknown(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.msg_type(), "bogus_reply");
        assert_eq!(reply.content["status"], "error");
        assert_eq!(reply.content["ename"], "UnsupportedMessageType");
    }

    #[tokio::test]
    async fn test_complete_reply() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new(
            "complete_request",
            "client",
            "user",
            json!({"code": "sl", "cursor_pos": 2}),
        );
        handle_complete(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "ok");
        assert_eq!(reply.content["matches"][0], "sleep");
        assert_eq!(reply.content["cursor_end"], 2);
    }

    #[tokio::test]
    async fn test_inspect_reply() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new(
            "inspect_request",
            "client",
            "user",
            json!({"code": "print", "cursor_pos": 5}),
        );
        handle_inspect(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["found"], true);
    }

    #[tokio::test]
    async fn test_is_complete_reply() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new(
            "is_complete_request",
            "client",
            "user",
            json!({"code": "(1+"}),
        );
        handle_is_complete(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "incomplete");
    }

    #[tokio::test]
    async fn test_history_reply_lists_inputs_in_order() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        {
            let mut session = ctx.session.lock().await;
            for code in ["1+1", "2+2"] {
                let n = session.next_execution_count();
                session.record_input(n, code);
            }
        }
        let request = Message::new("history_request", "client", "user", json!({}));
        handle_history(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        let history = reply.content["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0][1], 1);
        assert_eq!(history[0][2], "1+1");
        assert_eq!(history[1][2], "2+2");
    }

    #[tokio::test]
    async fn test_comm_lifecycle() {
        let (ctx, mut iopub_rx, _client, mut server) = test_kernel();
        let open = Message::new(
            "comm_open",
            "client",
            "user",
            json!({"comm_id": "c1", "target_name": "test.target", "data": {}}),
        );
        handle_comm_open(&ctx, &mut server, &open).await.unwrap();
        assert!(ctx.comms.is_open("c1"));

        // Known comm: no broadcast.
        let msg = Message::new("comm_msg", "client", "user", json!({"comm_id": "c1", "data": {}}));
        handle_comm_msg(&ctx, &mut server, &msg).await.unwrap();
        assert!(iopub_rx.try_recv().is_err());

        // Unknown comm: comm_close broadcast.
        let unknown = Message::new("comm_msg", "client", "user", json!({"comm_id": "nope", "data": {}}));
        handle_comm_msg(&ctx, &mut server, &unknown).await.unwrap();
        let broadcast = iopub_rx.recv().await.unwrap();
        assert_eq!(broadcast.msg_type(), "comm_close");
        assert_eq!(broadcast.content["comm_id"], "nope");

        let close = Message::new("comm_close", "client", "user", json!({"comm_id": "c1"}));
        handle_comm_close(&ctx, &mut server, &close).await.unwrap();
        assert!(!ctx.comms.is_open("c1"));
    }

    #[tokio::test]
    async fn test_shutdown_replies_then_signals() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new(
            "shutdown_request",
            "client",
            "user",
            json!({"restart": false}),
        );
        handle_shutdown(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.msg_type(), "shutdown_reply");
        assert_eq!(reply.content["restart"], false);
        assert!(ctx.shutdown_requested());
    }

    #[tokio::test]
    async fn test_interrupt_acknowledges() {
        let (ctx, _rx, mut client, mut server) = test_kernel();
        let request = Message::new("interrupt_request", "client", "user", json!({}));
        handle_interrupt(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.msg_type(), "interrupt_reply");
        assert_eq!(reply.content["status"], "ok");
    }
}
