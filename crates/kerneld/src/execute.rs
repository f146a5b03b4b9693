//! The execute engine: services `execute_request`, the kernel's primary
//! workload.
//!
//! Counter and history bookkeeping happen *before* the code runs so that
//! introspection during execution can see its own index; failed executions
//! still consume an index and store an empty output marker. This ordering is
//! a policy choice front-ends rely on, not something the protocol implies.

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use jupyter_wire::Message;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::backend::ExecutionOutcome;
use crate::channel::Channel;
use crate::context::KernelContext;
use crate::error::{KernelError, Result};

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    code: String,
    #[serde(default)]
    silent: bool,
    /// Defaults to the opposite of `silent`.
    store_history: Option<bool>,
}

/// Handler for `execute_request`.
pub fn handle_execute<'a>(
    ctx: &'a KernelContext,
    channel: &'a mut Channel,
    request: &'a Message,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let req: ExecuteRequest = serde_json::from_value(request.content.clone())?;
        let record = !req.silent && req.store_history.unwrap_or(true);

        // Bookkeeping before the run: hooks, then counter and input history.
        let index = {
            let mut session = ctx.session.lock().await;
            session.pre_execute.run_all("pre-execute");
            ctx.stdio.set_enabled(session.capture_stdio);
            if record {
                let index = session.next_execution_count();
                session.record_input(index, &req.code);
                index
            } else {
                session.execution_count()
            }
        };

        debug!("[shell] executing index {} ({} bytes)", index, req.code.len());

        // Race the backend against the interrupt signal. The session lock is
        // not held across the run so the control channel stays responsive.
        let outcome = tokio::select! {
            outcome = ctx.backend.execute(&req.code, &ctx.stdio) => Some(outcome),
            _ = ctx.interrupted() => None,
        };

        // Broadcasts correlate to the current shell request; fall back to the
        // message we were invoked with if the slot is unset (e.g. in tests).
        let session = ctx.session.lock().await;
        let parent = session.current_request().cloned().unwrap_or_else(|| request.clone());
        drop(session);

        match outcome {
            None => {
                info!("[shell] execution {} interrupted by user", index);
                {
                    let mut session = ctx.session.lock().await;
                    if record {
                        session.record_output(index, None);
                    }
                    // Payloads never outlive the execution that queued them.
                    session.drain_payloads();
                }
                let reply = ctx.reply_to(
                    request,
                    "execute_reply",
                    json!({"status": "aborted", "execution_count": index}),
                );
                channel.send_message(&reply, &ctx.signer).await?;
                // Distinguished from a fault: the loop restarts, no error
                // broadcast is published.
                Err(KernelError::Interrupted)
            }
            Some(ExecutionOutcome::Success(success)) => {
                let payloads = {
                    let mut session = ctx.session.lock().await;
                    if record {
                        session.record_output(index, success.data.clone());
                    }
                    for payload in success.payloads {
                        session.push_payload(payload);
                    }
                    if let Some(data) = &success.data {
                        ctx.iopub.execute_result(index, data.clone(), &parent);
                    }
                    session.post_execute.run_all("post-execute");
                    session.drain_payloads()
                };
                let reply = ctx.reply_to(
                    request,
                    "execute_reply",
                    json!({
                        "status": "ok",
                        "execution_count": index,
                        "payload": payloads,
                        "user_expressions": {},
                    }),
                );
                channel.send_message(&reply, &ctx.signer).await?;
                Ok(())
            }
            Some(ExecutionOutcome::Failed(report)) => {
                warn!("[shell] execution {} failed: {}: {}", index, report.ename, report.evalue);
                {
                    let mut session = ctx.session.lock().await;
                    session.post_error.run_all("post-error");
                    if record {
                        session.record_output(index, None);
                    }
                    session.drain_payloads();
                }
                ctx.iopub.error(&report, Some(&parent));
                let reply = ctx.reply_to(
                    request,
                    "execute_reply",
                    json!({
                        "status": "error",
                        "execution_count": index,
                        "ename": report.ename,
                        "evalue": report.evalue,
                        "traceback": report.traceback,
                    }),
                );
                channel.send_message(&reply, &ctx.signer).await?;
                Ok(())
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::CalcBackend;
    use crate::channel::{Channel, ChannelRole, MemoryTransport};
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
        let client = Channel::new(ChannelRole::Shell, Box::new(client));
        let server = Channel::new(ChannelRole::Shell, Box::new(server));
        (ctx, iopub_rx, client, server)
    }

    fn execute_request(code: &str) -> Message {
        Message::new(
            "execute_request",
            "client",
            "user",
            json!({"code": code, "silent": false}),
        )
    }

    async fn reply_of(client: &mut Channel, signer: &Signer) -> Message {
        let frames = client.recv().await.unwrap();
        client.decode(&frames, signer).unwrap()
    }

    #[tokio::test]
    async fn test_ok_execution_increments_counter_and_records_history() {
        let (ctx, mut iopub_rx, mut client, mut server) = test_kernel();
        let request = execute_request("1+1");

        handle_execute(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.msg_type(), "execute_reply");
        assert_eq!(reply.content["status"], "ok");
        assert_eq!(reply.content["execution_count"], 1);
        assert_eq!(reply.parent_header.as_ref().unwrap(), &request.header);

        let result = iopub_rx.recv().await.unwrap();
        assert_eq!(result.msg_type(), "execute_result");
        assert_eq!(result.content["data"]["text/plain"], "2");

        let session = ctx.session.lock().await;
        assert_eq!(session.input(1), Some("1+1"));
        assert!(session.output(1).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_execution_consumes_index_and_broadcasts_error() {
        let (ctx, mut iopub_rx, mut client, mut server) = test_kernel();

        handle_execute(&ctx, &mut server, &execute_request("1/0"))
            .await
            .unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "error");
        assert_eq!(reply.content["execution_count"], 1);
        assert_eq!(reply.content["ename"], "DivideError");

        let broadcast = iopub_rx.recv().await.unwrap();
        assert_eq!(broadcast.msg_type(), "error");
        assert_eq!(broadcast.content["ename"], "DivideError");

        // Index consumed, empty marker stored.
        let session = ctx.session.lock().await;
        assert_eq!(session.execution_count(), 1);
        assert_eq!(session.output(1), Some(&None));
    }

    #[tokio::test]
    async fn test_silent_execution_skips_counter_and_result() {
        let (ctx, mut iopub_rx, mut client, mut server) = test_kernel();
        let request = Message::new(
            "execute_request",
            "client",
            "user",
            json!({"code": "5*5", "silent": true}),
        );

        handle_execute(&ctx, &mut server, &request).await.unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "ok");
        assert_eq!(reply.content["execution_count"], 0);

        let session = ctx.session.lock().await;
        assert_eq!(session.execution_count(), 0);
        assert_eq!(session.history_len(), 0);
        drop(session);

        // No execute_result broadcast for silent requests.
        assert!(iopub_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_counter_monotonic_across_requests() {
        let (ctx, _iopub_rx, mut client, mut server) = test_kernel();
        for expected in 1..=3 {
            handle_execute(&ctx, &mut server, &execute_request("1"))
                .await
                .unwrap();
            let reply = reply_of(&mut client, &ctx.signer).await;
            assert_eq!(reply.content["execution_count"], expected);
        }
    }

    #[tokio::test]
    async fn test_payloads_drained_into_reply() {
        let (ctx, _iopub_rx, mut client, mut server) = test_kernel();
        ctx.session
            .lock()
            .await
            .push_payload(json!({"source": "set_next_input", "text": "x = 1"}));

        handle_execute(&ctx, &mut server, &execute_request("2"))
            .await
            .unwrap();

        let reply = reply_of(&mut client, &ctx.signer).await;
        let payloads = reply.content["payload"].as_array().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["source"], "set_next_input");

        // Queue cleared for the next execution.
        handle_execute(&ctx, &mut server, &execute_request("3"))
            .await
            .unwrap();
        let reply = reply_of(&mut client, &ctx.signer).await;
        assert!(reply.content["payload"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payload_queued_during_failed_execution_is_discarded() {
        let (ctx, _iopub_rx, mut client, mut server) = test_kernel();
        ctx.session
            .lock()
            .await
            .push_payload(json!({"source": "set_next_input", "text": "queued"}));

        handle_execute(&ctx, &mut server, &execute_request("1/0"))
            .await
            .unwrap();
        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "error");

        // The stale payload must not leak into the next reply.
        handle_execute(&ctx, &mut server, &execute_request("2+2"))
            .await
            .unwrap();
        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "ok");
        assert!(reply.content["payload"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hook_chains_run_in_order() {
        use std::sync::{Arc as StdArc, Mutex};
        let (ctx, _iopub_rx, _client, mut server) = test_kernel();
        let order = StdArc::new(Mutex::new(Vec::new()));
        {
            let mut session = ctx.session.lock().await;
            for name in ["pre-1", "pre-2"] {
                let order = order.clone();
                session
                    .pre_execute
                    .register(Box::new(move || order.lock().unwrap().push(name)));
            }
            let order_post = order.clone();
            session
                .post_execute
                .register(Box::new(move || order_post.lock().unwrap().push("post")));
            let order_err = order.clone();
            session
                .post_error
                .register(Box::new(move || order_err.lock().unwrap().push("err")));
        }

        handle_execute(&ctx, &mut server, &execute_request("1"))
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["pre-1", "pre-2", "post"]);

        order.lock().unwrap().clear();
        handle_execute(&ctx, &mut server, &execute_request("1/0"))
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["pre-1", "pre-2", "err"]);
    }

    #[tokio::test]
    async fn test_interrupt_aborts_with_distinguished_status() {
        let (ctx, mut iopub_rx, mut client, mut server) = test_kernel();
        ctx.session
            .lock()
            .await
            .push_payload(json!({"source": "page", "data": {}}));
        let ctx_clone = ctx.clone();

        let handle = tokio::spawn(async move {
            let request = execute_request("sleep(30000)");
            let result = handle_execute(&ctx_clone, &mut server, &request).await;
            (result, server)
        });

        // Let the execution reach the backend, then interrupt it.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        ctx.interrupt_execution();

        let (result, mut server) = handle.await.unwrap();
        assert!(matches!(result, Err(KernelError::Interrupted)));

        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["status"], "aborted");

        // No error broadcast for a user-requested interruption.
        assert!(iopub_rx.try_recv().is_err());

        // The index was consumed with an empty output marker, and the
        // payload queue was cleared.
        {
            let session = ctx.session.lock().await;
            assert_eq!(session.output(1), Some(&None));
        }
        handle_execute(&ctx, &mut server, &execute_request("3*3"))
            .await
            .unwrap();
        let reply = reply_of(&mut client, &ctx.signer).await;
        assert_eq!(reply.content["execution_count"], 2);
        assert!(reply.content["payload"].as_array().unwrap().is_empty());
    }
}
