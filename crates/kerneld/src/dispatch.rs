//! Static dispatch from message type to handler.
//!
//! One table is built per channel role at startup. Lookup misses route to an
//! explicit unknown-type handler that replies with an unsupported-type
//! error rather than silently dropping the message.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use jupyter_wire::Message;

use crate::channel::Channel;
use crate::context::KernelContext;
use crate::error::{KernelError, Result};
use crate::execute::handle_execute;
use crate::handlers;

/// A message handler: borrows the context and the channel the request
/// arrived on for the duration of one request.
pub type HandlerFn =
    for<'a> fn(&'a KernelContext, &'a mut Channel, &'a Message) -> BoxFuture<'a, Result<()>>;

/// Mapping from message-type tag to handler, with a fallback.
pub struct DispatchTable {
    handlers: HashMap<&'static str, HandlerFn>,
    fallback: HandlerFn,
}

impl DispatchTable {
    pub fn new(fallback: HandlerFn) -> Self {
        DispatchTable {
            handlers: HashMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, msg_type: &'static str, handler: HandlerFn) {
        self.handlers.insert(msg_type, handler);
    }

    /// Look up the handler for a type tag, falling back for unknown types.
    pub fn resolve(&self, msg_type: &str) -> HandlerFn {
        self.handlers.get(msg_type).copied().unwrap_or(self.fallback)
    }

    pub fn contains(&self, msg_type: &str) -> bool {
        self.handlers.contains_key(msg_type)
    }

    /// Dispatch one decoded message to its handler.
    ///
    /// A panicking handler is caught here and surfaced as an ordinary
    /// handler error, so one bad request can never kill the channel loop.
    pub async fn dispatch(
        &self,
        ctx: &KernelContext,
        channel: &mut Channel,
        message: &Message,
    ) -> Result<()> {
        let handler = self.resolve(message.msg_type());
        match AssertUnwindSafe(handler(ctx, channel, message))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(KernelError::Handler(format!(
                "handler for {} panicked",
                message.msg_type()
            ))),
        }
    }
}

/// Handler table for the shell (requests) channel.
pub fn shell_table() -> DispatchTable {
    let mut table = DispatchTable::new(handlers::handle_unknown);
    table.insert("kernel_info_request", handlers::handle_kernel_info);
    table.insert("execute_request", handle_execute);
    table.insert("complete_request", handlers::handle_complete);
    table.insert("inspect_request", handlers::handle_inspect);
    table.insert("is_complete_request", handlers::handle_is_complete);
    table.insert("history_request", handlers::handle_history);
    table.insert("comm_open", handlers::handle_comm_open);
    table.insert("comm_msg", handlers::handle_comm_msg);
    table.insert("comm_close", handlers::handle_comm_close);
    table.insert("shutdown_request", handlers::handle_shutdown);
    table
}

/// Handler table for the control channel.
pub fn control_table() -> DispatchTable {
    let mut table = DispatchTable::new(handlers::handle_unknown);
    table.insert("kernel_info_request", handlers::handle_kernel_info);
    table.insert("interrupt_request", handlers::handle_interrupt);
    table.insert("shutdown_request", handlers::handle_shutdown);
    table
}

/// Handler table for the stdin channel. The kernel initiates stdin traffic;
/// anything unsolicited gets the unknown-type reply.
pub fn stdin_table() -> DispatchTable {
    DispatchTable::new(handlers::handle_unknown)
}
