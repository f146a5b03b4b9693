//! kerneld - a Jupyter kernel runtime.
//!
//! This crate implements the protocol/runtime core of a Jupyter kernel: one
//! event-loop task per channel, a static dispatch table from message type to
//! handler, an execute engine that serializes code execution against a single
//! backend, and a publisher task feeding the iopub channel.
//!
//! The language being executed is pluggable behind [`backend::ExecutionBackend`];
//! [`calc::CalcBackend`] ships as the built-in arithmetic backend.

pub mod backend;
pub mod calc;
pub mod channel;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod execute;
pub mod handlers;
pub mod heartbeat;
pub mod iopub;
pub mod runloop;
pub mod session;

pub use context::KernelContext;
pub use error::{KernelError, Result};
pub use runloop::Kernel;
