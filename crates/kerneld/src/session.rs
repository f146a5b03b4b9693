//! Process-wide session state.
//!
//! One [`SessionState`] exists per kernel process, owned by the runloop and
//! mutated only from the shell-channel task during the lifetime of one
//! execute request (the control loop reads it for history and shutdown). It
//! holds the execution counter, input/output history, the hook registries,
//! the reply-payload queue, and the current-request slot.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{debug, error};
use serde_json::Value;

use jupyter_wire::Message;

/// A zero-argument callable run at a defined point in the execution
/// lifecycle.
pub type Hook = Box<dyn Fn() + Send>;

/// Stable handle returned by [`HookRegistry::register`], used to remove a
/// hook without relying on callable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookToken(u64);

/// Ordered registry of lifecycle hooks.
///
/// Hooks run in insertion order. Unregistering removes the *last* entry with
/// the matching token, mirroring pop-last-match semantics.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<(HookToken, Hook)>,
    next_token: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Hook) -> HookToken {
        let token = HookToken(self.next_token);
        self.next_token += 1;
        self.hooks.push((token, hook));
        token
    }

    /// Remove the last hook registered under `token`. Returns false when no
    /// entry matches.
    pub fn unregister(&mut self, token: HookToken) -> bool {
        match self.hooks.iter().rposition(|(t, _)| *t == token) {
            Some(index) => {
                self.hooks.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in insertion order. Hooks are best-effort
    /// instrumentation: a panicking hook is logged and skipped, never
    /// allowed to fail the execution path that triggered it.
    pub fn run_all(&self, stage: &str) {
        for (token, hook) in &self.hooks {
            if catch_unwind(AssertUnwindSafe(hook)).is_err() {
                error!("[session] {} hook {:?} panicked; continuing", stage, token);
            }
        }
    }
}

/// Mutable kernel session state.
pub struct SessionState {
    execution_count: usize,
    input_history: BTreeMap<usize, String>,
    output_history: BTreeMap<usize, Option<Value>>,
    /// Rendering of the most recent result; cleared by a full history clear.
    last_result: Option<Value>,

    pub pre_execute: HookRegistry,
    pub post_execute: HookRegistry,
    pub post_error: HookRegistry,

    payloads: Vec<Value>,
    current_request: Option<Message>,

    /// Extra wire/status logging when set.
    pub verbose: bool,
    /// Whether backend stdio writes are captured and published as streams.
    pub capture_stdio: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            execution_count: 0,
            input_history: BTreeMap::new(),
            output_history: BTreeMap::new(),
            last_result: None,
            pre_execute: HookRegistry::new(),
            post_execute: HookRegistry::new(),
            post_error: HookRegistry::new(),
            payloads: Vec::new(),
            current_request: None,
            verbose: false,
            capture_stdio: true,
        }
    }

    /// Current execution counter value.
    pub fn execution_count(&self) -> usize {
        self.execution_count
    }

    /// Advance the counter for a new top-level execution and return the new
    /// index. Called exactly once per counted execute request, before the
    /// code runs.
    pub fn next_execution_count(&mut self) -> usize {
        self.execution_count += 1;
        self.execution_count
    }

    /// Record submitted source text under an execution index.
    pub fn record_input(&mut self, index: usize, code: &str) {
        self.input_history.insert(index, code.to_owned());
    }

    /// Record the result rendering (or `None` for no value / failure) under
    /// an execution index.
    pub fn record_output(&mut self, index: usize, result: Option<Value>) {
        if result.is_some() {
            self.last_result = result.clone();
        }
        self.output_history.insert(index, result);
    }

    pub fn input(&self, index: usize) -> Option<&str> {
        self.input_history.get(&index).map(String::as_str)
    }

    pub fn output(&self, index: usize) -> Option<&Option<Value>> {
        self.output_history.get(&index)
    }

    pub fn last_result(&self) -> Option<&Value> {
        self.last_result.as_ref()
    }

    /// Iterate input history in index order.
    pub fn input_history(&self) -> impl Iterator<Item = (usize, &str)> {
        self.input_history.iter().map(|(i, code)| (*i, code.as_str()))
    }

    pub fn history_len(&self) -> usize {
        self.input_history.len()
    }

    /// Clear history entries. `None` clears everything and resets the
    /// last-result binding; `Some(indices)` removes only those entries,
    /// silently ignoring indices that are not present. The counter is never
    /// touched.
    pub fn clear_history(&mut self, indices: Option<&[usize]>) {
        match indices {
            None => {
                debug!("[session] clearing all history");
                self.input_history.clear();
                self.output_history.clear();
                self.last_result = None;
            }
            Some(indices) => {
                for index in indices {
                    self.input_history.remove(index);
                    self.output_history.remove(index);
                }
            }
        }
    }

    /// Queue a front-end-directed payload for the current execution's reply.
    pub fn push_payload(&mut self, payload: Value) {
        self.payloads.push(payload);
    }

    /// Flush the payload queue into a reply, leaving it empty.
    pub fn drain_payloads(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.payloads)
    }

    /// The request currently being serviced on the shell channel, if any.
    pub fn current_request(&self) -> Option<&Message> {
        self.current_request.as_ref()
    }

    pub fn set_current_request(&mut self, request: Message) {
        self.current_request = Some(request);
    }

    pub fn clear_current_request(&mut self) {
        self.current_request = None;
    }
}
