// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call stack and execution-scoped context.
//!
//! The active [`CallStack`] and call attributes travel in a tokio task-local.
//! Every traced call runs its body inside [`run_in_context`], which installs
//! the callee's context on each poll of the body. Concurrent branches polled
//! by the same task (`join!`, `join_all`, `select!`) therefore each see their
//! own stack, not each other's.
//!
//! Task-locals do not cross `tokio::spawn`; use [`spawn_with_context`] to
//! carry the context into a spawned task.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::summary::{merge_summaries, Summary};

tokio::task_local! {
    static CONTEXT: ExecutionContext;
}

/// Generate a call or trace id. Ids are UUIDv7, so they sort by creation time.
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

/// One in-flight call.
#[derive(Debug)]
pub struct CallStackEntry {
    pub call_id: String,
    pub trace_id: String,
    child_summary: Mutex<Summary>,
}

impl CallStackEntry {
    fn new(call_id: String, trace_id: String) -> Self {
        Self {
            call_id,
            trace_id,
            child_summary: Mutex::new(Summary::new()),
        }
    }

    /// Summaries accumulated from finished children so far.
    pub fn child_summary(&self) -> Summary {
        match self.child_summary.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Fold a finished child's summary into this frame's accumulator.
    pub fn merge_child_summary(&self, summary: &Summary) {
        let mut guard = match self.child_summary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = merge_summaries(summary, &guard);
    }
}

/// Result of [`CallStack::push_new_call`].
#[derive(Debug, Clone)]
pub struct PushedCall {
    pub current_call: Arc<CallStackEntry>,
    pub parent_call: Option<Arc<CallStackEntry>>,
    pub new_stack: CallStack,
}

/// Ordered call frames, outermost first.
///
/// Pushing never mutates an existing stack, so a stack can be shared by any
/// number of concurrent branches.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<Arc<CallStackEntry>>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top frame, if any.
    pub fn peek(&self) -> Option<&Arc<CallStackEntry>> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Create a frame for a new call on top of this stack.
    ///
    /// The trace id is inherited from the top frame when there is one.
    pub fn push_new_call(&self) -> PushedCall {
        let parent_call = self.peek().cloned();
        let trace_id = parent_call
            .as_ref()
            .map(|p| p.trace_id.clone())
            .unwrap_or_else(generate_id);
        let current_call = Arc::new(CallStackEntry::new(generate_id(), trace_id));

        let mut frames = self.frames.clone();
        frames.push(current_call.clone());

        PushedCall {
            current_call,
            parent_call,
            new_stack: CallStack { frames },
        }
    }
}

/// Ambient state for the code currently executing.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub stack: CallStack,
    pub attributes: Arc<Map<String, Value>>,
}

impl ExecutionContext {
    /// Same attributes, different stack.
    pub fn with_stack(&self, stack: CallStack) -> Self {
        Self {
            stack,
            attributes: self.attributes.clone(),
        }
    }

    /// Attributes merged shallowly; `attributes` wins on key conflicts.
    pub fn with_attributes(&self, attributes: Map<String, Value>) -> Self {
        let mut merged = (*self.attributes).clone();
        for (key, value) in attributes {
            merged.insert(key, value);
        }
        Self {
            stack: self.stack.clone(),
            attributes: Arc::new(merged),
        }
    }
}

/// Snapshot of the ambient context (empty outside any traced scope).
pub fn current_context() -> ExecutionContext {
    CONTEXT.try_with(Clone::clone).unwrap_or_default()
}

/// The innermost call currently executing, if any.
pub fn current_call() -> Option<Arc<CallStackEntry>> {
    CONTEXT
        .try_with(|context| context.stack.peek().cloned())
        .ok()
        .flatten()
}

/// Run a future with `context` as its ambient context.
pub async fn run_in_context<F: Future>(context: ExecutionContext, future: F) -> F::Output {
    CONTEXT.scope(context, future).await
}

/// Run a closure with `context` as its ambient context.
pub fn sync_in_context<R>(context: ExecutionContext, f: impl FnOnce() -> R) -> R {
    CONTEXT.sync_scope(context, f)
}

/// Run `future` with extra attributes attached to every call created inside it.
///
/// Attributes merge shallowly with any enclosing ones; the innermost value
/// wins on conflicts.
pub async fn with_attributes<F: Future>(attributes: Map<String, Value>, future: F) -> F::Output {
    let context = current_context().with_attributes(attributes);
    run_in_context(context, future).await
}

/// `tokio::spawn` that carries the current context into the new task.
pub fn spawn_with_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let context = current_context();
    tokio::spawn(CONTEXT.scope(context, future))
}
