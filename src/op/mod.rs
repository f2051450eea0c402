// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Traced operations.
//!
//! [`op`] wraps an async function so that every invocation is recorded as a
//! call: its inputs, output or error, timing, parent call, and a summary
//! rolled up from nested calls. Arguments are passed as a tuple (see
//! [`OpArgs`]) and the function returns `Result<T, E>`; the wrapper returns
//! exactly what the function returns.
//!
//! When no client is bound or installed globally, ops run untraced.
//!
//! # Example
//!
//! ```rust,ignore
//! use weave::{op, op_with, OpOptions, ParameterNames};
//!
//! let add = op_with(
//!     |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) },
//!     OpOptions::new()
//!         .name("add")
//!         .parameter_names(ParameterNames::named(["a", "b"])),
//! );
//! assert_eq!(add.call((2, 3)).await, Ok(5));
//! ```

mod stream;

pub use stream::{StreamReducer, TracedStream};

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures_util::Stream;
use tracing::{info_span, warn, Instrument, Span};

use crate::client::{current_client, CallOutcome, StartedCall, WeaveClient};
use crate::context::{current_context, run_in_context, sync_in_context, ExecutionContext, PushedCall};
use crate::summary::{add_request_counts, Summary};
use crate::value::{OpArgs, OpDef, ToWeaveValue, WeaveValue};

/// Set once the "running untraced" warning has been logged.
static UNTRACED_WARNED: AtomicBool = AtomicBool::new(false);

/// Name used when an op has no explicit name and wraps a closure.
pub const ANONYMOUS_OP_NAME: &str = "anonymous";

/// How positional arguments are named in the recorded inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParameterNames {
    /// `arg0`, `arg1`, ...
    #[default]
    Positional,
    /// Names by position; extra arguments fall back to `argN`.
    Named(Vec<String>),
    /// A single map argument is recorded as its entries.
    UseFirstArg,
}

impl ParameterNames {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }
}

/// Computes a call's display name from its named inputs.
pub type DisplayNameFn = Arc<dyn Fn(&CallInputs) -> String + Send + Sync>;

/// Computes a call's own summary from its output.
pub type SummarizeFn = Arc<dyn Fn(&WeaveValue) -> Option<Summary> + Send + Sync>;

/// Options for [`op_with`].
#[derive(Clone, Default)]
pub struct OpOptions {
    name: Option<String>,
    parameter_names: ParameterNames,
    call_display_name: Option<DisplayNameFn>,
    summarize: Option<SummarizeFn>,
    stream_reducer: Option<StreamReducer>,
    client: Option<WeaveClient>,
}

impl OpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parameter_names(mut self, names: ParameterNames) -> Self {
        self.parameter_names = names;
        self
    }

    pub fn call_display_name<G>(mut self, f: G) -> Self
    where
        G: Fn(&CallInputs) -> String + Send + Sync + 'static,
    {
        self.call_display_name = Some(Arc::new(f));
        self
    }

    /// Derive the call's own summary from its output.
    ///
    /// Returning `None` records an empty summary.
    pub fn summarize<G>(mut self, f: G) -> Self
    where
        G: Fn(&WeaveValue) -> Option<Summary> + Send + Sync + 'static,
    {
        self.summarize = Some(Arc::new(f));
        self
    }

    /// Fold streamed items into the output recorded for [`Op::call_stream`].
    pub fn stream_reducer(mut self, reducer: StreamReducer) -> Self {
        self.stream_reducer = Some(reducer);
        self
    }

    /// Record through `client` instead of the global one.
    pub fn client(mut self, client: WeaveClient) -> Self {
        self.client = Some(client);
        self
    }
}

impl fmt::Debug for OpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpOptions")
            .field("name", &self.name)
            .field("parameter_names", &self.parameter_names)
            .field("call_display_name", &self.call_display_name.is_some())
            .field("summarize", &self.summarize.is_some())
            .field("stream_reducer", &self.stream_reducer.is_some())
            .field("client", &self.client)
            .finish()
    }
}

/// Named inputs of one call, in argument order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallInputs {
    entries: Vec<(String, WeaveValue)>,
}

impl CallInputs {
    pub fn get(&self, name: &str) -> Option<&WeaveValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeaveValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn into_vec(self) -> Vec<(String, WeaveValue)> {
        self.entries
    }
}

/// Wrap `func` as a traced op with default options.
pub fn op<F>(func: F) -> Op<F> {
    Op::new(func, OpOptions::default())
}

pub fn op_with<F>(func: F, options: OpOptions) -> Op<F> {
    Op::new(func, options)
}

/// A traced function.
pub struct Op<F> {
    func: F,
    options: OpOptions,
    def: OnceLock<OpDef>,
    /// Definition used by [`Op::call_method`], named after the receiver type.
    bound_def: OnceLock<OpDef>,
}

impl<F> Op<F> {
    pub fn new(func: F, options: OpOptions) -> Self {
        Self {
            func,
            options,
            def: OnceLock::new(),
            bound_def: OnceLock::new(),
        }
    }

    /// The op's name when invoked through [`Op::call`] or [`Op::call_stream`].
    pub fn name(&self) -> &str {
        self.op_def().name()
    }

    pub fn op_def(&self) -> &OpDef {
        self.def.get_or_init(|| self.define(None))
    }

    /// The op's name when bound to a receiver of type `R`.
    pub fn method_name<R>(&self) -> &str {
        self.method_def::<R>().name()
    }

    pub fn method_def<R>(&self) -> &OpDef {
        self.bound_def
            .get_or_init(|| self.define(Some(short_type_name::<R>())))
    }

    pub fn options(&self) -> &OpOptions {
        &self.options
    }

    /// Invoke the op, recording a call.
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        A: OpArgs,
        Fut: Future<Output = Result<T, E>>,
        T: ToWeaveValue,
        E: fmt::Display,
    {
        let Some(client) = self.resolve_client() else {
            self.warn_untraced();
            return (self.func)(args).await;
        };
        let inputs = self.named_inputs(None, args.to_arg_values());
        let call = ActiveCall::begin(client, self.op_def(), &self.options, inputs);
        self.complete(call, || (self.func)(args)).await
    }

    /// Invoke an op bound to a receiver. The receiver is recorded as the
    /// `self` input, and the op is named `Type.function` unless named explicitly.
    pub async fn call_method<R, A, Fut, T, E>(&self, receiver: &Arc<R>, args: A) -> Result<T, E>
    where
        F: Fn(Arc<R>, A) -> Fut,
        R: ToWeaveValue,
        A: OpArgs,
        Fut: Future<Output = Result<T, E>>,
        T: ToWeaveValue,
        E: fmt::Display,
    {
        let Some(client) = self.resolve_client() else {
            self.warn_untraced();
            return (self.func)(receiver.clone(), args).await;
        };
        let def = self.method_def::<R>();
        let inputs = self.named_inputs(Some(receiver.to_weave_value()), args.to_arg_values());
        let call = ActiveCall::begin(client, def, &self.options, inputs);
        self.complete(call, || (self.func)(receiver.clone(), args)).await
    }

    /// Invoke an op that produces a stream.
    ///
    /// The call stays open while the stream is consumed and finishes when it
    /// is exhausted or dropped, with the output folded by the configured
    /// [`StreamReducer`] (by default, the list of items).
    pub async fn call_stream<A, Fut, S, E>(&self, args: A) -> Result<TracedStream<S>, E>
    where
        F: Fn(A) -> Fut,
        A: OpArgs,
        Fut: Future<Output = Result<S, E>>,
        S: Stream,
        S::Item: ToWeaveValue,
        E: fmt::Display,
    {
        let Some(client) = self.resolve_client() else {
            self.warn_untraced();
            return (self.func)(args).await.map(TracedStream::untraced);
        };
        let inputs = self.named_inputs(None, args.to_arg_values());
        let call = ActiveCall::begin(client, self.op_def(), &self.options, inputs);

        match call.run(|| (self.func)(args)).await {
            Ok(stream) => {
                let reducer = self
                    .options
                    .stream_reducer
                    .clone()
                    .unwrap_or_else(StreamReducer::collect);
                Ok(TracedStream::traced(
                    stream,
                    call,
                    reducer,
                    self.options.summarize.clone(),
                ))
            }
            Err(e) => {
                call.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn complete<Fut, T, E>(&self, call: ActiveCall, make_body: impl FnOnce() -> Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: ToWeaveValue,
        E: fmt::Display,
    {
        match call.run(make_body).await {
            Ok(output) => {
                call.succeed(output.to_weave_value(), self.options.summarize.as_ref());
                Ok(output)
            }
            Err(e) => {
                call.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    fn define(&self, receiver: Option<&str>) -> OpDef {
        let name = resolve_op_name(self.options.name.as_deref(), receiver, function_name::<F>());
        OpDef::new(name, type_name::<F>())
    }

    fn resolve_client(&self) -> Option<WeaveClient> {
        self.options.client.clone().or_else(current_client)
    }

    fn warn_untraced(&self) {
        if !UNTRACED_WARNED.swap(true, Ordering::Relaxed) {
            warn!(
                op = %type_name::<F>(),
                "Weave is not initialized; ops run untraced until weave::init is called"
            );
        }
    }

    fn named_inputs(&self, receiver: Option<WeaveValue>, args: Vec<WeaveValue>) -> CallInputs {
        let mut entries = Vec::with_capacity(args.len() + 1);
        if let Some(receiver) = receiver {
            entries.push(("self".to_string(), receiver));
        }

        match &self.options.parameter_names {
            ParameterNames::UseFirstArg if args.len() == 1 => match args.into_iter().next() {
                Some(WeaveValue::Map(map)) => entries.extend(map),
                Some(other) => entries.push(("arg0".to_string(), other)),
                None => {}
            },
            names => {
                for (i, value) in args.into_iter().enumerate() {
                    let name = match names {
                        ParameterNames::Named(named) => named.get(i).cloned(),
                        _ => None,
                    };
                    entries.push((name.unwrap_or_else(|| format!("arg{}", i)), value));
                }
            }
        }
        CallInputs { entries }
    }
}

impl<F> fmt::Debug for Op<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("name", &self.def.get().map(OpDef::name))
            .field("method_name", &self.bound_def.get().map(OpDef::name))
            .field("options", &self.options)
            .finish()
    }
}

/// One call between start and finish.
pub(crate) struct ActiveCall {
    client: WeaveClient,
    pushed: PushedCall,
    started: StartedCall,
    /// Context the body runs in: the caller's, with this call pushed.
    context: ExecutionContext,
    span: Span,
}

impl ActiveCall {
    fn begin(client: WeaveClient, def: &OpDef, options: &OpOptions, inputs: CallInputs) -> Self {
        let caller = current_context();
        let pushed = caller.stack.push_new_call();
        let display_name = options.call_display_name.as_ref().map(|f| f(&inputs));

        let started = client.create_call(
            def,
            &pushed,
            inputs.into_vec(),
            display_name,
            (*caller.attributes).clone(),
        );
        let span = info_span!(
            "op",
            op_name = %def.name(),
            call_id = %pushed.current_call.call_id,
            trace_id = %pushed.current_call.trace_id,
        );

        Self {
            client,
            context: caller.with_stack(pushed.new_stack.clone()),
            pushed,
            started,
            span,
        }
    }

    /// Build and run the body with this call on top of the stack.
    async fn run<Fut: Future>(&self, make_body: impl FnOnce() -> Fut) -> Fut::Output {
        let body = self
            .span
            .in_scope(|| sync_in_context(self.context.clone(), make_body));
        run_in_context(self.context.clone(), body)
            .instrument(self.span.clone())
            .await
    }

    pub(crate) fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn succeed(self, output: WeaveValue, summarize: Option<&SummarizeFn>) {
        let mut own = summarize.and_then(|f| f(&output)).unwrap_or_default();
        add_request_counts(&mut own);
        self.client.finish_call(
            self.started,
            &self.pushed.current_call,
            self.pushed.parent_call.as_ref(),
            CallOutcome::Output(output),
            own,
        );
    }

    /// Record the failure and wait until it is delivered.
    async fn fail(self, message: String) {
        let client = self.client.clone();
        let end = client.finish_call(
            self.started,
            &self.pushed.current_call,
            self.pushed.parent_call.as_ref(),
            CallOutcome::Exception(message),
            Summary::new(),
        );
        if let Err(e) = end.await {
            warn!(error = %e, "Failed to record call exception");
        }
        client.wait_for_batch_processing().await;
    }
}

/// Name an op from its explicit name, its receiver type and its function.
fn resolve_op_name(explicit: Option<&str>, receiver: Option<&str>, function: Option<String>) -> String {
    if let Some(name) = explicit {
        return name.to_string();
    }
    match (receiver, function) {
        (Some(receiver), Some(function)) => format!("{}.{}", receiver, function),
        (None, Some(function)) => function,
        _ => ANONYMOUS_OP_NAME.to_string(),
    }
}

/// The name of a function item type; `None` for closures.
fn function_name<F>() -> Option<String> {
    let full = type_name::<F>();
    if full.contains("{{closure}}") {
        return None;
    }
    last_segment(full).map(str::to_string)
}

fn short_type_name<R>() -> &'static str {
    let full = type_name::<R>();
    last_segment(full).unwrap_or(full)
}

/// Last `::` segment of a type path, ignoring generic arguments.
fn last_segment(path: &str) -> Option<&str> {
    let base = path.split('<').next().unwrap_or(path);
    base.rsplit("::").next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::server::{CallState, InMemoryTraceServer};
    use serde_json::json;

    fn client() -> (WeaveClient, Arc<InMemoryTraceServer>) {
        let server = Arc::new(InMemoryTraceServer::new());
        let client =
            WeaveClient::with_batch_config(server.clone(), "acme/chat", BatchConfig::testing());
        (client, server)
    }

    async fn double(args: (i64,)) -> Result<i64, String> {
        Ok(args.0 * 2)
    }

    struct Model {
        temperature: f64,
    }

    impl ToWeaveValue for Model {
        fn to_weave_value(&self) -> WeaveValue {
            WeaveValue::map([("temperature", self.temperature.to_weave_value())])
        }
    }

    async fn predict(model: Arc<Model>, args: (String,)) -> Result<String, String> {
        Ok(format!("{}@{}", args.0, model.temperature))
    }

    #[test]
    fn test_resolve_op_name() {
        assert_eq!(resolve_op_name(Some("x"), Some("Model"), Some("f".into())), "x");
        assert_eq!(resolve_op_name(None, Some("Model"), Some("f".into())), "Model.f");
        assert_eq!(resolve_op_name(None, None, Some("f".into())), "f");
        assert_eq!(resolve_op_name(None, Some("Model"), None), ANONYMOUS_OP_NAME);
        assert_eq!(resolve_op_name(None, None, None), ANONYMOUS_OP_NAME);
    }

    #[test]
    fn test_function_names() {
        assert_eq!(op(double).name(), "double");
        assert_eq!(op(|_: ()| async { Ok::<_, String>(1) }).name(), ANONYMOUS_OP_NAME);
        assert_eq!(short_type_name::<Model>(), "Model");
        assert_eq!(last_segment("a::b::C<x::Y>"), Some("C"));
    }

    #[test]
    fn test_named_inputs() {
        let named = op_with(double, OpOptions::new().parameter_names(ParameterNames::named(["x"])));
        let inputs = named.named_inputs(None, vec![WeaveValue::from(json!(1)), WeaveValue::from(json!(2))]);
        let names: Vec<&str> = inputs.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["x", "arg1"]);

        let flattened = op_with(double, OpOptions::new().parameter_names(ParameterNames::UseFirstArg));
        let inputs = flattened.named_inputs(
            Some(WeaveValue::Null),
            vec![WeaveValue::from(json!({"query": "q", "k": 3}))],
        );
        let names: Vec<&str> = inputs.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["self", "k", "query"]);
    }

    #[tokio::test]
    async fn test_call_records_inputs_and_output() {
        let (client, server) = client();
        let traced = op_with(
            double,
            OpOptions::new()
                .client(client.clone())
                .parameter_names(ParameterNames::named(["n"])),
        );

        assert_eq!(traced.call((21,)).await, Ok(42));
        client.wait_for_batch_processing().await;

        let calls = server.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].inputs["n"], json!(21));
        assert_eq!(calls[0].output, Some(json!(42)));
        assert!(calls[0].op_name.contains("/op/double:"));
    }

    #[tokio::test]
    async fn test_failed_call_returns_error_after_delivery() {
        let (client, server) = client();
        let failing = op_with(
            |_: ()| async { Err::<i64, _>("boom".to_string()) },
            OpOptions::new().name("fails").client(client.clone()),
        );

        assert_eq!(failing.call(()).await, Err("boom".to_string()));
        // Delivered before the error was returned.
        let calls = server.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].state(), CallState::Failed);
        assert_eq!(calls[0].exception.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_method_call_records_receiver() {
        let (client, server) = client();
        let traced = op_with(predict, OpOptions::new().client(client.clone()));
        let model = Arc::new(Model { temperature: 0.5 });

        let out = traced.call_method(&model, ("hi".to_string(),)).await.unwrap();
        assert_eq!(out, "hi@0.5");
        assert_eq!(traced.method_name::<Model>(), "Model.predict");
        client.wait_for_batch_processing().await;

        let call = &server.calls()[0];
        assert_eq!(call.inputs["self"], json!({"temperature": 0.5}));
        assert_eq!(call.inputs["arg0"], json!("hi"));
    }

    #[tokio::test]
    async fn test_method_name_independent_of_first_use() {
        let (client, server) = client();
        let traced = op_with(predict, OpOptions::new().client(client.clone()));
        assert_eq!(traced.name(), "predict");

        let model = Arc::new(Model { temperature: 0.1 });
        traced.call_method(&model, ("a".to_string(),)).await.unwrap();
        assert_eq!(traced.name(), "predict");
        assert_eq!(traced.method_name::<Model>(), "Model.predict");
        client.wait_for_batch_processing().await;

        let op_name = &server.calls()[0].op_name;
        assert!(op_name.contains("/op/Model.predict:"), "{}", op_name);
    }

    #[tokio::test]
    async fn test_display_name_and_summary() {
        let (client, server) = client();
        let traced = op_with(
            double,
            OpOptions::new()
                .client(client.clone())
                .call_display_name(|inputs| format!("double {}", inputs.get("arg0").and_then(WeaveValue::as_i64).unwrap_or(0)))
                .summarize(|output| {
                    let mut summary = Summary::new();
                    summary.insert("doubled".to_string(), output.to_plain_json());
                    Some(summary)
                }),
        );

        traced.call((4,)).await.unwrap();
        client.wait_for_batch_processing().await;

        let call = &server.calls()[0];
        assert_eq!(call.display_name.as_deref(), Some("double 4"));
        assert_eq!(call.summary.as_ref().unwrap()["doubled"], json!(8));
    }

    #[tokio::test]
    async fn test_untraced_without_client() {
        let traced = op(double);
        assert_eq!(traced.call((1,)).await, Ok(2));
    }
}
