// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streams produced by traced ops.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tracing::{debug, warn};

use super::{ActiveCall, SummarizeFn};
use crate::context::sync_in_context;
use crate::value::{ToWeaveValue, WeaveValue};

type ReduceFn = Arc<dyn Fn(WeaveValue, &WeaveValue) -> WeaveValue + Send + Sync>;

/// Folds the items of a traced stream into the call's recorded output.
#[derive(Clone)]
pub struct StreamReducer {
    initial: WeaveValue,
    reduce: ReduceFn,
}

impl StreamReducer {
    pub fn new<G>(initial: impl ToWeaveValue, reduce: G) -> Self
    where
        G: Fn(WeaveValue, &WeaveValue) -> WeaveValue + Send + Sync + 'static,
    {
        Self {
            initial: initial.to_weave_value(),
            reduce: Arc::new(reduce),
        }
    }

    /// Record the list of all items.
    pub fn collect() -> Self {
        Self::new(WeaveValue::List(Vec::new()), |acc, item| match acc {
            WeaveValue::List(mut items) => {
                items.push(item.clone());
                WeaveValue::List(items)
            }
            other => other,
        })
    }

    /// Concatenate string items.
    pub fn concat() -> Self {
        Self::new(String::new(), |acc, item| {
            let mut text = acc.as_str().unwrap_or_default().to_string();
            if let Some(chunk) = item.as_str() {
                text.push_str(chunk);
            }
            WeaveValue::String(text)
        })
    }

    fn apply(&self, acc: WeaveValue, item: &WeaveValue) -> WeaveValue {
        (self.reduce)(acc, item)
    }
}

impl fmt::Debug for StreamReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReducer")
            .field("initial", &self.initial)
            .finish()
    }
}

/// A stream whose call finishes once, when it is exhausted or dropped.
///
/// Each poll of the inner stream runs inside the call's context, so ops
/// invoked while producing items are recorded as its children.
pub struct TracedStream<S> {
    inner: Pin<Box<S>>,
    tracking: Option<Tracking>,
}

struct Tracking {
    call: ActiveCall,
    reducer: StreamReducer,
    state: WeaveValue,
    summarize: Option<SummarizeFn>,
}

impl<S> TracedStream<S> {
    pub(crate) fn untraced(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            tracking: None,
        }
    }

    pub(crate) fn traced(
        inner: S,
        call: ActiveCall,
        reducer: StreamReducer,
        summarize: Option<SummarizeFn>,
    ) -> Self {
        let state = reducer.initial.clone();
        Self {
            inner: Box::pin(inner),
            tracking: Some(Tracking {
                call,
                reducer,
                state,
                summarize,
            }),
        }
    }

    /// Whether the call is still open.
    pub fn is_recording(&self) -> bool {
        self.tracking.is_some()
    }

    fn finalize(&mut self) {
        if let Some(tracking) = self.tracking.take() {
            tracking
                .call
                .succeed(tracking.state, tracking.summarize.as_ref());
        }
    }
}

impl<S> Stream for TracedStream<S>
where
    S: Stream,
    S::Item: ToWeaveValue,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = match &this.tracking {
            Some(tracking) => {
                let _entered = tracking.call.span().enter();
                let inner = &mut this.inner;
                sync_in_context(tracking.call.context().clone(), || inner.as_mut().poll_next(cx))
            }
            None => this.inner.as_mut().poll_next(cx),
        };

        match poll {
            Poll::Ready(Some(item)) => {
                if let Some(tracking) = this.tracking.as_mut() {
                    let acc = std::mem::take(&mut tracking.state);
                    tracking.state = tracking.reducer.apply(acc, &item.to_weave_value());
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for TracedStream<S> {
    fn drop(&mut self) {
        if self.tracking.is_none() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            debug!("Traced stream dropped early; finishing its call");
            self.finalize();
        } else {
            warn!("Traced stream dropped outside a runtime; its call stays unfinished");
        }
    }
}

impl<S> fmt::Debug for TracedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedStream")
            .field("recording", &self.is_recording())
            .finish()
    }
}
