// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Forward-reference slot attached to trackable values.

use std::fmt;
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::WeaveError;

/// A save in flight (or finished), shareable by every holder of the value.
pub type Pending<T> = Shared<BoxFuture<'static, Result<T, WeaveError>>>;

/// Holds the pending save of one in-memory value.
///
/// The slot is filled synchronously when a save starts, so anything that
/// embeds the value afterwards awaits the same result instead of saving again.
pub struct SaveSlot<T: Clone> {
    pending: Mutex<Option<Pending<T>>>,
}

impl<T> SaveSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// The pending save, if one was started.
    pub fn get(&self) -> Option<Pending<T>> {
        self.pending.lock().ok().and_then(|p| p.clone())
    }

    /// Return the existing pending save, or install the one built by `start`.
    ///
    /// The boolean is true when `start` ran.
    pub fn get_or_start<F>(&self, start: F) -> (Pending<T>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, WeaveError>>,
    {
        let mut guard = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = guard.as_ref() {
            return (existing.clone(), false);
        }
        let pending = start().shared();
        *guard = Some(pending.clone());
        (pending, true)
    }

    /// Pre-fill the slot with an already-known result.
    pub fn set_resolved(&self, value: T) {
        let ready: BoxFuture<'static, Result<T, WeaveError>> =
            futures_util::future::ready(Ok(value)).boxed();
        if let Ok(mut guard) = self.pending.lock() {
            *guard = Some(ready.shared());
        }
    }

    /// The saved result if the save already completed successfully.
    ///
    /// Never blocks; a save still in flight yields `None`.
    pub fn resolved(&self) -> Option<T> {
        self.get()
            .and_then(|p| p.now_or_never())
            .and_then(|r| r.ok())
    }

    pub fn is_started(&self) -> bool {
        self.get().is_some()
    }
}

impl<T> Default for SaveSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for SaveSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let started = self.pending.lock().map(|p| p.is_some()).unwrap_or(false);
        f.debug_struct("SaveSlot").field("started", &started).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_slot_starts_once() {
        let slot: SaveSlot<String> = SaveSlot::new();
        let starts = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let starts = starts.clone();
            let (pending, _) = slot.get_or_start(move || {
                starts.fetch_add(1, Ordering::SeqCst);
                async { Ok("digest".to_string()) }.boxed()
            });
            assert_eq!(pending.await.unwrap(), "digest");
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(slot.resolved(), Some("digest".to_string()));
    }

    #[tokio::test]
    async fn test_slot_unresolved_until_save_completes() {
        let slot: SaveSlot<u32> = SaveSlot::new();
        assert!(!slot.is_started());

        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let (pending, started) = slot.get_or_start(move || {
            async move { rx.await.map_err(|e| WeaveError::Internal(e.to_string())) }.boxed()
        });
        assert!(started);
        assert!(slot.is_started());
        assert_eq!(slot.resolved(), None);

        tx.send(7).unwrap();
        assert_eq!(pending.await.unwrap(), 7);
        assert_eq!(slot.resolved(), Some(7));
    }

    #[test]
    fn test_set_resolved() {
        let slot: SaveSlot<u32> = SaveSlot::new();
        slot.set_resolved(3);
        assert_eq!(slot.resolved(), Some(3));
    }
}
