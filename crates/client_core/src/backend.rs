use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::Stream;
use shared::{
    domain::{CollectionQuery, TaskId},
    protocol::{NewTask, Task, TaskPatch},
};
use tokio::sync::mpsc;

use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEvent {
    /// `None` stands for an absent snapshot.
    Snapshot(Option<Vec<Task>>),
    Error(BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn subscribe(&self, query: &CollectionQuery) -> Result<Subscription, BackendError>;
    async fn create(&self, collection: &str, fields: NewTask) -> Result<TaskId, BackendError>;
    async fn update(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), BackendError>;
    async fn delete(&self, collection: &str, id: &TaskId) -> Result<(), BackendError>;
}

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// The release hook runs exactly once, on `unsubscribe` or drop.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
    release: Option<ReleaseHook>,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<SnapshotEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            release: Some(Box::new(release)),
        }
    }

    pub async fn next_event(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl Stream for Subscription {
    type Item = SnapshotEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::StreamExt;

    use super::*;

    fn counted() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        (calls, move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn release_runs_once_on_explicit_unsubscribe() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (calls, hook) = counted();
        let subscription = Subscription::new(rx, hook);
        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_runs_once_on_drop() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (calls, hook) = counted();
        {
            let _subscription = Subscription::new(rx, hook);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_yields_events_in_order_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_calls, hook) = counted();
        let subscription = Subscription::new(rx, hook);
        tx.send(SnapshotEvent::Snapshot(None)).expect("send");
        tx.send(SnapshotEvent::Error(BackendError::SubscriptionClosed))
            .expect("send");
        drop(tx);

        let events: Vec<_> = subscription.collect().await;
        assert_eq!(
            events,
            vec![
                SnapshotEvent::Snapshot(None),
                SnapshotEvent::Error(BackendError::SubscriptionClosed),
            ]
        );
    }
}
