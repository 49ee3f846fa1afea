use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use async_trait::async_trait;
use shared::{
    domain::{CollectionQuery, SortDirection, TaskId},
    protocol::{sort_tasks, NewTask, Task, TaskPatch},
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    backend::{DocumentBackend, MutationKind, SnapshotEvent, Subscription},
    error::BackendError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuedCommand {
    Create {
        collection: String,
        fields: NewTask,
    },
    Update {
        collection: String,
        id: TaskId,
        patch: TaskPatch,
    },
    Delete {
        collection: String,
        id: TaskId,
    },
}

struct Listener {
    query: CollectionQuery,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<Task>>,
    listeners: HashMap<u64, Listener>,
    next_listener_id: u64,
    failures: HashMap<MutationKind, VecDeque<BackendError>>,
    subscribe_failures: VecDeque<BackendError>,
    commands: Vec<IssuedCommand>,
    paused: bool,
    held: Vec<(u64, SnapshotEvent)>,
}

impl MemoryState {
    fn snapshot_for(&self, query: &CollectionQuery) -> Vec<Task> {
        let mut tasks = self
            .collections
            .get(&query.collection)
            .cloned()
            .unwrap_or_default();
        // Ties on created_at follow insertion order in the query direction.
        if query.direction == SortDirection::Desc {
            tasks.reverse();
        }
        sort_tasks(&mut tasks, query.direction);
        tasks
    }

    fn deliver(&mut self, listener_id: u64, event: SnapshotEvent) {
        if self.paused {
            self.held.push((listener_id, event));
            return;
        }
        if let Some(listener) = self.listeners.get(&listener_id) {
            let _ = listener.tx.send(event);
        }
    }

    fn publish(&mut self, collection: &str) {
        let targets: Vec<(u64, Vec<Task>)> = self
            .listeners
            .iter()
            .filter(|(_, l)| l.query.collection == collection)
            .map(|(id, l)| (*id, self.snapshot_for(&l.query)))
            .collect();
        for (listener_id, tasks) in targets {
            self.deliver(listener_id, SnapshotEvent::Snapshot(Some(tasks)));
        }
    }

    fn broadcast(&mut self, collection: &str, event: SnapshotEvent) {
        let targets: Vec<u64> = self
            .listeners
            .iter()
            .filter(|(_, l)| l.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();
        for listener_id in targets {
            self.deliver(listener_id, event.clone());
        }
    }

    fn take_failure(&mut self, kind: MutationKind) -> Option<BackendError> {
        self.failures.get_mut(&kind).and_then(VecDeque::pop_front)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.inner)
    }

    /// Seeds a document directly, bypassing the command log, and notifies listeners.
    pub fn insert(&self, collection: &str, task: Task) {
        let mut state = self.state();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(task);
        state.publish(collection);
    }

    pub fn documents(&self, collection: &str) -> Vec<Task> {
        self.state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// The next `kind` mutation fails with `error` instead of being applied.
    pub fn fail_next(&self, kind: MutationKind, error: BackendError) {
        self.state()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    pub fn fail_next_subscribe(&self, error: BackendError) {
        self.state().subscribe_failures.push_back(error);
    }

    pub fn emit_snapshot(&self, collection: &str, tasks: Option<Vec<Task>>) {
        self.state()
            .broadcast(collection, SnapshotEvent::Snapshot(tasks));
    }

    pub fn emit_error(&self, collection: &str, error: BackendError) {
        self.state()
            .broadcast(collection, SnapshotEvent::Error(error));
    }

    /// Holds back snapshot delivery until [`InMemoryBackend::resume_delivery`].
    pub fn pause_delivery(&self) {
        self.state().paused = true;
    }

    pub fn resume_delivery(&self) {
        let mut state = self.state();
        state.paused = false;
        let held = std::mem::take(&mut state.held);
        for (listener_id, event) in held {
            state.deliver(listener_id, event);
        }
    }

    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.state().commands.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }
}

fn release_listener(inner: Weak<Mutex<MemoryState>>, listener_id: u64) {
    if let Some(inner) = inner.upgrade() {
        let mut state = lock(&inner);
        state.listeners.remove(&listener_id);
        state.held.retain(|(id, _)| *id != listener_id);
        debug!(listener_id, "in-memory listener released");
    }
}

#[async_trait]
impl DocumentBackend for InMemoryBackend {
    async fn subscribe(&self, query: &CollectionQuery) -> Result<Subscription, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener_id = {
            let mut state = self.state();
            if let Some(err) = state.subscribe_failures.pop_front() {
                return Err(err);
            }
            let listener_id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.insert(
                listener_id,
                Listener {
                    query: query.clone(),
                    tx,
                },
            );
            let initial = state.snapshot_for(query);
            state.deliver(listener_id, SnapshotEvent::Snapshot(Some(initial)));
            listener_id
        };
        debug!(listener_id, collection = %query.collection, "in-memory listener registered");

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            release_listener(inner, listener_id)
        }))
    }

    async fn create(&self, collection: &str, fields: NewTask) -> Result<TaskId, BackendError> {
        let mut state = self.state();
        state.commands.push(IssuedCommand::Create {
            collection: collection.to_string(),
            fields: fields.clone(),
        });
        if let Some(err) = state.take_failure(MutationKind::Create) {
            return Err(err);
        }
        let id = TaskId::generate();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(fields.into_task(id.clone()));
        state.publish(collection);
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.commands.push(IssuedCommand::Update {
            collection: collection.to_string(),
            id: id.clone(),
            patch,
        });
        if let Some(err) = state.take_failure(MutationKind::Update) {
            return Err(err);
        }
        let task = state
            .collections
            .get_mut(collection)
            .and_then(|tasks| tasks.iter_mut().find(|t| &t.id == id))
            .ok_or_else(|| {
                BackendError::not_found(format!("no document '{id}' in collection '{collection}'"))
            })?;
        patch.apply(task);
        state.publish(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &TaskId) -> Result<(), BackendError> {
        let mut state = self.state();
        state.commands.push(IssuedCommand::Delete {
            collection: collection.to_string(),
            id: id.clone(),
        });
        if let Some(err) = state.take_failure(MutationKind::Delete) {
            return Err(err);
        }
        if let Some(tasks) = state.collections.get_mut(collection) {
            tasks.retain(|t| &t.id != id);
        }
        state.publish(collection);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
