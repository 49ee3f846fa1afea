use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use chrono::Utc;
use shared::{
    domain::{CollectionQuery, TaskId},
    protocol::{sort_tasks, NewTask, Task, TaskPatch},
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::{
    backend::{DocumentBackend, MutationKind, SnapshotEvent, Subscription},
    error::{BackendError, ClientError},
};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListState {
    pub draft_title: String,
    pub tasks: Vec<Task>,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    MutationFailed {
        kind: MutationKind,
        id: Option<TaskId>,
        message: String,
    },
    SubscriptionFailed {
        message: String,
    },
}

pub struct TaskListController {
    backend: Arc<dyn DocumentBackend>,
    query: CollectionQuery,
    state: Arc<watch::Sender<TaskListState>>,
    events: broadcast::Sender<ControllerEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl TaskListController {
    pub async fn start(
        backend: Arc<dyn DocumentBackend>,
        query: CollectionQuery,
    ) -> Result<Self, ClientError> {
        let subscription = backend.subscribe(&query).await?;
        let (state, _) = watch::channel(TaskListState::default());
        let state = Arc::new(state);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let closed = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn(run_pump(
            subscription,
            Arc::clone(&state),
            events.clone(),
            query.clone(),
            Arc::clone(&closed),
        ));
        info!(collection = %query.collection, "task list subscribed");

        Ok(Self {
            backend,
            query,
            state,
            events,
            pump: Mutex::new(Some(pump)),
            closed,
        })
    }

    pub fn state(&self) -> TaskListState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<TaskListState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn set_draft_title(&self, text: impl Into<String>) {
        let text = text.into();
        publish(&self.state, &self.closed, |state| {
            if state.draft_title == text {
                return false;
            }
            state.draft_title = text;
            true
        });
    }

    pub async fn submit_draft(&self) -> Result<Option<TaskId>, ClientError> {
        let draft = self.state.borrow().draft_title.clone();
        self.add_task(&draft).await
    }

    /// Blank titles are ignored and return `Ok(None)`. The task itself only
    /// appears with the next snapshot.
    pub async fn add_task(&self, title: &str) -> Result<Option<TaskId>, ClientError> {
        self.ensure_open()?;
        let title = title.trim();
        if title.is_empty() {
            debug!("ignoring add with blank title");
            return Ok(None);
        }

        let fields = NewTask::pending(title, Utc::now());
        match self.backend.create(&self.query.collection, fields).await {
            Ok(id) => {
                debug!(collection = %self.query.collection, %id, "create issued");
                publish(&self.state, &self.closed, |state| {
                    state.draft_title.clear();
                    true
                });
                Ok(Some(id))
            }
            Err(err) => Err(self.report_failure(MutationKind::Create, None, err)),
        }
    }

    /// Sets `completed` to the negation of the value the caller last saw.
    pub async fn toggle_completed(
        &self,
        id: &TaskId,
        current_completed: bool,
    ) -> Result<(), ClientError> {
        self.ensure_open()?;
        let patch = TaskPatch::completed(!current_completed);
        self.backend
            .update(&self.query.collection, id, patch)
            .await
            .map_err(|err| self.report_failure(MutationKind::Update, Some(id), err))?;
        debug!(
            collection = %self.query.collection,
            %id,
            completed = !current_completed,
            "update issued"
        );
        Ok(())
    }

    pub async fn toggle_row(&self, index: usize) -> Result<(), ClientError> {
        let task = self.row(index)?;
        self.toggle_completed(&task.id, task.completed).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.backend
            .delete(&self.query.collection, id)
            .await
            .map_err(|err| self.report_failure(MutationKind::Delete, Some(id), err))?;
        debug!(collection = %self.query.collection, %id, "delete issued");
        Ok(())
    }

    pub async fn delete_row(&self, index: usize) -> Result<(), ClientError> {
        let task = self.row(index)?;
        self.delete_task(&task.id).await
    }

    /// Once this returns, the state no longer changes.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Waits out a write that saw the flag still clear.
        self.state.send_if_modified(|_| false);
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
            let _ = pump.await;
            info!(collection = %self.query.collection, "task list unsubscribed");
        }
    }

    fn row(&self, index: usize) -> Result<Task, ClientError> {
        self.state
            .borrow()
            .tasks
            .get(index)
            .cloned()
            .ok_or(ClientError::UnknownRow(index))
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ShutDown);
        }
        Ok(())
    }

    fn report_failure(
        &self,
        kind: MutationKind,
        id: Option<&TaskId>,
        err: BackendError,
    ) -> ClientError {
        error!(
            collection = %self.query.collection,
            operation = kind.as_str(),
            id = id.map(TaskId::as_str),
            %err,
            "task mutation failed"
        );
        let _ = self.events.send(ControllerEvent::MutationFailed {
            kind,
            id: id.cloned(),
            message: err.to_string(),
        });
        ClientError::Backend(err)
    }
}

impl Drop for TaskListController {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.send_if_modified(|_| false);
        let pump = self
            .pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }
    }
}

async fn run_pump(
    mut subscription: Subscription,
    state: Arc<watch::Sender<TaskListState>>,
    events: broadcast::Sender<ControllerEvent>,
    query: CollectionQuery,
    closed: Arc<AtomicBool>,
) {
    while let Some(event) = subscription.next_event().await {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        apply_snapshot_event(&state, &events, &query, &closed, event);
    }
    debug!(collection = %query.collection, "backend stopped delivering snapshots");
}

fn apply_snapshot_event(
    state: &watch::Sender<TaskListState>,
    events: &broadcast::Sender<ControllerEvent>,
    query: &CollectionQuery,
    closed: &AtomicBool,
    event: SnapshotEvent,
) {
    let collection = query.collection.as_str();
    match event {
        SnapshotEvent::Snapshot(tasks) => {
            let mut tasks = tasks.unwrap_or_default();
            // Stable, so an already ordered snapshot is left as delivered.
            sort_tasks(&mut tasks, query.direction);
            debug!(collection, count = tasks.len(), "snapshot applied");
            publish(state, closed, |state| {
                state.tasks = tasks;
                state.ready = true;
                true
            });
        }
        SnapshotEvent::Error(err) => {
            error!(collection, %err, "task subscription error");
            let applied = publish(state, closed, |state| {
                state.tasks.clear();
                state.ready = true;
                true
            });
            if applied {
                let _ = events.send(ControllerEvent::SubscriptionFailed {
                    message: err.to_string(),
                });
            }
        }
    }
}

// The flag is read under the watch lock, so `shutdown` fences writers by taking it once.
fn publish(
    state: &watch::Sender<TaskListState>,
    closed: &AtomicBool,
    modify: impl FnOnce(&mut TaskListState) -> bool,
) -> bool {
    state.send_if_modified(|state| !closed.load(Ordering::SeqCst) && modify(state))
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
