use server_api::{ApiContext, CollectionChanged};
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) changes: broadcast::Sender<CollectionChanged>,
}

impl AppState {
    pub(crate) fn new(api: ApiContext, buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer.max(1));
        Self { api, changes }
    }

    /// Wakes every subscriber of `collection`. No receivers is not an error.
    pub(crate) fn notify_changed(&self, collection: &str) {
        let _ = self.changes.send(CollectionChanged {
            collection: collection.to_string(),
        });
    }
}
