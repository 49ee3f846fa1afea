pub mod backend;
pub mod controller;
pub mod error;
pub mod memory;
pub mod remote;
pub mod view;

pub use backend::{DocumentBackend, MutationKind, SnapshotEvent, Subscription};
pub use controller::{ControllerEvent, TaskListController, TaskListState};
pub use error::{BackendError, ClientError};
pub use memory::{InMemoryBackend, IssuedCommand};
pub use remote::RemoteBackend;
pub use view::{toast_text, TaskListView, TaskRow};
