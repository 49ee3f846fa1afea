use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use shared::{
    domain::{CollectionQuery, TaskId},
    error::{ApiError, ErrorCode},
    protocol::{CreatedTask, NewTask, ServerEvent, TaskPatch},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    backend::{DocumentBackend, SnapshotEvent, Subscription},
    error::BackendError,
};

#[derive(Clone)]
pub struct RemoteBackend {
    http: Client,
    server_url: Url,
}

impl RemoteBackend {
    pub fn new(server_url: &str) -> Result<Self, BackendError> {
        let server_url = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|err| BackendError::InvalidUrl(format!("{server_url}: {err}")))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(BackendError::InvalidUrl(format!(
                "server_url must start with http:// or https://, got '{server_url}'"
            )));
        }
        Ok(Self {
            http: Client::new(),
            server_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.server_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn documents_url(&self, collection: &str) -> Result<Url, BackendError> {
        self.endpoint(&["collections", collection, "documents"])
    }

    fn document_url(&self, collection: &str, id: &TaskId) -> Result<Url, BackendError> {
        self.endpoint(&["collections", collection, "documents", id.as_str()])
    }

    pub(crate) fn subscription_url(&self, query: &CollectionQuery) -> Result<Url, BackendError> {
        let mut url = self.endpoint(&["ws"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| BackendError::InvalidUrl(self.server_url.to_string()))?;
        url.query_pairs_mut()
            .append_pair("collection", &query.collection)
            .append_pair("order_by", query.order_by.as_str())
            .append_pair("direction", query.direction.as_str());
        Ok(url)
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let err = serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| {
        let code = if status == reqwest::StatusCode::NOT_FOUND {
            ErrorCode::NotFound
        } else if status.is_client_error() {
            ErrorCode::Validation
        } else {
            ErrorCode::Internal
        };
        ApiError::new(code, format!("{status}: {body}"))
    });
    Err(err.into())
}

fn forward(tx: &mpsc::UnboundedSender<SnapshotEvent>, event: SnapshotEvent) -> bool {
    tx.send(event).is_ok()
}

#[async_trait]
impl DocumentBackend for RemoteBackend {
    async fn subscribe(&self, query: &CollectionQuery) -> Result<Subscription, BackendError> {
        let ws_url = self.subscription_url(query)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| BackendError::Transport(format!("failed to connect websocket: {err}")))?;
        let (_, mut ws_reader) = ws_stream.split();
        info!(collection = %query.collection, "subscription opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let collection = query.collection.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::Snapshot { tasks, .. }) => {
                            SnapshotEvent::Snapshot(Some(tasks))
                        }
                        Ok(ServerEvent::Error(err)) => SnapshotEvent::Error(err.into()),
                        Err(err) => {
                            warn!(%collection, %err, "invalid server event");
                            SnapshotEvent::Error(BackendError::Decode(err.to_string()))
                        }
                    },
                    Ok(Message::Close(_)) => {
                        let _ = forward(&tx, SnapshotEvent::Error(BackendError::SubscriptionClosed));
                        break;
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        let _ = forward(
                            &tx,
                            SnapshotEvent::Error(BackendError::Transport(format!(
                                "websocket receive failed: {err}"
                            ))),
                        );
                        break;
                    }
                };
                if !forward(&tx, event) {
                    break;
                }
            }
            debug!(%collection, "subscription reader finished");
        });

        Ok(Subscription::new(rx, move || reader.abort()))
    }

    async fn create(&self, collection: &str, fields: NewTask) -> Result<TaskId, BackendError> {
        let res = self
            .http
            .post(self.documents_url(collection)?)
            .json(&fields)
            .send()
            .await?;
        let created: CreatedTask = ensure_success(res).await?.json().await?;
        Ok(created.id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), BackendError> {
        let res = self
            .http
            .patch(self.document_url(collection, id)?)
            .json(&patch)
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &TaskId) -> Result<(), BackendError> {
        let res = self
            .http
            .delete(self.document_url(collection, id)?)
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
