//! Snapshot source over the HTTP Server-Sent Events endpoint

use super::follow::{SnapshotFeed, SnapshotSource};
use crate::error::{Error, Result};
use crate::types::{JobId, JobRecord};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use std::pin::Pin;

/// Reads `GET {base_url}/jobs/{jobId}/stream`
///
/// `base_url` is wherever the router is mounted, e.g. `http://127.0.0.1:6790`.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    /// Create a source with a default client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a source sharing an existing client
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn stream_url(&self, job_id: JobId) -> String {
        format!("{}/jobs/{}/stream", self.base_url, job_id)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn open(&self, job_id: JobId) -> Result<SnapshotFeed> {
        let mut events = EventSource::new(self.client.get(self.stream_url(job_id)))
            .map_err(|e| Error::Other(format!("cannot build stream request: {e}")))?;
        // Reconnects are driven by `follow_job`, which also skips stale snapshots
        events.set_retry_policy(Box::new(Never));
        let mut events = Box::pin(events);

        match events.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(message))) => {
                return Err(Error::Other(format!(
                    "snapshot stream sent {:?} before opening",
                    message.event
                )));
            }
            Some(Err(e)) => return Err(open_error(job_id, e)),
            None => return Err(Error::Other("snapshot stream closed before opening".into())),
        }

        Ok(decode_snapshots(events).boxed())
    }
}

fn open_error(job_id: JobId, error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, _)
            if status == StatusCode::NOT_FOUND =>
        {
            Error::job_not_found(job_id)
        }
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            match response.error_for_status() {
                Err(e) => Error::Network(e),
                Ok(_) => Error::Other(format!("unexpected snapshot stream status {status}")),
            }
        }
        reqwest_eventsource::Error::Transport(e) => Error::Network(e),
        other => Error::Other(format!("cannot open snapshot stream: {other}")),
    }
}

/// Turn opened SSE events into snapshots
///
/// A transport error ends the stream, which a follower treats as a dropped connection.
fn decode_snapshots(
    events: Pin<Box<EventSource>>,
) -> impl Stream<Item = Result<JobRecord>> + Send + 'static {
    futures::stream::unfold(events, |mut events| async move {
        loop {
            match events.next().await? {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if let Some(record) = decode_data(&message.data) {
                        return Some((record, events));
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => return None,
                Err(e) => {
                    tracing::debug!(error = %e, "snapshot stream transport error");
                    return None;
                }
            }
        }
    })
}

/// Parse one event's `data` as a record; empty data carries nothing
fn decode_data(data: &str) -> Option<Result<JobRecord>> {
    if data.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(data).map_err(Error::from))
}
