use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use jex_events_core::Event;

use super::{EventNotifier, NotifyError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs events as JSON to the event service.
///
/// Terminal events (`005`, `009`) also go to the job-execution service when a
/// JEX URL is configured.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    event_url: String,
    jex_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(
        event_url: impl Into<String>,
        jex_url: Option<String>,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;
        Ok(Self {
            client,
            event_url: event_url.into(),
            jex_url: jex_url.filter(|url| !url.is_empty()),
        })
    }

    async fn post(&self, url: &str, event: &Event) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(url, status = status.as_u16(), "event posted");
        Ok(())
    }
}

#[async_trait]
impl EventNotifier for HttpNotifier {
    #[instrument(
        skip(self, event),
        fields(event_number = %event.event_number, condor_id = %event.condor_id),
        err
    )]
    async fn route(&self, event: &Event) -> Result<(), NotifyError> {
        self.post(&self.event_url, event).await?;
        if let Some(jex_url) = self.jex_url.as_deref().filter(|_| event.is_terminal()) {
            self.post(jex_url, event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    type Received = Arc<Mutex<Vec<(String, Event)>>>;

    async fn record(
        State(received): State<Received>,
        uri: Uri,
        Json(event): Json<Event>,
    ) -> StatusCode {
        received
            .lock()
            .unwrap()
            .push((uri.path().to_string(), event));
        StatusCode::OK
    }

    async fn spawn_sink() -> (String, Received, tokio::task::JoinHandle<()>) {
        let received = Received::default();
        let app = Router::new()
            .route("/events", post(record))
            .route("/jex", post(record))
            .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), received, handle)
    }

    fn event(number: &str) -> Event {
        Event {
            event_number: number.to_string(),
            condor_id: "42".to_string(),
            hash: format!("hash-{number}"),
            ..Event::default()
        }
    }

    #[tokio::test]
    async fn posts_event_as_json() {
        let (base, received, server) = spawn_sink().await;
        let notifier = HttpNotifier::new(format!("{base}/events"), None).unwrap();

        notifier.route(&event("001")).await.unwrap();

        let received = received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "/events");
        assert_eq!(received[0].1.condor_id, "42");
        server.abort();
    }

    #[tokio::test]
    async fn terminal_events_also_go_to_jex() {
        let (base, received, server) = spawn_sink().await;
        let notifier =
            HttpNotifier::new(format!("{base}/events"), Some(format!("{base}/jex"))).unwrap();

        notifier.route(&event("001")).await.unwrap();
        notifier.route(&event("005")).await.unwrap();

        let paths: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect();
        assert_eq!(paths, vec!["/events", "/events", "/jex"]);
        server.abort();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _received, server) = spawn_sink().await;
        let notifier = HttpNotifier::new(format!("{base}/broken"), None).unwrap();

        let err = notifier.route(&event("001")).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500, .. }));
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let notifier = HttpNotifier::new("http://127.0.0.1:9/events", None).unwrap();
        let err = notifier.route(&event("001")).await.unwrap_err();
        assert!(matches!(err, NotifyError::Request { .. }));
    }
}
