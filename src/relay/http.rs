//! Unseen-event fetch over the relay's HTTP API.
//!
//! Events the wallet published while the socket was down are fetched with
//! `GET {relay_url}/events?unseen=true` (HTTP Basic auth `sessionId:sessionKey`)
//! and acknowledged one by one with `POST {relay_url}/events/{id}/seen`.

use std::time::Duration;

use serde::Deserialize;

use super::protocol::{ServerMessage, WEB3_RESPONSE_EVENT};
use crate::error::ChannelError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct UnseenEventsResponse {
    #[serde(default)]
    events: Vec<UnseenEvent>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnseenEvent {
    id: String,
    event: String,
    data: String,
}

/// HTTP client for one relay session.
#[derive(Debug, Clone)]
pub struct RelayHttp {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    session_key: String,
}

impl RelayHttp {
    /// Create a client for `relay_url` authenticated as the given session.
    pub fn new(relay_url: &str, session_id: &str, session_key: &str) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: relay_url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            session_key: session_key.to_string(),
        })
    }

    /// Fetch unseen `Web3Response` events as `Event` frames and mark them seen.
    pub async fn fetch_unseen_events(&self) -> Result<Vec<ServerMessage>, ChannelError> {
        let response = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&[("unseen", "true")])
            .basic_auth(&self.session_id, Some(&self.session_key))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("check unseen events failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Transport(format!(
                "check unseen events failed: {status}"
            )));
        }

        let body: UnseenEventsResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Protocol(format!("invalid unseen events body: {e}")))?;
        if let Some(error) = body.error {
            return Err(ChannelError::Transport(format!(
                "check unseen events failed: {error}"
            )));
        }

        let events: Vec<ServerMessage> = body
            .events
            .into_iter()
            .filter(|e| e.event == WEB3_RESPONSE_EVENT)
            .map(|e| ServerMessage::Event {
                session_id: self.session_id.clone(),
                event_id: e.id,
                event: e.event,
                data: e.data,
            })
            .collect();

        for event in &events {
            if let ServerMessage::Event { event_id, .. } = event {
                if let Err(e) = self.mark_seen(event_id).await {
                    log::warn!("Unable to mark event {event_id} as seen: {e}");
                }
            }
        }

        log::debug!("Fetched {} unseen relay events", events.len());
        Ok(events)
    }

    /// Acknowledge one event.
    pub async fn mark_seen(&self, event_id: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(format!("{}/events/{event_id}/seen", self.base_url))
            .basic_auth(&self.session_id, Some(&self.session_key))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("mark seen failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Transport(format!(
                "mark seen failed: {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_header() -> String {
        format!("Basic {}", BASE64.encode("sess:key"))
    }

    #[tokio::test]
    async fn test_fetches_web3_responses_and_marks_them_seen() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("unseen", "true"))
            .and(header("authorization", auth_header().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [
                    {"id": "e1", "event": "Web3Response", "data": "aa"},
                    {"id": "e2", "event": "Web3Request", "data": "bb"}
                ],
                "timestamp": 1
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events/e1/seen"))
            .and(header("authorization", auth_header().as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let http = RelayHttp::new(&server.uri(), "sess", "key").unwrap();
        let events = http.fetch_unseen_events().await.unwrap();

        assert_eq!(
            events,
            vec![ServerMessage::Event {
                session_id: "sess".into(),
                event_id: "e1".into(),
                event: "Web3Response".into(),
                data: "aa".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "session not found"})),
            )
            .mount(&server)
            .await;

        let http = RelayHttp::new(&server.uri(), "sess", "key").unwrap();
        let err = http.fetch_unseen_events().await.unwrap_err();
        assert!(err.to_string().contains("session not found"));
    }

    #[tokio::test]
    async fn test_http_status_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let http = RelayHttp::new(&server.uri(), "sess", "key").unwrap();
        assert!(matches!(
            http.fetch_unseen_events().await,
            Err(ChannelError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_acknowledgement_does_not_fail_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [{"id": "e1", "event": "Web3Response", "data": "aa"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events/e1/seen"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let http = RelayHttp::new(&format!("{}/", server.uri()), "sess", "key").unwrap();
        assert_eq!(http.fetch_unseen_events().await.unwrap().len(), 1);
    }
}
