//! Broker client for the HTTP broker service.
//!
//! Used by the Gateway and Worker processes. Connection failures surface as
//! [`BrokerError::Unavailable`] so callers can apply their reconnect policy;
//! the client itself never retries.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use seedkeeper_core::broker::{Broker, Claim, Subscription};
use seedkeeper_core::error::BrokerError;
use seedkeeper_core::WorkItem;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::server::{
    AckRequest, ClaimBody, ClaimRequest, CountBody, FlagBody, PublishRequest, SetRequest,
    ValueBody,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a remote broker service.
pub struct RemoteBroker {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RemoteBroker {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded, so
    /// keys containing `:` or `/` survive the trip.
    fn url(&self, segments: &[&str]) -> Result<Url, BrokerError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| BrokerError::Protocol(format!("bad broker url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BrokerError::Protocol("broker url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, BrokerError> {
        let mut builder = self.client.request(method, self.url(segments)?);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, BrokerError> {
        let response = builder
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(response),
            StatusCode::UNAUTHORIZED => Err(BrokerError::Unauthorized),
            StatusCode::SERVICE_UNAVAILABLE => {
                let body = response.text().await.unwrap_or_default();
                Err(BrokerError::Unavailable(body))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BrokerError::Protocol(format!("{status}: {body}")))
            }
        }
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BrokerError> {
        response
            .json()
            .await
            .map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl Broker for RemoteBroker {
    fn name(&self) -> &str {
        "remote"
    }

    async fn push(&self, queue: &str, item: &WorkItem) -> Result<(), BrokerError> {
        let req = self
            .request(Method::POST, &["queues", queue, "push"])?
            .timeout(REQUEST_TIMEOUT)
            .json(item);
        Self::send(req).await?;
        Ok(())
    }

    async fn claim(&self, queue: &str, wait: Duration) -> Result<Option<Claim>, BrokerError> {
        let req = self
            .request(Method::POST, &["queues", queue, "claim"])?
            .timeout(wait + REQUEST_TIMEOUT)
            .json(&ClaimRequest {
                wait_ms: wait.as_millis() as u64,
            });
        let body: Option<ClaimBody> = Self::json(Self::send(req).await?).await?;
        Ok(body.map(|b| Claim {
            item: b.item,
            receipt: b.receipt,
        }))
    }

    async fn ack(&self, queue: &str, receipt: &str) -> Result<bool, BrokerError> {
        let req = self
            .request(Method::POST, &["queues", queue, "ack"])?
            .timeout(REQUEST_TIMEOUT)
            .json(&AckRequest {
                receipt: receipt.to_string(),
            });
        let body: FlagBody = Self::json(Self::send(req).await?).await?;
        Ok(body.ok)
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, BrokerError> {
        let req = self
            .request(Method::GET, &["queues", queue, "len"])?
            .timeout(REQUEST_TIMEOUT);
        let body: CountBody = Self::json(Self::send(req).await?).await?;
        Ok(body.count)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let req = self
            .request(Method::GET, &["kv", key])?
            .timeout(REQUEST_TIMEOUT);
        let response = Self::send(req).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: ValueBody = Self::json(response).await?;
        Ok(Some(body.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), BrokerError> {
        let req = self
            .request(Method::PUT, &["kv", key])?
            .timeout(REQUEST_TIMEOUT)
            .json(&SetRequest {
                value: value.to_string(),
                ttl_ms: ttl.map(|t| t.as_millis() as u64),
            });
        Self::send(req).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, BrokerError> {
        let req = self
            .request(Method::POST, &["kv", key, "nx"])?
            .timeout(REQUEST_TIMEOUT)
            .json(&SetRequest {
                value: value.to_string(),
                ttl_ms: ttl.map(|t| t.as_millis() as u64),
            });
        let body: FlagBody = Self::json(Self::send(req).await?).await?;
        Ok(body.ok)
    }

    async fn delete(&self, key: &str) -> Result<bool, BrokerError> {
        let req = self
            .request(Method::DELETE, &["kv", key])?
            .timeout(REQUEST_TIMEOUT);
        let body: FlagBody = Self::json(Self::send(req).await?).await?;
        Ok(body.ok)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BrokerError> {
        let req = self
            .request(Method::DELETE, &["kv-prefix", prefix])?
            .timeout(REQUEST_TIMEOUT);
        let body: CountBody = Self::json(Self::send(req).await?).await?;
        Ok(body.count)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        let req = self
            .request(Method::POST, &["channels", channel, "publish"])?
            .timeout(REQUEST_TIMEOUT)
            .json(&PublishRequest {
                payload: payload.to_string(),
            });
        let body: CountBody = Self::json(Self::send(req).await?).await?;
        Ok(body.count)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BrokerError> {
        let req = self
            .request(Method::GET, &["channels", channel, "subscribe"])?
            .header("Accept", "text/event-stream");
        let response = Self::send(req).await?;
        debug!(channel, "Subscribed to remote channel");

        let (tx, rx) = mpsc::channel(256);
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut data_lines: Vec<String> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Subscription stream interrupted");
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // A blank line ends one event.
                    if line.is_empty() {
                        if !data_lines.is_empty() {
                            let payload = data_lines.join("\n");
                            data_lines.clear();
                            if tx.send(payload).await.is_err() {
                                return;
                            }
                        }
                        continue;
                    }

                    // Comments are keep-alives.
                    if line.starts_with(':') {
                        continue;
                    }

                    if let Some(data) = line.strip_prefix("data:") {
                        data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
                    } else {
                        trace!(line = %line, "Ignoring SSE field");
                    }
                }
            }
            debug!(channel = %channel, "Subscription stream ended");
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, BrokerError> {
        let req = self
            .request(Method::GET, &["health"])?
            .timeout(REQUEST_TIMEOUT);
        Ok(Self::send(req).await?.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBroker;
    use crate::server;
    use chrono::Utc;
    use seedkeeper_core::InboundEvent;
    use std::sync::Arc;

    async fn spawn_service(token: Option<&str>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = server::build_router(Arc::new(server::BrokerService {
            broker: Arc::new(MemoryBroker::default()),
            token: token.map(String::from),
        }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn url_segments_are_encoded() {
        let client = RemoteBroker::new("http://127.0.0.1:6390/", None);
        let url = client.url(&["kv", "conversation:1:dm:2:medium"]).unwrap();
        assert_eq!(url.path(), "/kv/conversation:1:dm:2:medium");

        let url = client.url(&["kv", "a/b"]).unwrap();
        assert_eq!(url.path(), "/kv/a%2Fb");
    }

    #[tokio::test]
    async fn round_trip_through_service() {
        let url = spawn_service(Some("secret")).await;
        let client = RemoteBroker::new(&url, Some("secret".into()));

        assert!(client.health_check().await.unwrap());

        client.set("k", "v", None).await.unwrap();
        assert_eq!(client.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(client.get("missing").await.unwrap().is_none());
        assert!(client.set_if_absent("nx", "1", None).await.unwrap());
        assert!(!client.set_if_absent("nx", "1", None).await.unwrap());

        let item = WorkItem::new(InboundEvent {
            event_id: "e1".into(),
            channel_id: "c".into(),
            guild_id: None,
            author_id: "u".into(),
            author_name: None,
            is_direct_message: true,
            mentions_bot: false,
            raw_text: "hi".into(),
            timestamp: Utc::now(),
            reply_context: None,
            channel_topic: None,
        });
        client.push("q", &item).await.unwrap();
        let claim = client
            .claim("q", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claim.item.correlation_id, item.correlation_id);
        assert!(client.ack("q", &claim.receipt).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_token_is_unauthorized() {
        let url = spawn_service(Some("secret")).await;
        let client = RemoteBroker::new(&url, Some("nope".into()));
        assert!(matches!(
            client.get("k").await,
            Err(BrokerError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn subscription_streams_published_payloads() {
        let url = spawn_service(None).await;
        let client = RemoteBroker::new(&url, None);

        let mut sub = client.subscribe("events").await.unwrap();
        // Give the server a moment to attach the subscriber.
        let mut reached = 0;
        for _ in 0..50 {
            reached = client.publish("events", r#"{"n":1}"#).await.unwrap();
            if reached > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(reached, 1);
        let payload = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        let client = RemoteBroker::new("http://127.0.0.1:1", None);
        let err = client.get("k").await.unwrap_err();
        assert!(err.is_transport());
    }
}
