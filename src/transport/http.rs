use super::{endpoints, Session, Transport};
use crate::config::BrokerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Broker rejections, classified by HTTP status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("authentication failed for '{endpoint}': {body}")]
    Authentication { endpoint: String, body: String },

    #[error("not authorized for '{endpoint}': {body}")]
    Authorization { endpoint: String, body: String },

    #[error("invalid parameters for '{endpoint}': {body}")]
    InvalidParameters { endpoint: String, body: String },

    #[error("broker returned {status} for '{endpoint}': {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
}

impl TransportError {
    fn from_status(endpoint: &str, status: StatusCode, body: String) -> Self {
        let endpoint = endpoint.to_string();
        match status {
            StatusCode::UNAUTHORIZED => Self::Authentication { endpoint, body },
            StatusCode::FORBIDDEN => Self::Authorization { endpoint, body },
            StatusCode::BAD_REQUEST => Self::InvalidParameters { endpoint, body },
            s => Self::Status {
                endpoint,
                status: s.as_u16(),
                body,
            },
        }
    }
}

/// HTTP transport for the broker's REST API.
///
/// The session cookie set by `plugin/connect` is kept in the client's cookie
/// store and sent with every later request.
pub struct HttpTransport {
    http_client: Client,
    base_url: String,
    entity_id: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("broker-agent/0.1")
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            entity_id: config.entity_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: &str, payload: Value) -> Result<Value> {
        debug!(endpoint = %endpoint, "POST to broker");

        let response = self
            .http_client
            .post(self.url(endpoint))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to send request to '{}'", endpoint))?;

        read_reply(endpoint, response).await
    }

    async fn get(&self, endpoint: &str) -> Result<Value> {
        debug!(endpoint = %endpoint, "GET from broker");

        let response = self
            .http_client
            .get(self.url(endpoint))
            .send()
            .await
            .with_context(|| format!("Failed to send request to '{}'", endpoint))?;

        read_reply(endpoint, response).await
    }
}

#[async_trait]
impl Session for HttpTransport {
    async fn connect(&self) -> Result<()> {
        self.post(
            endpoints::CONNECT,
            json!({
                "entity_id": self.entity_id,
                "api_key": self.api_key,
            }),
        )
        .await?;

        info!(entity_id = %self.entity_id, broker = %self.base_url, "Connected to broker");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.post(
            endpoints::DISCONNECT,
            json!({ "entity_id": self.entity_id }),
        )
        .await?;

        info!(entity_id = %self.entity_id, "Disconnected from broker");
        Ok(())
    }
}

/// Maps the status to a [`TransportError`] and decodes the body.
///
/// Empty bodies decode to `{}`. Bodies that are not JSON (some endpoints
/// answer with a bare `OK`) are returned as a JSON string.
async fn read_reply(endpoint: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read reply from '{}'", endpoint))?;

    if !status.is_success() {
        return Err(TransportError::from_status(endpoint, status, body).into());
    }

    if body.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_json::from_str(&body) {
        Ok(value) => Ok(value),
        Err(_) => {
            debug!(endpoint = %endpoint, "Broker reply is not JSON, keeping raw text");
            Ok(Value::String(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn make_transport(url: String) -> HttpTransport {
        HttpTransport::new(&BrokerConfig {
            url,
            entity_id: "plugin-7".to_string(),
            api_key: "secret".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_decodes_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/plugin/message/list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages": []}"#)
            .create_async()
            .await;

        let transport = make_transport(server.url());
        let reply = transport.get(endpoints::MESSAGE_LIST).await.unwrap();
        assert_eq!(reply, json!({"messages": []}));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/plugin/subscribe")
            .match_body(Matcher::Json(json!({"message_name": "grade_update"})))
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;

        let transport = make_transport(format!("{}/", server.url()));
        let reply = transport
            .post(endpoints::SUBSCRIBE, json!({"message_name": "grade_update"}))
            .await
            .unwrap();
        assert_eq!(reply, json!("OK"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/response")
            .with_status(200)
            .create_async()
            .await;

        let transport = make_transport(server.url());
        let reply = transport
            .post(endpoints::RESPONSE, json!({"message_id": "1", "payload": {}}))
            .await
            .unwrap();
        assert_eq!(reply, json!({}));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let mut server = Server::new_async().await;
        let _unauth = server
            .mock("GET", "/plugin/subscription/list")
            .with_status(401)
            .with_body("not signed in")
            .create_async()
            .await;
        let _forbidden = server
            .mock("POST", "/share-message")
            .with_status(403)
            .with_body("not the owner")
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/new-resource")
            .with_status(400)
            .with_body("missing owner_id")
            .create_async()
            .await;
        let _unavailable = server
            .mock("GET", "/plugin/transaction/list")
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;

        let transport = make_transport(server.url());

        let err = transport.get(endpoints::SUBSCRIPTION_LIST).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Authentication { .. })
        ));

        let err = transport
            .post(endpoints::SHARE_MESSAGE, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Authorization { .. })
        ));

        let err = transport
            .post(endpoints::NEW_RESOURCE, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::InvalidParameters { .. })
        ));

        let err = transport.get(endpoints::TRANSACTION_LIST).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransportError>(),
            Some(&TransportError::Status {
                endpoint: "plugin/transaction/list".to_string(),
                status: 503,
                body: "down".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_connect_sends_credentials() {
        let mut server = Server::new_async().await;
        let connect = server
            .mock("POST", "/plugin/connect")
            .match_body(Matcher::Json(json!({
                "entity_id": "plugin-7",
                "api_key": "secret"
            })))
            .with_status(200)
            .with_header("set-cookie", "session=abc; Path=/")
            .with_body("OK")
            .create_async()
            .await;
        let disconnect = server
            .mock("POST", "/plugin/disconnect")
            .match_header("cookie", Matcher::Regex("session=abc".to_string()))
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;

        let transport = make_transport(server.url());
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();

        connect.assert_async().await;
        disconnect.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let transport = make_transport("http://127.0.0.1:9".to_string());
        assert!(transport.get(endpoints::MESSAGE_LIST).await.is_err());
    }
}
