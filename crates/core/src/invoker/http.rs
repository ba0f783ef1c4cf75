//! HTTP task invoker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::InvokerConfig;
use crate::metrics::{EXTERNAL_SERVICE_DURATION, EXTERNAL_SERVICE_REQUESTS};
use crate::run::{RunContext, WorkItem};
use crate::step::{FailureClass, StepError, StepOutcome};

use super::TaskInvoker;

const SERVICE: &str = "task_endpoint";
const OPERATION: &str = "invoke";

/// Request body sent for every attempt.
#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    run_id: &'a str,
    client_id: &'a str,
    tier_id: &'a str,
    item_id: &'a str,
    payload: &'a Value,
    context: &'a Value,
}

/// Invokes work items by POSTing them to a task endpoint.
pub struct HttpTaskInvoker {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
}

impl HttpTaskInvoker {
    /// Create an invoker for the configured endpoint.
    pub fn new(config: &InvokerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            headers: config.headers.clone(),
        })
    }

    fn transport_error(e: reqwest::Error) -> StepError {
        if e.is_timeout() {
            StepError::transient(format!("task endpoint timed out: {}", e))
        } else if e.is_connect() || e.is_request() {
            StepError::transient(format!("task endpoint unreachable: {}", e))
        } else if e.is_builder() {
            StepError::permanent(format!("invalid task request: {}", e))
        } else {
            StepError::transient(format!("task endpoint error: {}", e))
        }
    }
}

/// Maps a non-success HTTP status to a failure class.
///
/// Timeouts, throttling and server errors are worth retrying; any other
/// client error means the request itself is wrong.
pub fn classify_status(status: StatusCode) -> FailureClass {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FailureClass::Transient,
        s if s.is_server_error() => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

#[async_trait]
impl TaskInvoker for HttpTaskInvoker {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, ctx: &RunContext, tier_id: &str, item: &WorkItem) -> StepOutcome<Value> {
        let body = InvokeRequest {
            run_id: &ctx.run_id,
            client_id: &ctx.client_id,
            tier_id,
            item_id: &item.id,
            payload: &item.payload,
            context: &ctx.payload,
        };

        let mut request = self.client.post(&self.url).json(&body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(
            run_id = %ctx.run_id,
            tier_id,
            item_id = %item.id,
            "Invoking task endpoint"
        );

        let start = Instant::now();
        let result = request.send().await;
        EXTERNAL_SERVICE_DURATION
            .with_label_values(&[SERVICE, OPERATION])
            .observe(start.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                EXTERNAL_SERVICE_REQUESTS
                    .with_label_values(&[SERVICE, OPERATION, "error"])
                    .inc();
                return Err(Self::transport_error(e));
            }
        };

        let status = response.status();
        EXTERNAL_SERVICE_REQUESTS
            .with_label_values(&[SERVICE, OPERATION, status.as_str()])
            .inc();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StepError::new(
                classify_status(status),
                format!(
                    "HTTP {}: {}",
                    status,
                    text.chars().take(200).collect::<String>()
                ),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StepError::permanent(format!("undecodable task response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunSeed;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and hands back the request body.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/tasks", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];

            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            String::from_utf8_lossy(&buf[header_end..]).to_string()
        });

        (url, handle)
    }

    fn invoker(url: String) -> HttpTaskInvoker {
        HttpTaskInvoker::new(&InvokerConfig {
            url,
            timeout_secs: 5,
            headers: HashMap::from([("x-api-key".to_string(), "k".to_string())]),
        })
        .unwrap()
    }

    fn ctx() -> RunContext {
        RunContext::new(
            "run-1",
            RunSeed::new("client-a").with_payload(json!({"topic": "rust"})),
        )
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            FailureClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            FailureClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            FailureClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            FailureClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            FailureClass::Permanent
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            FailureClass::Permanent
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureClass::Permanent);
    }

    #[tokio::test]
    async fn test_invoke_success_returns_body() {
        let (url, server) = serve_once("200 OK", r#"{"text":"done"}"#).await;
        let item = WorkItem::new("intro", json!({"key": "intro"}));

        let output = invoker(url).invoke(&ctx(), "tier1", &item).await.unwrap();
        assert_eq!(output, json!({"text": "done"}));

        let sent: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sent["run_id"], "run-1");
        assert_eq!(sent["client_id"], "client-a");
        assert_eq!(sent["tier_id"], "tier1");
        assert_eq!(sent["item_id"], "intro");
        assert_eq!(sent["payload"]["key"], "intro");
        assert_eq!(sent["context"]["topic"], "rust");
    }

    #[tokio::test]
    async fn test_invoke_server_error_is_transient() {
        let (url, server) = serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let item = WorkItem::new("intro", json!({}));

        let err = invoker(url).invoke(&ctx(), "tier1", &item).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Transient);
        assert!(err.message.contains("503"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_bad_request_is_permanent() {
        let (url, server) = serve_once("400 Bad Request", r#"{"error":"bad"}"#).await;
        let item = WorkItem::new("intro", json!({}));

        let err = invoker(url).invoke(&ctx(), "tier1", &item).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Permanent);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_undecodable_body_is_permanent() {
        let (url, server) = serve_once("200 OK", "not json").await;
        let item = WorkItem::new("intro", json!({}));

        let err = invoker(url).invoke(&ctx(), "tier1", &item).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Permanent);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_connection_refused_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/tasks", listener.local_addr().unwrap());
        drop(listener);

        let item = WorkItem::new("intro", json!({}));
        let err = invoker(url).invoke(&ctx(), "tier1", &item).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Transient);
    }
}
