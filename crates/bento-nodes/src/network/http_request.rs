//! HTTP Request Node
//!
//! Sends one request with `reqwest`. The client comes from the
//! `http_client` extension when the host installed one, so connection
//! pools are shared across nodes and runs.
//!
//! `{{.NAME}}` placeholders in the url, header values and string bodies
//! resolve from the context, host variables or the environment; an
//! unresolved placeholder in the url or a header fails the node.
//!
//! # Outputs
//! - `status` - HTTP status code
//! - `headers` - Response headers (lower-case names)
//! - `body` - Parsed JSON when the response is JSON, otherwise text

use std::time::Duration;

use async_trait::async_trait;
use bento_engine::params::HttpRequestParams;
use bento_engine::{
    extension_keys, EngineError, NodeExecutor, NodeScope, Outputs, Parameters, Result,
};
use reqwest::Method;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::vars::Resolver;

#[derive(Debug, Default)]
pub struct HttpRequestExecutor;

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = HttpRequestParams::parse(&params)?;
        let method = Method::from_bytes(params.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| EngineError::invalid_parameter("method", e.to_string()))?;

        let client = scope
            .extensions()
            .get::<reqwest::Client>(extension_keys::HTTP_CLIENT)
            .cloned()
            .unwrap_or_default();

        let request = {
            let resolver = Resolver::new(scope);
            let url = resolver.render_strict("url", &params.url)?;
            let mut request = client.request(method.clone(), &url);
            for (name, value) in &params.headers {
                let value = resolver.render_strict(&format!("headers.{}", name), value)?;
                request = request.header(name.as_str(), value);
            }
            request = match &params.body {
                None | Some(Value::Null) => request,
                Some(Value::String(text)) => request.body(resolver.render(text)),
                Some(other) => request.json(other),
            };
            if let Some(ms) = params.timeout_ms {
                request = request.timeout(Duration::from_millis(ms));
            }
            log::debug!("HttpRequest {}: {} {}", scope.node.id, method, url);
            request
        };

        let response = tokio::select! {
            response = request.send() => response.map_err(|e| {
                EngineError::failed(format!("{} {} failed: {}", method, params.url, e))
            })?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), json!(v)))
            })
            .collect();
        let is_json = headers
            .get("content-type")
            .and_then(Value::as_str)
            .is_some_and(|ct| ct.contains("json"));

        let text = tokio::select! {
            text = response.text() => text.map_err(|e| {
                EngineError::failed(format!("Failed to read response body: {}", e))
            })?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        if !status.is_success() {
            return Err(EngineError::failed(format!(
                "{} {} returned {}: {}",
                method,
                params.url,
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let body = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(Outputs::from([
            ("status".to_string(), json!(status.as_u16())),
            ("headers".to_string(), Value::Object(headers)),
            ("body".to_string(), body),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use bento_engine::{Definition, ExecutorExtensions, NodeRegistry, Orchestrator};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Reads one request, body included
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serves one connection, answering with the request line as JSON
    async fn echo_server(status: u16) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let request_line = request.lines().next().unwrap_or_default().to_string();
            let has_token = request.to_ascii_lowercase().contains("x-token: secret");
            let body = json!({"requestLine": request_line, "hasToken": has_token}).to_string();
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("127.0.0.1:{}", addr.port())
    }

    fn orchestrator(variables: HashMap<String, String>) -> Orchestrator {
        let mut registry = NodeRegistry::with_control_flow();
        registry.register_type::<HttpRequestExecutor>("http-request");
        let mut extensions = ExecutorExtensions::new();
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        extensions.set(extension_keys::HTTP_CLIENT, client);
        extensions.set(extension_keys::VARIABLES, Arc::new(variables));
        Orchestrator::new(Arc::new(registry)).with_extensions(extensions)
    }

    #[tokio::test]
    async fn test_placeholders_are_substituted() {
        let host = echo_server(200).await;
        let request = Definition::new("req", "http-request")
            .with_parameter("url", json!("http://{{.API_HOST}}/users/{{.item.id}}"))
            .with_parameter("method", json!("get"))
            .with_parameter("headers", json!({"X-Token": "{{.TOKEN}}"}));
        let node = Definition::new("each", "loop")
            .with_parameter("mode", json!("forEach"))
            .with_parameter("items", json!([{"id": 7}]))
            .with_child(request);

        let variables = HashMap::from([
            ("API_HOST".to_string(), host),
            ("TOKEN".to_string(), "secret".to_string()),
        ]);
        let result = orchestrator(variables)
            .run(&node, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.data["status"], json!(200));
        assert_eq!(result.data["body"]["requestLine"], json!("GET /users/7 HTTP/1.1"));
        assert_eq!(result.data["body"]["hasToken"], json!(true));
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let host = echo_server(500).await;
        let node = Definition::new("req", "http-request")
            .with_parameter("url", json!(format!("http://{}/boom", host)))
            .with_parameter("method", json!("POST"))
            .with_parameter("body", json!({"a": 1}));

        let failure = orchestrator(HashMap::new())
            .run(&node, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(failure.error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_missing_variable_fails_preflight() {
        let node = Definition::new("req", "http-request")
            .with_parameter("url", json!("http://{{.BENTO_TEST_UNSET_HOST}}/x"))
            .with_parameter("method", json!("GET"));

        let failure = orchestrator(HashMap::new())
            .run(&node, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, EngineError::Preflight(_)));
        assert_eq!(failure.nodes_executed, 0);
    }
}
