//! HTTP request tool. Every call passes the SSRF screen, not only load time.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, ssrf, SideEffect, Tool, ToolContext, ToolError, ToolOutput, ToolSpec};

/// Response bodies are truncated to this many bytes before being handed back
/// to the model.
const MAX_BODY_BYTES: usize = 65_536;

/// `http_request`: GET/POST/PUT/DELETE against a screened URL.
pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "http_request".into(),
            description: Some("Perform an HTTP request and return status and body".into()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "method": { "type": "string", "enum": ["GET", "POST", "PUT", "DELETE"] },
                    "headers": { "type": "object" },
                    "body": { "type": "string" }
                },
                "required": ["url"]
            }),
        }
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::Network
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let url = ssrf::screen_url(required_str(&args, "url")?, &ctx.security)?;
        let method = args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "method {:?} not supported",
                    other
                )))
            }
        };
        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    request = request.header(k, v);
                }
            }
        }
        if let Some(body) = args.get("body").and_then(Value::as_str) {
            request = request.body(body.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        let truncated = if body.len() > MAX_BODY_BYTES {
            let mut end = MAX_BODY_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n[truncated {} bytes]", &body[..end], body.len() - end)
        } else {
            body
        };
        Ok(ToolOutput {
            text: format!("HTTP {}\n{}", status.as_u16(), truncated),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext {
            artifacts_dir: std::env::temp_dir(),
            security: Default::default(),
            interactive: false,
        }
    }

    /// **Scenario**: the SSRF screen runs on the call path, so a loopback URL
    /// never reaches the network.
    #[tokio::test]
    async fn loopback_blocked_per_call() {
        let tool = HttpRequestTool::new();
        let err = tool
            .call(json!({"url": "http://127.0.0.1:9/x"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Blocked(_)), "{err}");
    }

    /// **Scenario**: missing url and bad method are invalid-input errors.
    #[tokio::test]
    async fn argument_validation() {
        let tool = HttpRequestTool::new();
        let err = tool.call(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)), "{err}");
        let err = tool
            .call(json!({"url": "https://example.com", "method": "TRACE"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)), "{err}");
    }
}
