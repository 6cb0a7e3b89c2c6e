//! HTTP GET tool: fetches a URL and returns its body, truncated.

use async_trait::async_trait;
use legion_core::error::ToolError;
use legion_core::tool::{Parameter, ParameterKind, Tool, ToolArguments};
use legion_core::CancellationToken;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpGetTool {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpGetTool {
    /// `max_bytes` bounds how much of the body is read and handed back to
    /// the model.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        let mut response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let total = response.content_length();
        let mut body = CappedBody::new(self.max_bytes);
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            if !body.push(&chunk) {
                break;
            }
        }
        debug!(
            url,
            status = status.as_u16(),
            bytes = body.bytes.len(),
            truncated = body.truncated,
            "Fetched URL"
        );

        Ok(format!("HTTP {}\n\n{}", status.as_u16(), body.into_text(total)))
    }
}

fn request_error(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout {
            tool_name: "http_get".into(),
            timeout_secs: REQUEST_TIMEOUT.as_secs(),
        }
    } else {
        ToolError::ExecutionFailed {
            tool_name: "http_get".into(),
            reason: e.to_string(),
        }
    }
}

/// A response body read up to a byte limit. Anything past the limit is
/// never buffered.
struct CappedBody {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBody {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append a chunk. Returns `false` once the limit is reached and the
    /// rest of the body should be skipped.
    fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.limit - self.bytes.len();
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    /// Decode as text. A cut body drops a trailing partial character and
    /// gains a marker naming how much was shown.
    fn into_text(self, total: Option<u64>) -> String {
        let end = match std::str::from_utf8(&self.bytes) {
            Err(e) if self.truncated && e.error_len().is_none() => e.valid_up_to(),
            _ => self.bytes.len(),
        };
        let text = String::from_utf8_lossy(&self.bytes[..end]);
        if !self.truncated {
            return text.into_owned();
        }
        match total {
            Some(total) => format!("{text}\n\n[truncated: {end} of {total} bytes shown]"),
            None => format!("{text}\n\n[truncated: first {end} bytes shown]"),
        }
    }
}

#[async_trait]
impl Tool for HttpGetTool {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Fetch a URL with an HTTP GET request and return the status code and response body."
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![Parameter::required(
            "url",
            ParameterKind::String,
            "The http:// or https:// URL to fetch",
        )]
    }

    async fn invoke(
        &self,
        arguments: ToolArguments,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let url = arguments
            .get_str("url")
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled(self.name().into())),
            result = self.fetch(url) => result,
        }
    }
}
