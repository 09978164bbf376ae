//! HTTP fetch tool.
//!
//! Downloads a document and hands it back as an embedded resource, or as
//! base64 image content for `image/*` responses. Timeouts, non-success
//! statuses, oversized bodies and other binary payloads are reported as tool
//! failures.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::parse;
use crate::configuration::FetchSettings;
use crate::mcp::protocol::{EmbeddedResource, ToolContent};
use crate::mcp::registry::{ToolDescriptor, ToolHandler};
use crate::mcp::schema::{ArgumentKind, ArgumentSchema};

pub struct FetchUrlTool {
    client: reqwest::Client,
    max_bytes: usize,
}

impl FetchUrlTool {
    pub fn new(settings: &FetchSettings) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            max_bytes: settings.max_bytes,
        })
    }
}

fn describe(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow!("Request timeout: {}", err)
    } else if err.is_connect() {
        anyhow!("Connection failed: {}", err)
    } else {
        anyhow!("HTTP error: {}", err)
    }
}

fn into_content(url: Url, mime_type: Option<String>, body: Vec<u8>) -> anyhow::Result<Vec<ToolContent>> {
    if let Some(image_type) = mime_type.as_deref().filter(|m| m.starts_with("image/")) {
        let image_type = image_type.split(';').next().unwrap_or(image_type).trim();
        return Ok(vec![ToolContent::Image {
            data: general_purpose::STANDARD.encode(&body),
            mime_type: image_type.to_string(),
        }]);
    }

    let text = String::from_utf8(body).map_err(|_| {
        anyhow!(
            "Binary content ({}) is not supported",
            mime_type.as_deref().unwrap_or("unknown type")
        )
    })?;
    Ok(vec![ToolContent::Resource {
        resource: EmbeddedResource {
            uri: url.to_string(),
            mime_type,
            text: Some(text),
        },
    }])
}

#[async_trait]
impl ToolHandler for FetchUrlTool {
    async fn execute(&self, args: Map<String, Value>) -> anyhow::Result<Vec<ToolContent>> {
        #[derive(Deserialize)]
        struct Args {
            url: String,
        }

        let params: Args = parse(args)?;
        let url = Url::parse(&params.url).with_context(|| format!("Invalid url '{}'", params.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Unsupported url scheme '{}'", url.scheme());
        }

        let response = self.client.get(url.clone()).send().await.map_err(describe)?;
        let status = response.status();
        if !status.is_success() {
            bail!("Remote returned {}", status);
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                bail!("Response of {} bytes exceeds limit of {}", length, self.max_bytes);
            }
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(describe)?;
            if body.len() + chunk.len() > self.max_bytes {
                bail!("Response exceeds limit of {} bytes", self.max_bytes);
            }
            body.extend_from_slice(&chunk);
        }

        tracing::info!(url = %url, bytes = body.len(), "Fetched url");
        into_content(url, mime_type, body)
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "fetch_url",
            "Fetch a web page over HTTP(S) and return its body",
            ArgumentSchema::new().required("url", ArgumentKind::String, "Absolute http(s) URL"),
        )
    }
}
