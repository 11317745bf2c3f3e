//! # Webhook Server
//!
//! Minimal HTTP listener for Whapi webhook deliveries. Each POST carries a
//! batch of messages; parsing failures are answered with 200 so the
//! provider does not retry a payload that will never parse.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Health endpoint and per-connection read limits
//! - 1.0.0: Initial webhook intake

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::router::{InboundMessage, MessageRouter};

/// Requests larger than this are rejected outright.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Webhook payload shape as Whapi delivers it. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    id: String,
    chat_id: String,
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    from_name: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    text: Option<WebhookText>,
    #[serde(default)]
    image: Option<WebhookMedia>,
    #[serde(default)]
    video: Option<WebhookMedia>,
    #[serde(default)]
    audio: Option<WebhookMedia>,
    #[serde(default)]
    voice: Option<WebhookMedia>,
    #[serde(default)]
    document: Option<WebhookMedia>,
}

#[derive(Debug, Deserialize)]
struct WebhookText {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct WebhookMedia {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

impl WebhookMessage {
    fn media(&self) -> Option<&WebhookMedia> {
        self.image
            .as_ref()
            .or(self.video.as_ref())
            .or(self.audio.as_ref())
            .or(self.voice.as_ref())
            .or(self.document.as_ref())
    }

    fn into_inbound(self) -> InboundMessage {
        let (text, link) = match (&self.text, self.media()) {
            (Some(text), _) => (Some(text.body.clone()), None),
            (None, Some(media)) => (media.caption.clone(), media.link.clone()),
            (None, None) => (None, None),
        };
        InboundMessage {
            message_id: self.id,
            chat_id: self.chat_id,
            text,
            message_type: if self.message_type.is_empty() {
                "text".to_string()
            } else {
                self.message_type
            },
            from_name: self.from_name,
            from_me: self.from_me,
            timestamp: self.timestamp,
            link,
        }
    }
}

pub struct WebhookServer {
    router: Arc<MessageRouter>,
}

impl WebhookServer {
    pub fn new(router: Arc<MessageRouter>) -> Self {
        WebhookServer { router }
    }

    /// Bind and serve until the process exits.
    pub async fn run(self: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!("Webhook server listening on {bind_addr}");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Webhook connection from {peer}");
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            debug!("Webhook connection ended: {e:#}");
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept webhook connection: {e}");
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let request = match read_request(&mut stream).await {
            Ok(request) => request,
            Err(e) => {
                warn!("Bad webhook request: {e:#}");
                write_response(&mut stream, 400, "{\"status\":\"bad request\"}").await?;
                return Ok(());
            }
        };

        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/webhook") => {
                self.handle_payload(&request.body).await;
                write_response(&mut stream, 200, "{\"status\":\"ok\"}").await
            }
            ("GET", "/health") => write_response(&mut stream, 200, "{\"status\":\"ok\"}").await,
            _ => write_response(&mut stream, 404, "{\"status\":\"not found\"}").await,
        }
    }

    async fn handle_payload(&self, body: &[u8]) {
        let payload: WebhookPayload = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unparseable webhook payload: {e}");
                return;
            }
        };

        for message in payload.messages {
            let inbound = message.into_inbound();
            let message_id = inbound.message_id.clone();
            if let Err(e) = self.router.on_inbound_message(inbound).await {
                error!("Failed to route message {message_id}: {e:#}");
            }
        }
    }
}

struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Just enough HTTP/1.1 to take a webhook POST. No keep-alive, no chunked
/// encoding; Whapi sends plain Content-Length bodies.
async fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = Vec::with_capacity(1024);
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers completed"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers exceed {MAX_HEADER_BYTES} bytes"));
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?.to_string();
    let path = parts.next().ok_or_else(|| anyhow!("missing path"))?.to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse()?;
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body exceeds {MAX_BODY_BYTES} bytes"));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0u8; content_length - body.len()];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(anyhow!("connection closed before body completed"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, path, body })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
