//! Loopback identity frame.
//!
//! Outside a browser there is no frame to embed the broker page in. Instead
//! the broker page is opened by a launcher (the CLI prints the URL) with a
//! `callback` parameter pointing at a local listener, and the page POSTs its
//! result there. The request's `Origin` header becomes the message origin.

use crate::frame::IdentityFrame;
use crate::protocol::{FrameMessage, InitMessage};
use crate::{BridgeError, BridgeResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use url::Url;

/// Default callback port.
pub const DEFAULT_CALLBACK_PORT: u16 = 9876;

const MAX_BODY_BYTES: usize = 1 << 20;

/// Opens the broker URL for the user.
pub type Launcher = Arc<dyn Fn(&Url) + Send + Sync>;

struct Listener {
    port: u16,
    task: JoinHandle<()>,
}

pub struct LoopbackFrame {
    broker_url: Url,
    port: u16,
    launcher: Launcher,
    messages: broadcast::Sender<FrameMessage>,
    listener: Mutex<Option<Listener>>,
}

impl LoopbackFrame {
    /// `port` 0 picks a free port on load.
    pub fn new(broker_url: Url, port: u16, launcher: Launcher) -> Self {
        let (messages, _) = broadcast::channel(16);
        Self {
            broker_url,
            port,
            launcher,
            messages,
            listener: Mutex::new(None),
        }
    }

    /// Callback URL of the running listener.
    pub fn callback_url(&self) -> Option<String> {
        self.listener
            .lock()
            .as_ref()
            .map(|listener| format!("http://127.0.0.1:{}/callback", listener.port))
    }

    /// Broker URL carrying the login hint and the callback.
    pub fn launch_url(&self, message: &InitMessage) -> BridgeResult<Url> {
        let callback = self.callback_url().ok_or_else(|| {
            BridgeError::FrameUnavailable("callback listener not started".to_string())
        })?;
        let mut url = self.broker_url.clone();
        url.query_pairs_mut()
            .append_pair("login_hint", &message.login_hint)
            .append_pair("callback", &callback);
        Ok(url)
    }
}

#[async_trait]
impl IdentityFrame for LoopbackFrame {
    fn origin(&self) -> String {
        self.broker_url.origin().ascii_serialization()
    }

    async fn load(&self) -> BridgeResult<()> {
        if self.listener.lock().is_some() {
            return Ok(());
        }

        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            BridgeError::FrameUnavailable(format!("failed to bind to {}: {}", addr, e))
        })?;
        let port = listener.local_addr()?.port();
        info!(port, "identity callback listener started");

        let messages = self.messages.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let messages = messages.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, messages).await {
                                error!(error = %e, "callback connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "callback accept failed");
                        break;
                    }
                }
            }
        });

        *self.listener.lock() = Some(Listener { port, task });
        Ok(())
    }

    async fn post_message(&self, message: &InitMessage, target_origin: &str) -> BridgeResult<()> {
        if target_origin != self.origin() {
            return Err(BridgeError::FrameUnavailable(format!(
                "target origin {} does not match the broker",
                target_origin
            )));
        }
        let url = self.launch_url(message)?;
        info!(broker = %self.broker_url, "opening identity broker");
        (self.launcher)(&url);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FrameMessage> {
        self.messages.subscribe()
    }

    async fn close(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.task.abort();
            debug!(port = listener.port, "identity callback listener stopped");
        }
    }
}

impl Drop for LoopbackFrame {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.task.abort();
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    messages: broadcast::Sender<FrameMessage>,
) -> BridgeResult<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    debug!(request = %request_line.trim(), "callback request");

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut origin = None;
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "origin" => origin = Some(value.trim().to_string()),
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    if !path.starts_with("/callback") {
        return send_response(&mut writer, 404, "Not Found", origin.as_deref(), "Not Found").await;
    }

    match method.as_str() {
        "OPTIONS" => send_response(&mut writer, 204, "No Content", origin.as_deref(), "").await,
        "POST" => {
            if content_length > MAX_BODY_BYTES {
                return send_response(&mut writer, 413, "Payload Too Large", origin.as_deref(), "")
                    .await;
            }
            let Some(origin) = origin else {
                return send_response(&mut writer, 400, "Bad Request", None, "Missing Origin").await;
            };

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await?;
            let text = String::from_utf8_lossy(&body).into_owned();
            let data = serde_json::from_str(&text).unwrap_or(Value::String(text));

            let _ = messages.send(FrameMessage {
                origin: origin.clone(),
                data,
            });
            send_response(&mut writer, 200, "OK", Some(&origin), DONE_PAGE).await
        }
        _ => {
            send_response(
                &mut writer,
                405,
                "Method Not Allowed",
                origin.as_deref(),
                "Method Not Allowed",
            )
            .await
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::tcp::WriteHalf<'_>,
    status_code: u16,
    status_text: &str,
    allow_origin: Option<&str>,
    body: &str,
) -> BridgeResult<()> {
    let cors = match allow_origin {
        Some(origin) => format!(
            "Access-Control-Allow-Origin: {}\r\nAccess-Control-Allow-Methods: POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\n",
            origin
        ),
        None => String::new(),
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\n{}Content-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        cors,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

const DONE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>PassPal</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<p>認証が完了しました。このウィンドウを閉じてください。</p>
</body>
</html>"#;
