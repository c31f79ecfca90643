//! Unix socket server for the dashboard
//!
//! Newline-delimited JSON: one request per line in, one response per line
//! out. Run events are interleaved on every open connection as they are
//! broadcast.

use crate::protocol::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const BROADCAST_CAPACITY: usize = 256;

const ENCODING_FAILED: &str = "{\"type\":\"response\",\"id\":null,\"data\":{\"error\":\"encoding failed\"}}";

pub struct SocketServer {
    path: PathBuf,
    listener: UnixListener,
    broadcast_tx: broadcast::Sender<String>,
}

impl SocketServer {
    /// Replaces a stale socket file left by an earlier run.
    pub async fn bind(path: &Path) -> std::io::Result<Self> {
        let _ = std::fs::remove_file(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        info!("Socket server listening on {:?}", path);
        Ok(Self { path: path.to_path_buf(), listener, broadcast_tx })
    }

    pub fn broadcast_sender(&self) -> broadcast::Sender<String> {
        self.broadcast_tx.clone()
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn socket_path() -> PathBuf {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/run/user/{}/cancerdetect.sock", uid))
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Parses one received line. Blank lines carry no request.
pub fn decode_request(line: &str) -> Option<Result<Request, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// One response as a newline-terminated line.
pub fn encode_response(response: &Response) -> String {
    match serde_json::to_string(response) {
        Ok(json) => frame(json),
        Err(e) => {
            error!("Failed to encode response: {}", e);
            frame(ENCODING_FAILED.to_string())
        }
    }
}

fn frame(mut message: String) -> String {
    message.push('\n');
    message
}

async fn answer<H: RequestHandler>(handler: &H, line: &str) -> Option<Response> {
    match decode_request(line)? {
        Ok(request) => {
            debug!("Request: {:?}", request);
            Some(handler.handle(request).await)
        }
        Err(e) => {
            warn!("Invalid request: {}", e);
            Some(Response::error(format!("invalid request: {}", e)))
        }
    }
}

/// Serves one connection until the peer closes it or a write fails.
pub async fn handle_client<S, H>(stream: S, mut broadcast_rx: broadcast::Receiver<String>, handler: Arc<H>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: RequestHandler + Send + Sync + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        let outgoing = tokio::select! {
            received = lines.next_line() => match received {
                Ok(Some(line)) => match answer(handler.as_ref(), &line).await {
                    Some(response) => encode_response(&response),
                    None => continue,
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Read error: {}", e);
                    break;
                }
            },
            event = broadcast_rx.recv() => match event {
                Ok(msg) => frame(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagging, dropped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if let Err(e) = writer.write_all(outgoing.as_bytes()).await {
            error!("Failed to write to client: {}", e);
            break;
        }
    }
}

#[async_trait::async_trait]
pub trait RequestHandler {
    async fn handle(&self, request: Request) -> Response;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_carry_no_request() {
        assert!(decode_request("").is_none());
        assert!(decode_request("   \r").is_none());
    }

    #[test]
    fn test_decode_trims_line_endings() {
        assert!(matches!(decode_request("{\"cmd\":\"ping\"}\r"), Some(Ok(Request::Ping))));
        assert!(matches!(decode_request("{\"cmd\":"), Some(Err(_))));
    }

    #[test]
    fn test_encoded_response_is_one_line() {
        let line = encode_response(&Response::error("bad\nthing"));
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["data"]["error"], "bad\nthing");
    }
}
