//! HTTP Upgrade handshake - the one-time exchange that promotes a raw byte
//! stream into a WebSocket session.
//!
//! Runs strictly before any frame is accepted, once per connection:
//! - server side: read the request head, validate the upgrade headers,
//!   answer `101 Switching Protocols` (or `400` and fail)
//! - client side: send the upgrade request, verify the accept key echo
//!
//! Any bytes that arrive after the head terminator are returned to the
//! caller; a peer may legally pipeline frames behind the handshake.

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SockwireError};

/// Key-derivation GUID fixed by RFC 6455.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Cap on the request/response head; anything longer is rejected.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Derive the `Sec-WebSocket-Accept` value for a client key.
///
/// # Example
///
/// ```
/// use sockwire::handshake::compute_accept_key;
///
/// // Vector from RFC 6455 section 1.3.
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Fresh 16-byte `Sec-WebSocket-Key`, base64-encoded.
fn generate_key() -> Result<String> {
    let mut key = [0u8; 16];
    getrandom::fill(&mut key).map_err(std::io::Error::other)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(key))
}

/// Parsed HTTP/1.1 request head.
#[derive(Debug)]
pub struct UpgradeRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header values keyed by lowercased name; repeated headers are joined
    /// with ", " (relevant for `Connection`).
    headers: HashMap<String, String>,
}

impl UpgradeRequest {
    /// Parse a request head (everything before the blank line).
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(SockwireError::Handshake(format!(
                "malformed request line: {request_line:?}"
            )));
        };

        let mut headers: HashMap<String, String> = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(SockwireError::Handshake(format!(
                    "malformed header line: {line:?}"
                )));
            };
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            headers
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    /// Validate the upgrade requirements and return the client key.
    ///
    /// Checks: GET over HTTP/1.1, `Connection` lists "upgrade", `Upgrade`
    /// names "websocket", version 13, and a key that decodes to 16 bytes.
    pub fn websocket_key(&self) -> Result<&str> {
        if self.method != "GET" {
            return Err(SockwireError::Handshake(format!(
                "method must be GET, got {}",
                self.method
            )));
        }
        if self.version != "HTTP/1.1" {
            return Err(SockwireError::Handshake(format!(
                "HTTP/1.1 required, got {}",
                self.version
            )));
        }

        let connection = self.header("connection").unwrap_or_default();
        let upgrade_listed = connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !upgrade_listed {
            return Err(SockwireError::Handshake(
                "Connection header does not list upgrade".to_string(),
            ));
        }

        let upgrade = self.header("upgrade").unwrap_or_default();
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(SockwireError::Handshake(
                "Upgrade header is not websocket".to_string(),
            ));
        }

        match self.header("sec-websocket-version") {
            Some("13") => {}
            other => {
                return Err(SockwireError::Handshake(format!(
                    "unsupported Sec-WebSocket-Version: {other:?}"
                )));
            }
        }

        let Some(key) = self.header("sec-websocket-key") else {
            return Err(SockwireError::Handshake(
                "missing Sec-WebSocket-Key".to_string(),
            ));
        };
        match base64::engine::general_purpose::STANDARD.decode(key) {
            Ok(decoded) if decoded.len() == 16 => Ok(key),
            _ => Err(SockwireError::Handshake(
                "Sec-WebSocket-Key is not 16 base64 bytes".to_string(),
            )),
        }
    }
}

/// `101 Switching Protocols` response for a validated client key.
pub fn accept_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        compute_accept_key(client_key)
    )
}

/// `400 Bad Request` response carrying the rejection reason.
pub fn reject_response(reason: &str) -> String {
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Connection: close\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {reason}",
        reason.len()
    )
}

/// Read a head (request or response) up to the `\r\n\r\n` terminator.
///
/// Returns the head text and any bytes read past the terminator.
async fn read_head<S>(stream: &mut S) -> Result<(String, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(at) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let leftover = buf.split_off(at + 4);
            buf.truncate(at);
            let head = String::from_utf8(buf).map_err(|_| {
                SockwireError::Handshake("head is not valid UTF-8".to_string())
            })?;
            return Ok((head, leftover));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(SockwireError::Handshake(format!(
                "head exceeds {MAX_HEAD_BYTES} bytes"
            )));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(SockwireError::Handshake(
                "connection closed during handshake".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Server side of the upgrade: read, validate, answer.
///
/// On success the 101 response has been written and the returned bytes (if
/// any) are frame data that arrived behind the request head. On failure a
/// 400 response is written best-effort and the error is returned.
pub async fn server_upgrade<S>(stream: &mut S) -> Result<(UpgradeRequest, Vec<u8>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, leftover) = read_head(stream).await?;

    let validated = UpgradeRequest::parse(&head).and_then(|request| {
        let response = accept_response(request.websocket_key()?);
        Ok((request, response))
    });

    match validated {
        Ok((request, response)) => {
            stream.write_all(response.as_bytes()).await?;
            stream.flush().await?;
            Ok((request, leftover))
        }
        Err(err) => {
            let reply = reject_response(&err.to_string());
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.flush().await;
            Err(err)
        }
    }
}

/// Client side of the upgrade: send the request, verify the accept echo.
///
/// Returns any bytes that arrived behind the 101 response head.
pub async fn client_upgrade<S>(stream: &mut S, host: &str, path: &str) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key()?;
    let expected = compute_accept_key(&key);

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let (head, leftover) = read_head(stream).await?;
    verify_accept(&head, &expected)?;
    Ok(leftover)
}

/// Check a response head for status 101 and the expected accept key.
fn verify_accept(head: &str, expected: &str) -> Result<()> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "101" {
        return Err(SockwireError::Handshake(format!(
            "upgrade refused: {status_line}"
        )));
    }

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
                if value.trim() == expected {
                    return Ok(());
                }
                return Err(SockwireError::Handshake(
                    "Sec-WebSocket-Accept mismatch".to_string(),
                ));
            }
        }
    }
    Err(SockwireError::Handshake(
        "missing Sec-WebSocket-Accept".to_string(),
    ))
}
