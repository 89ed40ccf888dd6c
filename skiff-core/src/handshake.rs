//! WebSocket handshake implementation
//!
//! The opening handshake from RFC 6455 Section 4: request and response heads
//! are parsed with `httparse` into `http` types and checked here. The server
//! crate decides per request whether to upgrade or answer plain HTTP, so only
//! the client side drives a full handshake over a stream.

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use base64::{engine::general_purpose, Engine as _};
use bytes::BytesMut;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEADERS: usize = 64;

/// A parsed HTTP request head
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// HTTP method as sent
    pub method: String,
    /// Request target, including any query string
    pub uri: String,
    /// Request headers
    pub headers: HeaderMap,
}

impl HandshakeRequest {
    /// Request path without the query string
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(&self.uri, |(path, _)| path)
    }

    /// Raw query string, if any
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, query)| query)
    }

    /// Header value as a string
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the request asks for a WebSocket upgrade
    pub fn is_upgrade(&self) -> bool {
        self.header(&header::UPGRADE)
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
            && self
                .header(&header::CONNECTION)
                .is_some_and(|v| has_token(v, "upgrade"))
    }
}

/// A parsed HTTP response head
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
}

/// Generate a random WebSocket key
pub fn generate_key() -> String {
    let key_bytes = rand::random::<[u8; WEBSOCKET_KEY_LEN]>();
    general_purpose::STANDARD.encode(key_bytes)
}

/// Compute WebSocket accept key from client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validate WebSocket key format
pub fn validate_key(key: &str) -> bool {
    general_purpose::STANDARD
        .decode(key)
        .is_ok_and(|raw| raw.len() == WEBSOCKET_KEY_LEN)
}

/// Parse a complete request head
pub fn parse_request(head: &[u8]) -> Result<HandshakeRequest> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ProtocolError::InvalidFormat("incomplete request head".into()).into())
        }
        Err(e) => return Err(ProtocolError::InvalidFormat(e.to_string()).into()),
    }

    let method = req
        .method
        .ok_or_else(|| ProtocolError::InvalidFormat("missing method".into()))?;
    let uri = req
        .path
        .ok_or_else(|| ProtocolError::InvalidFormat("missing request target".into()))?;

    Ok(HandshakeRequest {
        method: method.to_string(),
        uri: uri.to_string(),
        headers: collect_headers(req.headers)?,
    })
}

/// Parse a complete response head
pub fn parse_response(head: &[u8]) -> Result<HandshakeResponse> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut raw_headers);
    match resp.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ProtocolError::InvalidFormat("incomplete response head".into()).into())
        }
        Err(e) => return Err(ProtocolError::InvalidFormat(e.to_string()).into()),
    }

    let status = resp
        .code
        .ok_or_else(|| ProtocolError::InvalidFormat("missing status".into()))?;

    Ok(HandshakeResponse {
        status,
        headers: collect_headers(resp.headers)?,
    })
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| {
            ProtocolError::InvalidHeaderValue {
                header: h.name.to_string(),
                value: String::from_utf8_lossy(h.value).into_owned(),
            }
        })?;
        let value =
            HeaderValue::from_bytes(h.value).map_err(|_| ProtocolError::InvalidHeaderValue {
                header: h.name.to_string(),
                value: String::from_utf8_lossy(h.value).into_owned(),
            })?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Validate an upgrade request and return its `Sec-WebSocket-Key`
pub fn validate_client_handshake(request: &HandshakeRequest) -> Result<&str> {
    if request.method != "GET" {
        return Err(ProtocolError::InvalidMethod(request.method.clone()).into());
    }

    let upgrade = request
        .header(&header::UPGRADE)
        .ok_or_else(|| ProtocolError::MissingHeader(header::UPGRADE.to_string()))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(ProtocolError::InvalidHeaderValue {
            header: header::UPGRADE.to_string(),
            value: upgrade.to_string(),
        }
        .into());
    }

    let connection = request
        .header(&header::CONNECTION)
        .ok_or_else(|| ProtocolError::MissingHeader(header::CONNECTION.to_string()))?;
    if !has_token(connection, "upgrade") {
        return Err(ProtocolError::InvalidHeaderValue {
            header: header::CONNECTION.to_string(),
            value: connection.to_string(),
        }
        .into());
    }

    let version = request
        .header(&header::SEC_WEBSOCKET_VERSION)
        .ok_or_else(|| ProtocolError::MissingHeader(header::SEC_WEBSOCKET_VERSION.to_string()))?;
    if version != WEBSOCKET_VERSION {
        return Err(ProtocolError::UnsupportedVersion.into());
    }

    let key = request
        .header(&header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| ProtocolError::MissingHeader(header::SEC_WEBSOCKET_KEY.to_string()))?;
    if !validate_key(key) {
        return Err(ProtocolError::InvalidHeaderValue {
            header: header::SEC_WEBSOCKET_KEY.to_string(),
            value: key.to_string(),
        }
        .into());
    }

    Ok(key)
}

/// Validate the server's answer to a request sent with `key`
pub fn validate_server_handshake(response: &HandshakeResponse, key: &str) -> Result<()> {
    if response.status != 101 {
        return Err(ProtocolError::UnexpectedStatus(response.status).into());
    }

    let expected = compute_accept_key(key);
    let received = response
        .headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProtocolError::MissingHeader(header::SEC_WEBSOCKET_ACCEPT.to_string()))?;
    if received != expected {
        return Err(ProtocolError::InvalidAcceptKey {
            expected,
            received: received.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Render the upgrade request a client sends
pub fn request_to_string(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n\r\n"
    )
}

/// Render the `101 Switching Protocols` answer for `key`
pub fn response_to_string(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(key)
    )
}

/// Render a plain HTTP rejection of a failed upgrade
pub fn reject_to_string(status: u16, reason: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Connection: close\r\n\
         Content-Length: 0\r\n\r\n"
    )
}

/// Read from `reader` into `buf` until a full HTTP head has arrived.
///
/// The head, including its terminating blank line, is split off and
/// returned. Bytes the peer sent after the head stay in `buf`.
pub async fn read_head<R>(reader: &mut R, buf: &mut BytesMut) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut scanned: usize = 0;
    loop {
        let window_start = scanned.saturating_sub(3);
        if let Some(pos) = buf[window_start..]
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
        {
            return Ok(buf.split_to(window_start + pos + 4));
        }
        scanned = buf.len();

        if buf.len() >= MAX_HEADER_SIZE {
            return Err(ProtocolError::HeaderTooLarge {
                max: MAX_HEADER_SIZE,
            }
            .into());
        }

        buf.reserve(1024);
        if reader.read_buf(buf).await? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }
    }
}

/// Run the client side of the opening handshake over `stream`.
///
/// Returns any bytes the server sent after its response head; they belong
/// to the first frames of the connection.
pub async fn client_handshake<S>(stream: &mut S, host: &str, path: &str) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    stream
        .write_all(request_to_string(host, path, &key).as_bytes())
        .await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    let head = read_head(stream, &mut buf).await?;
    let response = parse_response(&head)?;
    validate_server_handshake(&response, &key)?;
    Ok(buf)
}
