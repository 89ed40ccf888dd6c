//! Plain HTTP requests on the server port
//!
//! Requests without an upgrade header are answered here: routed through the
//! [`HttpRouter`] by method and path, then the static mount, then `404`.
//! Every response closes the connection.

use crate::server::ServerHandle;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use skiff_core::error::{ProtocolError, ValueError};
use skiff_core::handshake::HandshakeRequest;
use skiff_core::peer::ErrorFn;
use skiff_core::router::{HttpRouter, Params, StaticLookup};
use skiff_core::stream::Context;
use skiff_core::value::{FieldMap, Store};
use skiff_core::Result;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Router type serving HTTP requests
pub type Router = HttpRouter<ServerHandle, HttpStream>;

/// A parsed HTTP request
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    query: Store,
    form: Store,
    remote_addr: SocketAddr,
}

impl HttpRequest {
    fn new(method: Method, head: HandshakeRequest, body: Bytes, remote_addr: SocketAddr) -> Self {
        let query = head
            .query()
            .and_then(|query| Store::parse(query).ok())
            .unwrap_or_default();

        let is_form = head
            .header(&header::CONTENT_TYPE)
            .is_some_and(|value| value.starts_with(FORM_URLENCODED));
        let form = if is_form {
            std::str::from_utf8(&body)
                .ok()
                .and_then(|body| Store::parse(body).ok())
                .unwrap_or_default()
        } else {
            Store::new()
        };

        Self {
            method,
            uri: head.uri,
            headers: head.headers,
            body,
            query,
            form,
            remote_addr,
        }
    }

    fn path(&self) -> &str {
        self.uri.split_once('?').map_or(&self.uri, |(path, _)| path)
    }
}

#[derive(Debug)]
struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    ended: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            ended: false,
        }
    }
}

impl Response {
    fn with_body(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut response = Self {
            status,
            body: body.into(),
            ended: true,
            ..Self::default()
        };
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn render(&self, head_only: bool) -> BytesMut {
        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.put_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("")
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            if name == header::CONTENT_LENGTH || name == header::CONNECTION {
                continue;
            }
            out.put_slice(name.as_str().as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        out.put_slice(b"Connection: close\r\n\r\n");
        if !head_only {
            out.put_slice(&self.body);
        }
        out
    }
}

/// One HTTP request with its response under construction.
///
/// Clones share the request, the context and the response, so hooks and
/// the handler of a route all see each other's changes.
#[derive(Debug, Clone)]
pub struct HttpStream {
    request: Arc<HttpRequest>,
    params: Params,
    context: Context,
    response: Arc<Mutex<Response>>,
}

impl HttpStream {
    fn new(request: HttpRequest) -> Self {
        Self {
            request: Arc::new(request),
            params: Params::new(),
            context: Context::new(),
            response: Arc::default(),
        }
    }

    fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    fn response(&self) -> std::sync::MutexGuard<'_, Response> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.request.method
    }

    /// Request path without the query string
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Request target as sent
    pub fn uri(&self) -> &str {
        &self.request.uri
    }

    /// `Host` header, empty when absent
    pub fn host(&self) -> &str {
        self.header(&header::HOST).unwrap_or_default()
    }

    /// `https` behind a proxy that says so, `http` otherwise
    pub fn scheme(&self) -> &str {
        match self.header(&HeaderName::from_static("x-forwarded-proto")) {
            Some(proto) if proto.trim().eq_ignore_ascii_case("https") => "https",
            _ => "http",
        }
    }

    /// Absolute request URL built from the scheme, host and target
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme(), self.host(), self.uri())
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    /// Request header as a string
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Query string values
    pub fn query(&self) -> &Store {
        &self.request.query
    }

    /// Urlencoded form values from the body
    pub fn form(&self) -> &Store {
        &self.request.form
    }

    /// Raw request body
    pub fn body(&self) -> &Bytes {
        &self.request.body
    }

    /// Decode the body as JSON
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.request.body)?)
    }

    /// Fill `target` from the query, then the form
    pub fn bind<T>(&self, fields: &FieldMap<T>, target: &mut T) -> std::result::Result<(), ValueError> {
        let mut values = self.request.query.clone();
        for (name, value) in self.request.form.iter() {
            values.add(name, value.clone());
        }
        fields.apply(&values, target)
    }

    /// Socket address of the peer
    pub fn remote_addr(&self) -> SocketAddr {
        self.request.remote_addr
    }

    /// Client address, preferring `X-Forwarded-For` and `X-Real-IP`
    pub fn client_ip(&self) -> IpAddr {
        let forwarded = self
            .header(&HeaderName::from_static("x-forwarded-for"))
            .and_then(|value| value.split(',').next())
            .or_else(|| self.header(&HeaderName::from_static("x-real-ip")));
        forwarded
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or_else(|| self.request.remote_addr.ip())
    }

    /// Route parameters
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// A single route parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Values shared between the hooks and the handler of this request
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Response status so far
    pub fn status(&self) -> StatusCode {
        self.response().status
    }

    /// Set the response status
    pub fn set_status(&self, status: StatusCode) {
        self.response().status = status;
    }

    /// Set a response header
    pub fn set_header(&self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value).map_err(|_| ProtocolError::InvalidHeaderValue {
            header: name.to_string(),
            value: value.to_string(),
        })?;
        self.response().headers.insert(name, value);
        Ok(())
    }

    /// Set the response body and finish the response
    pub fn end(&self, body: impl Into<Bytes>) {
        let mut response = self.response();
        response.body = body.into();
        response.ended = true;
    }

    /// Finish the response with a JSON body
    #[cfg(feature = "json")]
    pub fn end_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        let mut response = self.response();
        response
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.body = body.into();
        response.ended = true;
        Ok(())
    }

    /// Finish the response with the contents of `file`, typed by its extension
    pub async fn end_file(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        let contents = tokio::fs::read(file).await?;
        let mut response = self.response();
        response
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(file)));
        response.body = contents.into();
        response.ended = true;
        Ok(())
    }

    /// Whether a body has been set with `end`
    pub fn is_ended(&self) -> bool {
        self.response().ended
    }
}

/// Guess a `Content-Type` from a file extension
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Answers plain HTTP requests
pub(crate) struct HttpService {
    pub(crate) router: Option<Arc<Router>>,
    pub(crate) handle: ServerHandle,
    pub(crate) on_error: ErrorFn,
    pub(crate) max_body_size: usize,
}

impl HttpService {
    /// Read the body, answer the request and close the stream
    pub(crate) async fn respond<S>(&self, mut stream: S, head: HandshakeRequest, mut buf: BytesMut, remote_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let head_only = head.method.eq_ignore_ascii_case("HEAD");
        let response = match self.read_request(&mut stream, head, &mut buf, remote_addr).await {
            Ok(Some(request)) => self.answer(request).await,
            Ok(None) => return,
            Err(response) => response,
        };
        debug!(status = response.status.as_u16(), "http response");

        if let Err(e) = stream.write_all(&response.render(head_only)).await {
            trace!(error = %e, "http response not written");
            return;
        }
        if let Err(e) = stream.shutdown().await {
            trace!(error = %e, "http shutdown failed");
        }
    }

    async fn read_request<S>(
        &self,
        stream: &mut S,
        head: HandshakeRequest,
        buf: &mut BytesMut,
        remote_addr: SocketAddr,
    ) -> std::result::Result<Option<HttpRequest>, Response>
    where
        S: AsyncRead + Unpin,
    {
        let Ok(method) = Method::from_bytes(head.method.as_bytes()) else {
            return Err(Response::with_body(StatusCode::BAD_REQUEST, "invalid method"));
        };
        if head.headers.contains_key(header::TRANSFER_ENCODING) {
            return Err(Response::with_body(StatusCode::LENGTH_REQUIRED, "length required"));
        }

        let length = match head.header(&header::CONTENT_LENGTH) {
            None => 0,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(length) => length,
                Err(_) => {
                    return Err(Response::with_body(StatusCode::BAD_REQUEST, "invalid content-length"))
                }
            },
        };
        if length > self.max_body_size {
            return Err(Response::with_body(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"));
        }

        while buf.len() < length {
            buf.reserve(length - buf.len());
            match stream.read_buf(buf).await {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) => {
                    trace!(error = %e, "http body not read");
                    return Ok(None);
                }
            }
        }
        let body = buf.split_to(length).freeze();

        Ok(Some(HttpRequest::new(method, head, body, remote_addr)))
    }

    async fn answer(&self, request: HttpRequest) -> Response {
        let method = request.method.clone();
        let path = request.path().to_string();

        if let Some(router) = &self.router {
            if let Some((route, params)) = router.resolve(method.as_str(), &path) {
                let stream = HttpStream::new(request).with_params(params);
                let result = route.run(self.handle.clone(), stream.clone()).await;
                let mut response = std::mem::take(&mut *stream.response());
                if let Err(e) = result {
                    (self.on_error)(&e);
                    if !response.ended {
                        response = Response::with_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
                    }
                }
                return response;
            }

            let allowed = router.allowed_methods(&path);
            if !allowed.is_empty() {
                let mut response = Response::with_body(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
                if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                    response.headers.insert(header::ALLOW, value);
                }
                return response;
            }

            if method == Method::GET || method == Method::HEAD {
                match router.lookup_static(&path).await {
                    StaticLookup::File(file) => return serve_file(&file).await,
                    StaticLookup::Forbidden => {
                        return Response::with_body(StatusCode::FORBIDDEN, "forbidden")
                    }
                    StaticLookup::NotFound | StaticLookup::Unmatched => {}
                }
            }
        }

        Response::with_body(StatusCode::NOT_FOUND, format!("{path} 404 not found"))
    }
}

async fn serve_file(file: &Path) -> Response {
    match tokio::fs::read(file).await {
        Ok(contents) => {
            let mut response = Response {
                body: contents.into(),
                ended: true,
                ..Response::default()
            };
            response
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(file)));
            response
        }
        Err(e) => {
            debug!(error = %e, file = %file.display(), "static file not read");
            Response::with_body(StatusCode::NOT_FOUND, "not found")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ConnectionManager;
    use skiff_core::handshake::parse_request;
    use skiff_core::Error;
    use tokio_util::sync::CancellationToken;

    fn service(router: Router) -> HttpService {
        HttpService {
            router: Some(Arc::new(router)),
            handle: ServerHandle::new(Arc::new(ConnectionManager::new()), CancellationToken::new()),
            on_error: Arc::new(|_| {}),
            max_body_size: 64,
        }
    }

    async fn roundtrip(service: &HttpService, raw: &str) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut buf = BytesMut::from(raw.as_bytes());
        let head = skiff_core::handshake::read_head(&mut tokio::io::empty(), &mut buf)
            .await
            .unwrap();
        let request = parse_request(&head).unwrap();
        service
            .respond(server, request, buf, "127.0.0.1:9".parse().unwrap())
            .await;

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out
    }

    fn users_router() -> Router {
        let mut router = Router::new();
        router
            .get("/users/:id")
            .before(|_h: ServerHandle, s: HttpStream| async move {
                s.context().insert(String::from("checked"));
                Ok(())
            })
            .handler(|_h: ServerHandle, s: HttpStream| async move {
                let mark = s.context().get::<String>().unwrap_or_default();
                let page = s.query().get_str("page").unwrap_or("1").to_string();
                s.set_header(header::CONTENT_TYPE, "text/plain")?;
                s.end(format!("{} {} {}", s.param("id").unwrap_or("?"), page, mark));
                Ok(())
            });
        router
            .post("/form")
            .handler(|_h: ServerHandle, s: HttpStream| async move {
                s.set_status(StatusCode::CREATED);
                s.end(s.form().get_str("name").unwrap_or("").to_string());
                Ok(())
            });
        router
            .get("/fail")
            .handler(|_h: ServerHandle, _s: HttpStream| async move { Err(Error::other("boom")) });
        router
    }

    #[tokio::test]
    async fn test_route_with_params_query_and_context() {
        let out = roundtrip(
            &service(users_router()),
            "GET /users/7?page=3 HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("content-type: text/plain\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\n7 3 checked"));
    }

    #[tokio::test]
    async fn test_form_body() {
        let out = roundtrip(
            &service(users_router()),
            "POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 8\r\n\r\nname=ada",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(out.ends_with("ada"));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let service = service(users_router());

        let out = roundtrip(&service, "GET /nope HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.ends_with("/nope 404 not found"));

        let out = roundtrip(&service, "DELETE /users/1 HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(out.contains("allow: GET\r\n"));

        let out = roundtrip(&service, "GET /fail HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));

        let out = roundtrip(&service, "POST /form HTTP/1.1\r\nContent-Length: 1000\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn test_static_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("app.css"), "body{}").unwrap();

        let mut router = Router::new();
        router.set_static_path("/static", dir.path()).unwrap();
        let service = service(router);

        let out = roundtrip(&service, "GET /static/app.css HTTP/1.1\r\n\r\n").await;
        assert!(out.contains("content-type: text/css; charset=utf-8\r\n"));
        assert!(out.ends_with("body{}"));

        let out = roundtrip(&service, "GET /static/ HTTP/1.1\r\n\r\n").await;
        assert!(out.ends_with("<h1>home</h1>"));

        let out = roundtrip(&service, "HEAD /static/app.css HTTP/1.1\r\n\r\n").await;
        assert!(out.contains("Content-Length: 6\r\n"));
        assert!(out.ends_with("\r\n\r\n"));

        let out = roundtrip(&service, "GET /static/../secret HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn test_request_url_and_file_response() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("report.json");
        std::fs::write(&report, "{}").unwrap();

        let mut router = Router::new();
        router.get("/where").handler(|_h: ServerHandle, s: HttpStream| async move {
            s.end(format!("{} {} {}", s.scheme(), s.host(), s.url()));
            Ok(())
        });
        router.get("/report").handler(move |_h: ServerHandle, s: HttpStream| {
            let report = report.clone();
            async move { s.end_file(report).await }
        });
        router.get("/gone").handler(|_h: ServerHandle, s: HttpStream| async move {
            s.end_file("/definitely/not/here.txt").await
        });
        let service = service(router);

        let out = roundtrip(&service, "GET /where?x=1 HTTP/1.1\r\nHost: example.org\r\n\r\n").await;
        assert!(out.ends_with("http example.org http://example.org/where?x=1"), "{out}");

        let out = roundtrip(
            &service,
            "GET /where HTTP/1.1\r\nHost: example.org\r\nX-Forwarded-Proto: https\r\n\r\n",
        )
        .await;
        assert!(out.ends_with("https://example.org/where"), "{out}");

        let out = roundtrip(&service, "GET /report HTTP/1.1\r\n\r\n").await;
        assert!(out.contains("content-type: application/json\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\n{}"), "{out}");

        let out = roundtrip(&service, "GET /gone HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{out}");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a/b.JS")), "text/javascript; charset=utf-8");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }
}
