#![cfg(all(feature = "server", feature = "transport-tcp"))]

use skiff::prelude::*;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn http_routes_and_static_files_share_the_listener() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();

    let mut http = HttpRoutes::new();
    http.get("/users/:id").handler(|server: ServerHandle, stream: HttpStream| async move {
        let count = server.manager().connection_count().await;
        stream.end(format!("user {} of {count}", stream.param("id").unwrap_or_default()));
        Ok(())
    });
    http.post("/echo").handler(|_: ServerHandle, stream: HttpStream| async move {
        let name = stream.form().get_str("name").unwrap_or_default().to_string();
        stream.end(name);
        Ok(())
    });
    http.set_static_path("/", dir.path()).unwrap();

    let listener = Server::builder()
        .bind("127.0.0.1:0")
        .ws_path("/ws")
        .http_router(http)
        .build()
        .unwrap()
        .listen()
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = listener.handle();
    let serving = tokio::spawn(listener.serve());

    let out = request(addr, "GET /users/9 HTTP/1.1\r\nHost: a\r\n\r\n").await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
    assert!(out.ends_with("user 9 of 0"), "{out}");

    let body = "name=skiff";
    let out = request(
        addr,
        &format!(
            "POST /echo HTTP/1.1\r\nHost: a\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    )
    .await;
    assert!(out.ends_with("\r\n\r\nskiff"), "{out}");

    let out = request(addr, "DELETE /echo HTTP/1.1\r\nHost: a\r\n\r\n").await;
    assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{out}");

    let out = request(addr, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
    assert!(out.contains("content-type: text/html"), "{out}");
    assert!(out.ends_with("<h1>home</h1>"), "{out}");

    let out = request(addr, "GET /missing.txt HTTP/1.1\r\nHost: a\r\n\r\n").await;
    assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"), "{out}");

    handle.shutdown();
    serving.await.unwrap().unwrap();
}
