//! Chat Server Example
//!
//! Peers connect on `/ws` and send `/chat/say` packets; every message is
//! broadcast to all peers as `/chat/message`. `GET /health` reports the
//! number of connected peers.

use skiff::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    skiff::server::init_logging().map_err(|e| e.to_string())?;

    let mut router = SocketRouter::new();
    router.group("/chat").handler(|r| {
        r.route("say").handler(|conn: ServerConnection, stream: SocketStream| async move {
            let Some(manager) = conn.manager() else {
                return Ok(());
            };
            let mut line = format!("#{}: ", conn.id()).into_bytes();
            line.extend_from_slice(stream.payload());
            let sent = manager.broadcast(0, "/chat/message", &line).await;
            tracing::debug!(from = conn.id(), sent, "chat message");
            Ok(())
        });
        r.route("rename/:name").handler(|conn: ServerConnection, stream: SocketStream| async move {
            let name = stream.param("name").unwrap_or("anon");
            conn.emit(stream.id(), "/chat/renamed", name).await
        });
    });

    let mut http = HttpRoutes::new();
    http.get("/health").handler(|server: ServerHandle, stream: HttpStream| async move {
        let peers = server.manager().connection_count().await;
        stream.end(format!("ok {peers}"));
        Ok(())
    });

    let server = Server::builder()
        .bind("127.0.0.1:8080")
        .ws_path("/ws")
        .heartbeat_interval(Duration::from_secs(15))
        .heartbeat_timeout(Duration::from_secs(45))
        .on_open(|conn| tracing::info!(id = conn.id(), "joined"))
        .on_close(|conn| tracing::info!(id = conn.id(), "left"))
        .router(router)
        .http_router(http)
        .build()?;

    println!("chat server on ws://127.0.0.1:8080/ws");
    server
        .serve_with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}
