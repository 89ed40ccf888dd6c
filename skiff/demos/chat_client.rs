//! Chat Client Example
//!
//! Connects to the chat server, prints every broadcast and sends each line
//! typed on stdin as a `/chat/say` packet. Reconnects every two seconds if
//! the server goes away.

use skiff::prelude::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut router = SocketRouter::new();
    router.route("/chat/message").handler(|_: Client, stream: SocketStream| async move {
        println!("{}", String::from_utf8_lossy(stream.payload()));
        Ok(())
    });

    let client = Client::builder("127.0.0.1:8080")
        .configure(|c| {
            c.path("/ws")
                .heartbeat_interval(Duration::from_secs(15))
                .heartbeat_timeout(Duration::from_secs(45))
                .reconnect_interval(Duration::from_secs(2))
        })
        .on_open(|_| println!("connected"))
        .on_close(|_| println!("disconnected"))
        .on_error(|e| eprintln!("error: {e}"))
        .on_reconnecting(|_| println!("reconnecting"))
        .router(router)
        .build()?;
    let running = client.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Err(e) = client.emit(0, "/chat/say", line).await {
            eprintln!("not sent: {e}");
        }
    }

    client.shutdown();
    running.await??;
    Ok(())
}
