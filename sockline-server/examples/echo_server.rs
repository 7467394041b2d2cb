//! Echo server
//!
//! Answers every text message with `Your message to the server was: '<text>'`.
//! Run with `RUST_LOG=debug` to watch connections come and go.

use sockline_server::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sockline_server::init_logging()?;

    let server = ServerBuilder::new()
        .bind("127.0.0.1:8080")?
        .max_connections(1000)
        .build()?;

    println!("WebSocket server listening on ws://127.0.0.1:8080");

    server.serve().await?;

    Ok(())
}
