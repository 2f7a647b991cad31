//! Echo server and client over one loopback socket.
//!
//! This example demonstrates:
//! - Building a server with a typed operation handler
//! - Connecting a client and invoking the operation
//! - Closing the session gracefully
//!
//! # Running
//!
//! ```sh
//! cargo run --example echo
//! ```

use serde::{Deserialize, Serialize};
use sockwire::transport::Listener;
use sockwire::{Client, CloseCode, Server};

/// Input structure for the echo operation.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo operation.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Build the server with the fluent API
    let server = Server::builder()
        // Register the "echo" operation handler
        .handle("echo", |input: EchoInput, _ctx| async move {
            Ok(EchoOutput { echo: input.message })
        })
        .build()?;

    // Serve on an ephemeral loopback port
    let listener = Listener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            eprintln!("server stopped: {e}");
        }
    });

    // Connect, call, print the typed reply
    let session = Client::builder().connect(&addr.to_string(), "/echo").await?;
    let output: EchoOutput = session
        .invoke("echo", &EchoInput { message: "hello".into() })
        .await?;
    println!("{output:?}");

    session.close(CloseCode::Normal, "done").await?;
    Ok(())
}
