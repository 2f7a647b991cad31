//! Progress notifications streamed from a server-side task.
//!
//! This example demonstrates:
//! - Registering a notification handler on the client
//! - A server handler kicking off background work
//! - Emitting fire-and-forget notifications back over the same session
//!
//! # Running
//!
//! ```sh
//! cargo run --example progress
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sockwire::transport::Listener;
use sockwire::{Client, CloseCode, Server};

/// Input structure for the start_work operation.
#[derive(Serialize, Deserialize, Debug)]
struct WorkInput {
    steps: u32,
}

/// Progress notification payload.
#[derive(Serialize, Deserialize, Debug)]
struct ProgressEvent {
    percent: u32,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Work requests cross from the handler to the emitter task
    let (tx, mut rx) = tokio::sync::mpsc::channel::<u32>(4);

    let server = Server::builder()
        .handle("start_work", move |input: WorkInput, _ctx| {
            let tx = tx.clone();
            async move {
                tx.send(input.steps).await.ok();
                Ok(format!("started {} steps", input.steps))
            }
        })
        .build()?;

    let listener = Listener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // Accept one connection and notify the peer as work progresses
    tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("accept failed: {e}");
                return;
            }
        };
        let session = match server.accept(stream).await {
            Ok(session) => session,
            Err(e) => {
                eprintln!("upgrade failed: {e}");
                return;
            }
        };

        let handle = session.handle();
        tokio::spawn(async move {
            while let Some(steps) = rx.recv().await {
                for i in 1..=steps {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let event = ProgressEvent {
                        percent: (i * 100) / steps,
                        message: format!("step {i} of {steps}"),
                    };
                    if let Err(e) = handle.notify("progress", &event).await {
                        eprintln!("failed to emit progress: {e}");
                        return;
                    }
                }
            }
        });

        let _ = session.closed().await;
    });

    // The client prints every progress notification it receives
    let session = Client::builder()
        .handle_notify("progress", |event: ProgressEvent, _ctx| async move {
            println!("{:>3}% {}", event.percent, event.message);
            Ok(())
        })
        .connect(&addr.to_string(), "/progress")
        .await?;

    let started: String = session
        .invoke("start_work", &WorkInput { steps: 5 })
        .await?;
    println!("{started}");

    // Leave the session open until the emitter has sent every update
    tokio::time::sleep(Duration::from_millis(700)).await;
    session.close(CloseCode::Normal, "done").await?;
    Ok(())
}
