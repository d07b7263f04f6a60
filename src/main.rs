//! Minimal binary demonstrating `bundlestream` usage.
//!
//! Slices a message into frames, delivers them in reverse order, and prints
//! the reassembled result.

mod cli;

use std::num::NonZeroUsize;

use bundlestream::{
    EndpointId,
    Frame,
    ReassemblyConfig,
    ReassemblyEngine,
    StreamResult,
    StreamSlicer,
};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable structured logging for examples and integration tests.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let frame_size = NonZeroUsize::new(cli.frame_size).unwrap_or(NonZeroUsize::MIN);

    let slicer = StreamSlicer::new(EndpointId::new("dtn://demo/sender"), frame_size);
    let batch = slicer.slice(cli.message.clone().into_bytes())?;
    let id = batch.stream_id().clone();
    println!(
        "sliced {} bytes into {} frames for stream {id}",
        cli.message.len(),
        batch.len()
    );

    let engine = ReassemblyEngine::new(ReassemblyConfig::default());
    engine.start();

    // Deliver in reverse to show arrival order does not matter.
    let mut frames: Vec<Frame> = batch.into_frames();
    frames.reverse();
    for frame in frames {
        let disposition = engine.ingest(frame)?;
        println!("ingested: {disposition:?}");
    }

    match engine.take_result(&id) {
        Some(StreamResult::Complete(bytes)) => {
            println!("reassembled: {}", String::from_utf8_lossy(&bytes));
        }
        other => println!("stream did not complete: {other:?}"),
    }

    engine.shutdown().await;
    Ok(())
}
