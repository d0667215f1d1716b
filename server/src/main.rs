use clap::Parser;
use log::{error, info};
use server::network::Ingress;
use server::world::ClientWorld;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then wires the world dispatch loop, the
/// UDP ingress, and the batch consumer together.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Quiet period (milliseconds) that closes a message batch
        #[clap(short, long, default_value = "5")]
        batch_window_ms: u64,
    }

    env_logger::init();
    let args = Args::parse();

    let (world, handle, mut batch_rx) =
        ClientWorld::new(Duration::from_millis(args.batch_window_ms));

    let address = format!("{}:{}", args.host, args.port);
    let ingress = Ingress::bind(&address, handle).await?;

    // Spawn world dispatch loop
    let world_handle = tokio::spawn(world.run());

    // Spawn ingress receive loop
    let ingress_handle = tokio::spawn(ingress.run());

    // Completed batches surface here; actual delivery fan-out is a concern
    // of a protocol layer this binary doesn't carry
    let batch_handle = tokio::spawn(async move {
        while let Some(batch) = batch_rx.recv().await {
            info!(
                "batch of {} messages ready for network at ({}, {})",
                batch.messages.len(),
                batch.cell.0,
                batch.cell.1
            );
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        result = world_handle => {
            if let Err(e) = result {
                error!("world task panicked: {}", e);
            }
        }
        result = ingress_handle => {
            if let Err(e) = result {
                error!("ingress task panicked: {}", e);
            }
        }
        result = batch_handle => {
            if let Err(e) = result {
                error!("batch consumer task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
