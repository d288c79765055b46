use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tsnex_core::tracing::prefix;
use tsnex_core::StatusPatch;
use tsnex_server::{DatasetRegistry, TsnexService};

#[derive(Parser, Debug)]
#[command(name = "tsnex-server")]
#[command(about = "Interactive t-SNE over a JSON line protocol (stdin/stdout)")]
#[command(version)]
struct Args {
    /// Directory holding `<name>.csv` datasets
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Log level (debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Default pacing interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Default sampling stride in iterations
    #[arg(long)]
    n_jump: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: tsnex-server panicked");
        eprintln!(
            "  Location: {}",
            panic_info
                .location()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        eprintln!(
            "  Message: {}",
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .unwrap_or(&"<no message>")
        );
    }));

    let args = Args::parse();
    tsnex_core::tracing::init_with_filter(&args.log_level);

    info!("{} Initializing TSNEX server", prefix::OPEN);
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));
    info!("  Data dir: {}", args.data_dir.display());

    let defaults = StatusPatch {
        tick_frequency_ms: args.tick_ms,
        n_jump: args.n_jump,
        ..Default::default()
    };

    let (frames, mut outbound) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = outbound.recv().await {
            let written = async {
                stdout.write_all(frame.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(e) = written.await {
                warn!("stdout closed: {}", e);
                break;
            }
        }
    });

    let registry = DatasetRegistry::new(args.data_dir);
    let service = TsnexService::new(registry, frames.clone(), defaults)?;

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if let Some(reply) = service.handle_line(&line).await {
                        if frames.send(reply).is_err() {
                            warn!("Output stream closed, stopping");
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Failed to read command: {}", e);
                    break;
                }
                None => {
                    info!("Input closed");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    service.shutdown().await;
    drop(service);
    drop(frames);
    if let Err(e) = writer.await {
        warn!("Output writer failed: {}", e);
    }

    info!("{} Server shutdown complete", prefix::CLOSE);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
