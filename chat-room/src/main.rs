use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use chat_room::{
    cli::{Cli, Command, ServeArgs},
    client,
    hub::Hub,
    listener::Listener,
    server::{AppState, HttpServer},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            if let Err(err) = serve(args).await {
                warn!("room exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.room_config();
    let hub = Hub::spawn(config.intake_capacity, args.trace.tracer());

    let http = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let http = HttpServer::new(http, AppState::new(hub.clone(), config));
    info!("http listening on {}", http.local_addr()?);

    let tcp = match args.tcp {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            let listener = Listener::new(listener, hub.clone(), config);
            info!("tcp listening on {}", listener.local_addr()?);
            Some(listener)
        }
        None => None,
    };

    let stop = stop_on_ctrl_c();
    match tcp {
        Some(tcp) => {
            tokio::try_join!(
                http.run_until(stopped(stop.clone())),
                tcp.run_until(stopped(stop)),
            )?;
        }
        None => http.run_until(stopped(stop)).await?,
    }

    Ok(())
}

/// Flips to `true` on Ctrl-C; every front end watches the same signal.
fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
        let _ = tx.send(true);
    });
    rx
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|requested| *requested).await;
}
