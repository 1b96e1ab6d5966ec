//! Raw TCP front end.
//!
//! Every accepted stream is framed with [`transport::lines`] and admitted
//! into the room, so `nc 127.0.0.1 5000` is a working client.

use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{config::RoomConfig, connection::Connection, hub::HubHandle, transport};

pub struct Listener {
    listener: TcpListener,
    hub: HubHandle,
    config: RoomConfig,
}

impl Listener {
    pub fn new(listener: TcpListener, hub: HubHandle, config: RoomConfig) -> Self {
        Self {
            listener,
            hub,
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Admits clients until `shutdown` resolves. Sessions already running
    /// are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = ?err, "failed to accept tcp client");
                        continue;
                    }
                },
            };
            tokio::spawn(admit(stream, peer, self.hub.clone(), self.config));
        }

        info!("tcp listener stopped");
        Ok(())
    }
}

async fn admit(stream: TcpStream, peer: SocketAddr, hub: HubHandle, config: RoomConfig) {
    let (reader, writer) = stream.into_split();
    let (reader, writer) = transport::lines(reader, writer, config.max_message_size);

    let connection = match Connection::join(hub, config.queue_capacity).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%peer, error = ?err, "failed to admit tcp client");
            return;
        }
    };
    let id = connection.id();
    info!(%peer, %id, "tcp client joined");

    match connection.serve(reader, writer).await {
        Ok(()) => info!(%peer, %id, "tcp client disconnected"),
        Err(err) => warn!(%peer, %id, error = ?err, "tcp client closed with error"),
    }
}
