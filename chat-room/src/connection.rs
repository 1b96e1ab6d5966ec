//! One admitted client and its two pumps.
//!
//! The inbound pump reads messages off the transport and hands them to the
//! hub. The outbound pump drains the connection's queue onto the transport.
//! A transport error ends the pump that hit it, and it is never retried.
//!
//! [`Connection::join`] registers with the hub before any pump exists, and
//! [`Connection::serve`] consumes the connection so it can only leave once.
//! When the hub evicts the connection, `serve` hangs up on the transport
//! right away instead of waiting for a stalled write to finish.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{select, sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::hub::{HubHandle, Member, Message, Removal};

/// Default number of messages buffered for a client before it is evicted.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

pub struct Connection {
    id: ConnectionId,
    hub: HubHandle,
    queue: mpsc::Receiver<Message>,
    removal: Removal,
}

/// Which side of a session finished first.
enum Ended {
    Reader,
    Writer,
    Removed,
}

impl Connection {
    /// Creates a connection with an outbound queue of `capacity` slots and
    /// submits it to the hub.
    pub async fn join(hub: HubHandle, capacity: usize) -> Result<Self> {
        let id = ConnectionId::next();
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let (member, removal) = Member::new(id, outbound);
        hub.join(member)
            .await
            .with_context(|| format!("failed to join {id}"))?;

        Ok(Self {
            id,
            hub,
            queue,
            removal,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs both pumps until the client goes away or is evicted, then leaves
    /// the hub.
    ///
    /// When the client stops sending, this returns once the outbound pump
    /// has drained whatever was still queued. On eviction both halves of the
    /// transport are dropped immediately and queued messages are discarded.
    pub async fn serve<R, W, RE, WE>(self, reader: R, writer: W) -> Result<()>
    where
        R: Stream<Item = Result<Message, RE>> + Unpin,
        RE: fmt::Debug,
        W: Sink<Message, Error = WE> + Unpin + Send + 'static,
        WE: fmt::Debug + Send + 'static,
    {
        let Connection {
            id,
            hub,
            queue,
            mut removal,
        } = self;
        let mut writer_task = spawn_outbound_pump(id, queue, writer);

        // Losing branches are dropped here, and the reader with them.
        let ended = select! {
            result = inbound_pump(id, reader, &hub) => {
                if let Err(err) = result {
                    warn!(%id, error = ?err, "inbound pump stopped");
                }
                Ended::Reader
            }
            _ = &mut removal => {
                debug!(%id, "removed by the hub, hanging up");
                Ended::Removed
            }
            _ = &mut writer_task => {
                debug!(%id, "outbound pump finished first, dropping reader");
                Ended::Writer
            }
        };

        let left = hub.leave(id).await;
        match ended {
            Ended::Reader => {
                if let Err(err) = writer_task.await {
                    warn!(%id, error = ?err, "outbound pump panicked");
                }
            }
            Ended::Removed => {
                // The writer may be parked on a peer that stopped reading.
                writer_task.abort();
                let _ = writer_task.await;
            }
            Ended::Writer => {}
        }

        left.with_context(|| format!("failed to leave {id}"))
    }
}

async fn inbound_pump<R, E>(id: ConnectionId, mut reader: R, hub: &HubHandle) -> Result<()>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Debug,
{
    while let Some(next) = reader.next().await {
        match next {
            Ok(message) => hub.forward(message).await?,
            Err(err) => {
                debug!(%id, error = ?err, "read failed, closing reader");
                break;
            }
        }
    }

    Ok(())
}

fn spawn_outbound_pump<W, E>(
    id: ConnectionId,
    queue: mpsc::Receiver<Message>,
    writer: W,
) -> JoinHandle<()>
where
    W: Sink<Message, Error = E> + Unpin + Send + 'static,
    E: fmt::Debug + Send + 'static,
{
    tokio::spawn(outbound_pump(id, queue, writer))
}

async fn outbound_pump<W, E>(id: ConnectionId, mut queue: mpsc::Receiver<Message>, mut writer: W)
where
    W: Sink<Message, Error = E> + Unpin,
    E: fmt::Debug,
{
    while let Some(message) = queue.recv().await {
        if let Err(err) = writer.send(message).await {
            debug!(%id, error = ?err, "write failed, closing writer");
            break;
        }
    }

    if let Err(err) = writer.close().await {
        debug!(%id, error = ?err, "failed to close writer cleanly");
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::hub::Hub;

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn ids_are_unique() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn messages_round_trip_through_the_hub() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let connection = Connection::join(handle.clone(), 8).await.expect("join");
        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let (outbound_tx, mut outbound_rx) = fmpsc::unbounded::<Message>();
        let session = tokio::spawn(connection.serve(inbound_rx, outbound_tx));

        inbound_tx
            .unbounded_send(Ok(Bytes::from_static(b"echo")))
            .expect("queue inbound");
        let echoed = timeout(WAIT, outbound_rx.next()).await.expect("echo");
        assert_eq!(echoed.as_deref(), Some(&b"echo"[..]));

        drop(inbound_tx);
        timeout(WAIT, session)
            .await
            .expect("session finishes")
            .expect("session task")
            .expect("session result");

        assert_eq!(handle.member_count().await.expect("count"), 0);
        assert_eq!(timeout(WAIT, outbound_rx.next()).await.expect("closed"), None);
    }

    #[tokio::test]
    async fn read_error_ends_the_session() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let connection = Connection::join(handle.clone(), 8).await.expect("join");
        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<Message, &'static str>>();
        let (outbound_tx, _outbound_rx) = fmpsc::unbounded::<Message>();
        let session = tokio::spawn(connection.serve(inbound_rx, outbound_tx));

        inbound_tx
            .unbounded_send(Err("protocol error"))
            .expect("queue inbound");
        timeout(WAIT, session)
            .await
            .expect("session finishes")
            .expect("session task")
            .expect("session result");

        assert_eq!(handle.member_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn eviction_hangs_up_on_a_stalled_writer() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (bystander_tx, mut bystander_rx) = mpsc::channel(64);
        let (bystander, _bystander_removal) = Member::new(ConnectionId::next(), bystander_tx);
        handle.join(bystander).await.expect("join bystander");

        let connection = Connection::join(handle.clone(), 1).await.expect("join");
        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<Message, Infallible>>();
        // A zero-capacity channel that nobody reads from never accepts a
        // second message, so the outbound pump stalls and the queue fills.
        let (outbound_tx, stalled_rx) = fmpsc::channel::<Message>(0);
        let session = tokio::spawn(connection.serve(inbound_rx, outbound_tx));

        for _ in 0..8 {
            handle
                .forward(Bytes::from_static(b"flood"))
                .await
                .expect("forward");
        }
        assert_eq!(handle.member_count().await.expect("count"), 1);

        // The sink stays stalled for the whole test.
        timeout(WAIT, session)
            .await
            .expect("session finishes")
            .expect("session task")
            .expect("session result");

        assert!(inbound_tx.is_closed());
        assert!(
            inbound_tx
                .unbounded_send(Ok(Bytes::from_static(b"sneaky")))
                .is_err()
        );

        handle.member_count().await.expect("count");
        let mut seen = Vec::new();
        while let Ok(message) = bystander_rx.try_recv() {
            seen.push(message);
        }
        assert_eq!(seen.len(), 8);
        assert!(seen.iter().all(|message| message == "flood"));
        drop(stalled_rx);
    }
}
