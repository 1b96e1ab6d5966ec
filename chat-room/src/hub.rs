//! The room's coordination point.
//!
//! A [`Hub`] owns the membership map and is driven by a single task that
//! reads [`Signal`]s from one intake channel, so joins, leaves and fan-out
//! never run concurrently with each other. Everything else talks to it
//! through a cloneable [`HubHandle`].
//!
//! Each member is stored together with the only sender of its outbound
//! queue. Dropping that sender is how a queue gets closed, which ties
//! "still a member" and "queue still open" together. The same entry holds a
//! [`Removal`] notifier, so the owning connection learns it was removed even
//! while its writer is stuck on a peer that stopped reading.

use std::{collections::HashMap, future::Future, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tracing::{debug, info, warn};

use crate::{
    connection::ConnectionId,
    trace::{self, Tracer},
};

/// An opaque payload fanned out to every member.
pub type Message = Bytes;

/// Default number of signals that may wait in the hub's intake.
pub const DEFAULT_INTAKE_CAPACITY: usize = 64;

/// Resolves, with an error, once the hub no longer holds the member.
pub type Removal = oneshot::Receiver<()>;

/// A joined connection as seen by the hub.
#[derive(Debug)]
pub struct Member {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    // Only ever dropped; that is what wakes the connection's `Removal`.
    _removed: oneshot::Sender<()>,
}

impl Member {
    /// Pairs a member with the [`Removal`] its connection waits on.
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Message>) -> (Self, Removal) {
        let (removed, removal) = oneshot::channel();
        let member = Self {
            id,
            outbound,
            _removed: removed,
        };
        (member, removal)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

#[derive(Debug)]
enum Signal {
    Join(Member),
    Leave(ConnectionId),
    Forward(Message),
    MemberCount { respond_to: oneshot::Sender<usize> },
}

pub struct Hub {
    intake: mpsc::Receiver<Signal>,
    members: HashMap<ConnectionId, Member>,
    tracer: Arc<dyn Tracer>,
}

impl Hub {
    /// Creates a silent hub and the handle used to reach it.
    pub fn new() -> (Self, HubHandle) {
        Self::with_tracer(DEFAULT_INTAKE_CAPACITY, trace::off())
    }

    pub fn with_tracer(intake_capacity: usize, tracer: Arc<dyn Tracer>) -> (Self, HubHandle) {
        let (tx, intake) = mpsc::channel(intake_capacity.max(1));
        let hub = Self {
            intake,
            members: HashMap::new(),
            tracer,
        };
        (hub, HubHandle { tx })
    }

    /// Starts the hub on the runtime and returns a handle to it.
    pub fn spawn(intake_capacity: usize, tracer: Arc<dyn Tracer>) -> HubHandle {
        let (hub, handle) = Self::with_tracer(intake_capacity, tracer);
        tokio::spawn(hub.run());
        handle
    }

    /// Processes signals until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        while let Some(signal) = self.intake.recv().await {
            self.handle(signal);
        }
        debug!(members = self.members.len(), "hub intake closed");
    }

    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(members = self.members.len(), "hub shutting down");
                    break;
                }
                signal = self.intake.recv() => match signal {
                    Some(signal) => self.handle(signal),
                    None => break,
                },
            }
        }
    }

    fn handle(&mut self, signal: Signal) {
        match signal {
            Signal::Join(member) => self.join(member),
            Signal::Leave(id) => self.leave(id),
            Signal::Forward(message) => self.forward(message),
            Signal::MemberCount { respond_to } => {
                let _ = respond_to.send(self.members.len());
            }
        }
    }

    fn join(&mut self, member: Member) {
        let id = member.id;
        if self.members.contains_key(&id) {
            // Dropping the duplicate closes its queue and fires its removal.
            warn!(%id, "ignoring join for a connection that is already a member");
            return;
        }

        self.members.insert(id, member);
        debug!(%id, members = self.members.len(), "client joined");
        self.tracer.trace(&"client joined");
    }

    fn leave(&mut self, id: ConnectionId) {
        // Removing the entry drops the last sender and closes the queue.
        if self.members.remove(&id).is_none() {
            debug!(%id, "leave for a connection that is not a member");
            return;
        }

        debug!(%id, members = self.members.len(), "client left");
        self.tracer.trace(&"client left");
    }

    fn forward(&mut self, message: Message) {
        let tracer = &self.tracer;
        self.members
            .retain(|id, member| match member.outbound.try_send(message.clone()) {
                Ok(()) => {
                    tracer.trace(&"sent to client");
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(%id, "outbound queue full, evicting slow client");
                    tracer.trace(&"client evicted");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%id, "outbound queue dropped, removing client");
                    tracer.trace(&"client evicted");
                    false
                }
            });
    }
}

/// Cloneable entry point into a running [`Hub`].
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Signal>,
}

impl HubHandle {
    pub async fn join(&self, member: Member) -> Result<()> {
        self.submit(Signal::Join(member)).await
    }

    pub async fn leave(&self, id: ConnectionId) -> Result<()> {
        self.submit(Signal::Leave(id)).await
    }

    pub async fn forward(&self, message: Message) -> Result<()> {
        self.submit(Signal::Forward(message)).await
    }

    pub async fn member_count(&self) -> Result<usize> {
        let (respond_to, response) = oneshot::channel();
        self.submit(Signal::MemberCount { respond_to }).await?;
        response.await.context("hub dropped member count request")
    }

    async fn submit(&self, signal: Signal) -> Result<()> {
        self.tx
            .send(signal)
            .await
            .map_err(|_| anyhow::anyhow!("hub is no longer running"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::oneshot::error::TryRecvError, time::timeout};

    use super::*;
    use crate::trace::MemoryTracer;

    fn member(capacity: usize) -> (Member, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (member, _removal) = Member::new(ConnectionId::next(), tx);
        (member, rx)
    }

    #[tokio::test]
    async fn fan_out_reaches_every_member() {
        let (hub, handle) = Hub::new();
        let task = tokio::spawn(hub.run());

        let (alice, mut alice_rx) = member(8);
        let (bob, mut bob_rx) = member(8);
        handle.join(alice).await.expect("join alice");
        handle.join(bob).await.expect("join bob");
        handle.forward(Bytes::from_static(b"hi")).await.expect("forward");
        assert_eq!(handle.member_count().await.expect("count"), 2);

        assert_eq!(alice_rx.recv().await.as_deref(), Some(&b"hi"[..]));
        assert_eq!(bob_rx.recv().await.as_deref(), Some(&b"hi"[..]));
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());

        drop(handle);
        task.await.expect("hub task");
    }

    #[tokio::test]
    async fn leave_closes_queue_and_stops_delivery() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (alice, mut alice_rx) = member(8);
        let id = alice.id();
        handle.join(alice).await.expect("join");
        handle.leave(id).await.expect("leave");
        handle
            .forward(Bytes::from_static(b"late"))
            .await
            .expect("forward");
        // A second leave for the same connection is ignored.
        handle.leave(id).await.expect("second leave");

        assert_eq!(handle.member_count().await.expect("count"), 0);
        assert_eq!(alice_rx.recv().await, None);
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_member() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (slow, mut slow_rx) = member(2);
        let (fast, mut fast_rx) = member(8);
        handle.join(slow).await.expect("join slow");
        handle.join(fast).await.expect("join fast");

        for payload in ["m1", "m2", "m3"] {
            handle
                .forward(Bytes::from(payload))
                .await
                .expect("forward");
        }
        assert_eq!(handle.member_count().await.expect("count"), 1);

        handle
            .forward(Bytes::from_static(b"m4"))
            .await
            .expect("forward");

        assert_eq!(slow_rx.recv().await.as_deref(), Some(&b"m1"[..]));
        assert_eq!(slow_rx.recv().await.as_deref(), Some(&b"m2"[..]));
        assert_eq!(slow_rx.recv().await, None);

        for expected in ["m1", "m2", "m3", "m4"] {
            assert_eq!(fast_rx.recv().await.as_deref(), Some(expected.as_bytes()));
        }
    }

    #[tokio::test]
    async fn dropped_receiver_is_removed_on_forward() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (gone, gone_rx) = member(4);
        handle.join(gone).await.expect("join");
        drop(gone_rx);

        handle
            .forward(Bytes::from_static(b"anyone?"))
            .await
            .expect("forward");
        assert_eq!(handle.member_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn duplicate_join_keeps_first_membership() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let id = ConnectionId::next();
        let (first_tx, mut first_rx) = mpsc::channel(4);
        let (second_tx, mut second_rx) = mpsc::channel(4);
        let (first, mut first_removal) = Member::new(id, first_tx);
        let (second, second_removal) = Member::new(id, second_tx);
        handle.join(first).await.expect("join");
        handle.join(second).await.expect("duplicate join");
        handle
            .forward(Bytes::from_static(b"once"))
            .await
            .expect("forward");

        assert_eq!(handle.member_count().await.expect("count"), 1);
        assert_eq!(first_rx.recv().await.as_deref(), Some(&b"once"[..]));
        assert_eq!(second_rx.recv().await, None);
        assert!(second_removal.await.is_err());
        assert_eq!(first_removal.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn eviction_fires_the_removal() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (outbound, _queue) = mpsc::channel(1);
        let (slow, removal) = Member::new(ConnectionId::next(), outbound);
        handle.join(slow).await.expect("join");
        for _ in 0..2 {
            handle
                .forward(Bytes::from_static(b"unread"))
                .await
                .expect("forward");
        }

        // The queue still holds the first message, yet removal is already visible.
        timeout(Duration::from_secs(1), removal)
            .await
            .expect("removal fires")
            .expect_err("sender dropped without a value");
        assert_eq!(handle.member_count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn tracer_sees_events_in_order() {
        let tracer = Arc::new(MemoryTracer::new());
        let (hub, handle) = Hub::with_tracer(DEFAULT_INTAKE_CAPACITY, tracer.clone());
        let task = tokio::spawn(hub.run());

        let (alice, _alice_rx) = member(4);
        let id = alice.id();
        handle.join(alice).await.expect("join");
        handle.forward(Bytes::from_static(b"x")).await.expect("forward");
        handle.leave(id).await.expect("leave");

        drop(handle);
        task.await.expect("hub task");

        assert_eq!(
            tracer.lines(),
            vec!["client joined", "sent to client", "client left"]
        );
    }

    #[tokio::test]
    async fn run_until_stops_on_shutdown() {
        let (hub, handle) = Hub::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(hub.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        assert_eq!(handle.member_count().await.expect("count"), 0);
        let _ = shutdown_tx.send(());
        task.await.expect("hub task");

        assert!(handle.forward(Bytes::from_static(b"x")).await.is_err());
    }
}
