//! Per-connection session with a transfer node.
//!
//! A session owns one connection: it sends the greet, registers the link,
//! validates every inbound message (must come from TRANSFER and be addressed
//! to CONNECTOR) and runs it through the dispatch table. Inbound messages are
//! handled one at a time in arrival order. Message-level failures are logged
//! and never end the session; I/O and framing errors do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use imlink_core::{
    check_dest, check_from, AckMsg, ChatMsg, FrameReader, FrameWriter, ImResult, InternalMsg,
    Module, MsgType, TransferMessage,
};

use crate::connector::Connector;
use crate::correlator::ResponseCollector;
use crate::dispatch::{Dispatcher, InternalDispatcher};
use crate::registry::{ConnectionRegistry, TransferLink};
use crate::services::{MessagingService, PresenceService};

/// What every handler gets alongside the message.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The link the message arrived on; replies can be queued through it.
    pub link: TransferLink,
}

/// Running totals for one session.
#[derive(Debug, Default)]
pub struct SessionCounters {
    received: AtomicU64,
    dispatched: AtomicU64,
    violations: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub dispatched: u64,
    /// Messages dropped for origin/destination mismatch.
    pub violations: u64,
    /// Messages whose handler failed or had no handler.
    pub failures: u64,
}

impl SessionCounters {
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Build the connector's dispatch table.
///
/// ACK completes the pending status-sync exchange, FORCE_OFFLINE goes to the
/// presence service, chat and ack business messages go to the messaging
/// service.
pub(crate) fn build_dispatcher(
    status_sync: Arc<ResponseCollector<InternalMsg>>,
    messaging: Arc<dyn MessagingService>,
    presence: Arc<dyn PresenceService>,
) -> ImResult<Dispatcher<SessionContext>> {
    let mut internal = InternalDispatcher::<SessionContext>::with_capacity(2);
    internal.register(MsgType::Ack, move |msg, _| {
        status_sync.complete(msg);
        Ok(())
    })?;
    internal.register(MsgType::ForceOffline, move |msg, _| {
        presence.force_offline(&msg.msg_body)
    })?;

    let mut dispatcher = Dispatcher::<SessionContext>::new();
    let chat_service = messaging.clone();
    dispatcher.register::<ChatMsg, _>(move |msg, _| chat_service.do_chat(msg))?;
    dispatcher.register::<AckMsg, _>(move |msg, _| messaging.do_send_ack(msg))?;
    dispatcher.register::<InternalMsg, _>(internal.into_dispatch_fn())?;
    Ok(dispatcher)
}

/// Removes the link from the registry however the session ends, including abort.
struct LinkGuard {
    registry: Arc<ConnectionRegistry>,
    link_id: u64,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.link_id);
    }
}

pub struct TransferSession {
    connector: Arc<Connector>,
    peer: String,
    counters: Arc<SessionCounters>,
}

impl TransferSession {
    pub fn new(connector: Arc<Connector>, peer: impl Into<String>) -> Self {
        Self {
            connector,
            peer: peer.into(),
            counters: Arc::new(SessionCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        self.counters.clone()
    }

    /// Drive the connection until the peer closes it or I/O fails.
    pub async fn run<S>(self, stream: S) -> ImResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let settings = self.connector.settings();
        let (rd, wr) = tokio::io::split(stream);
        let mut reader = FrameReader::new(rd, settings.max_frame_len);
        let mut writer = FrameWriter::new(wr);
        let (tx, mut outbound_rx) = mpsc::channel::<TransferMessage>(settings.outbound_buffer.max(1));

        let registry = self.connector.registry().clone();
        let link = TransferLink::new(registry.next_link_id(), self.peer.clone(), tx);

        let greet = self.greet();
        info!(peer = %self.peer, greet_id = greet.id, "connected to transfer, sending greet");
        writer.send(&TransferMessage::Internal(greet)).await?;

        registry.register(link.clone());
        let _guard = LinkGuard {
            registry,
            link_id: link.id(),
        };
        let ctx = SessionContext { link };

        let result = loop {
            tokio::select! {
                Some(msg) = outbound_rx.recv() => {
                    if let Err(e) = writer.send(&msg).await {
                        break Err(e);
                    }
                }
                inbound = reader.recv() => match inbound {
                    Ok(Some(msg)) => self.on_message(msg, &ctx),
                    Ok(None) => {
                        debug!(peer = %self.peer, "transfer closed the connection");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        let _ = writer.shutdown().await;
        let stats = self.counters.snapshot();
        info!(
            peer = %self.peer,
            received = stats.received,
            violations = stats.violations,
            failures = stats.failures,
            "transfer session ended"
        );
        result
    }

    fn greet(&self) -> InternalMsg {
        InternalMsg::new(
            self.connector.next_id(),
            MsgType::Greet,
            self.connector.connector_id(),
            Module::Connector,
            Module::Transfer,
        )
    }

    fn on_message(&self, msg: TransferMessage, ctx: &SessionContext) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %self.peer, class = %msg.class(), id = msg.id(), "message from transfer");

        let checked = check_from(&msg, Module::Transfer)
            .and_then(|()| check_dest(&msg, Module::Connector));
        if let Err(e) = checked {
            self.counters.violations.fetch_add(1, Ordering::Relaxed);
            warn!(peer = %self.peer, error = %e, "dropping message");
            return;
        }

        match self.connector.dispatcher().dispatch(msg, ctx) {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %self.peer, error = %e, "failed to handle message from transfer");
            }
        }
    }
}
