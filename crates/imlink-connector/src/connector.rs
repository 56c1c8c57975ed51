//! Connector-side entry point to the transfer tier.
//!
//! A [`Connector`] owns the process-scoped state every session shares: the
//! connector identity, the id generator, the live-connection registry, the
//! user-status-sync correlation slot and the dispatch table. It opens
//! sessions, waits for the transfer to acknowledge each greet, and keeps
//! links alive by reconnecting when they drop.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use imlink_core::{
    IdGenerator, ImError, ImResult, InternalMsg, TokenGenerator, TransferMessage,
    DEFAULT_MAX_FRAME_LEN,
};

use crate::correlator::{PendingExchange, ResponseCollector};
use crate::dispatch::Dispatcher;
use crate::registry::{ConnectionRegistry, TransferLink};
use crate::services::{MessagingService, PresenceService};
use crate::session::{build_dispatcher, SessionContext, TransferSession};

pub const STATUS_SYNC_CHANNEL: &str = "user-status-sync";
pub const STATUS_SYNC_TIMEOUT_MESSAGE: &str = "time out waiting for msg from transfer";

/// External collaborators injected into the connector.
pub struct ConnectorServices {
    pub messaging: Arc<dyn MessagingService>,
    pub presence: Arc<dyn PresenceService>,
    pub ids: Arc<dyn IdGenerator>,
    pub tokens: Arc<dyn TokenGenerator>,
}

#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// How long to wait for the transfer to acknowledge a greet.
    pub sync_timeout: Duration,
    /// Delay before reconnecting a dropped link; `None` disables reconnects.
    pub reconnect_delay: Option<Duration>,
    /// Outbound queue depth per link.
    pub outbound_buffer: usize,
    pub max_frame_len: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(2),
            reconnect_delay: Some(Duration::from_secs(5)),
            outbound_buffer: 64,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

pub struct Connector {
    connector_id: String,
    settings: ConnectorSettings,
    ids: Arc<dyn IdGenerator>,
    registry: Arc<ConnectionRegistry>,
    status_sync: Arc<ResponseCollector<InternalMsg>>,
    dispatcher: Dispatcher<SessionContext>,
}

impl Connector {
    /// Build a connector. The identity token is generated here, once.
    pub fn new(services: ConnectorServices, settings: ConnectorSettings) -> ImResult<Arc<Self>> {
        let connector_id = services.tokens.generate();
        let status_sync = Arc::new(ResponseCollector::new(
            STATUS_SYNC_CHANNEL,
            STATUS_SYNC_TIMEOUT_MESSAGE,
        ));
        let dispatcher =
            build_dispatcher(status_sync.clone(), services.messaging, services.presence)?;

        info!(connector_id = %connector_id, "connector initialized");

        Ok(Arc::new(Self {
            connector_id,
            settings,
            ids: services.ids,
            registry: Arc::new(ConnectionRegistry::new()),
            status_sync,
            dispatcher,
        }))
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher<SessionContext> {
        &self.dispatcher
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// All live transfer links; [`ImError::NotConnected`] when there are none.
    pub fn list_live_connections(&self) -> ImResult<Vec<TransferLink>> {
        self.registry.list()
    }

    /// Open the user-status-sync exchange. The next ACK from transfer completes it.
    pub fn begin_user_status_sync(&self, timeout: Duration) -> ImResult<PendingExchange<InternalMsg>> {
        self.status_sync.create_collector(timeout)
    }

    /// Queue a message on the first live transfer link.
    pub async fn send_to_transfer(&self, msg: TransferMessage) -> ImResult<()> {
        let link = self
            .list_live_connections()?
            .into_iter()
            .next()
            .ok_or(ImError::NotConnected)?;
        link.send(msg).await
    }

    pub fn session(self: &Arc<Self>, peer: impl Into<String>) -> TransferSession {
        TransferSession::new(self.clone(), peer)
    }

    /// Run a session over an established stream and wait for the greet ACK.
    ///
    /// On timeout (or if the session ends first) the session is torn down and
    /// the error returned.
    pub async fn attach<S>(self: &Arc<Self>, stream: S, peer: &str) -> ImResult<SessionHandle>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let exchange = self.begin_user_status_sync(self.settings.sync_timeout)?;
        let generation = exchange.generation();
        let mut task = tokio::spawn(self.session(peer).run(stream));

        tokio::select! {
            acked = exchange.wait() => match acked {
                Ok(ack) => {
                    info!(peer, generation, ack_id = ack.id, "greet acknowledged by transfer");
                    Ok(SessionHandle { peer: peer.to_string(), task })
                }
                Err(e) => {
                    warn!(peer, generation, error = %e, "greet not acknowledged, closing session");
                    task.abort();
                    let _ = task.await;
                    Err(e)
                }
            },
            ended = &mut task => {
                let reason = match ended {
                    Ok(Ok(())) => "connection closed".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                Err(ImError::Transport(format!(
                    "session with {peer} ended before greet was acknowledged: {reason}"
                )))
            }
        }
    }

    pub async fn connect(self: &Arc<Self>, addr: &str) -> ImResult<SessionHandle> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ImError::Transport(format!("connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true)?;
        self.attach(stream, addr).await
    }

    /// Connect to every transfer in order, then supervise each link.
    ///
    /// Connections are made one after another because each waits on the
    /// single status-sync slot. Any initial failure aborts startup.
    pub async fn start(self: &Arc<Self>, addrs: &[String]) -> ImResult<Vec<JoinHandle<()>>> {
        if addrs.is_empty() {
            return Err(ImError::Config("no transfer addresses configured".into()));
        }

        let mut supervisors: Vec<JoinHandle<()>> = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let handle = match self.connect(addr).await {
                Ok(handle) => handle,
                Err(e) => {
                    for s in &supervisors {
                        s.abort();
                    }
                    return Err(e);
                }
            };
            supervisors.push(tokio::spawn(self.clone().supervise(addr.clone(), handle)));
        }
        Ok(supervisors)
    }

    async fn supervise(self: Arc<Self>, addr: String, first: SessionHandle) {
        let mut current = Some(first);
        loop {
            if let Some(handle) = current.take() {
                match handle.closed().await {
                    Ok(()) => info!(addr = %addr, "transfer link closed"),
                    Err(e) => warn!(addr = %addr, error = %e, "transfer link failed"),
                }
            }

            let Some(delay) = self.settings.reconnect_delay else {
                info!(addr = %addr, "reconnect disabled, giving up on link");
                return;
            };
            tokio::time::sleep(delay).await;

            match self.connect(&addr).await {
                Ok(handle) => {
                    info!(addr = %addr, "transfer link re-established");
                    current = Some(handle);
                }
                Err(e) => warn!(addr = %addr, error = %e, "reconnect failed"),
            }
        }
    }
}

/// A running session whose greet has been acknowledged.
///
/// Dropping the handle aborts the session, which unregisters its link.
#[derive(Debug)]
pub struct SessionHandle {
    peer: String,
    task: JoinHandle<ImResult<()>>,
}

impl SessionHandle {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the session to end.
    pub async fn closed(mut self) -> ImResult<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(ImError::Transport(format!("session task failed: {e}"))),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connector;
    use imlink_core::{FrameReader, FrameWriter, Module, MsgType};
    use tokio::net::TcpListener;

    type TransferEnd<S> = (
        InternalMsg,
        FrameReader<tokio::io::ReadHalf<S>>,
        FrameWriter<tokio::io::WriteHalf<S>>,
    );

    /// Read the greet and, if `ack` is set, answer it. The link stays open
    /// for as long as the returned halves are held.
    async fn answer_greet<S>(stream: S, ack: bool) -> TransferEnd<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (rd, wr) = tokio::io::split(stream);
        let mut reader = FrameReader::new(rd, DEFAULT_MAX_FRAME_LEN);
        let mut writer = FrameWriter::new(wr);
        let greet = match reader.recv().await.unwrap() {
            Some(TransferMessage::Internal(m)) if m.msg_type == MsgType::Greet => m,
            other => panic!("expected greet, got {other:?}"),
        };
        if ack {
            let reply = InternalMsg::new(
                greet.id + 1,
                MsgType::Ack,
                greet.id.to_string(),
                Module::Transfer,
                Module::Connector,
            );
            writer.send(&reply.into()).await.unwrap();
        }
        (greet, reader, writer)
    }

    fn quick_settings() -> ConnectorSettings {
        ConnectorSettings {
            sync_timeout: Duration::from_millis(300),
            reconnect_delay: None,
            ..ConnectorSettings::default()
        }
    }

    #[tokio::test]
    async fn attach_waits_for_greet_ack() {
        let (connector, _events) = test_connector(quick_settings());
        let (local, remote) = tokio::io::duplex(16 * 1024);
        assert!(matches!(connector.list_live_connections(), Err(ImError::NotConnected)));

        let transfer = tokio::spawn(answer_greet(remote, true));
        let handle = connector.attach(local, "transfer-1").await.unwrap();
        let (greet, _reader, _writer) = transfer.await.unwrap();

        assert_eq!(greet.msg_body, connector.connector_id());
        assert_eq!(handle.peer(), "transfer-1");
        assert_eq!(connector.list_live_connections().unwrap().len(), 1);

        handle.abort();
        assert!(handle.closed().await.is_ok());
        assert!(connector.registry().is_empty());
    }

    #[tokio::test]
    async fn attach_times_out_without_ack() {
        let (connector, _events) = test_connector(quick_settings());
        let (local, remote) = tokio::io::duplex(16 * 1024);

        let _transfer = tokio::spawn(answer_greet(remote, false));
        match connector.attach(local, "transfer-2").await {
            Err(ImError::Timeout(msg)) => assert_eq!(msg, STATUS_SYNC_TIMEOUT_MESSAGE),
            other => panic!("expected timeout, got {other:?}"),
        }
        // Aborted session unregisters its link.
        assert!(connector.registry().is_empty());
        assert!(connector.begin_user_status_sync(Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn attach_fails_when_exchange_busy() {
        let (connector, _events) = test_connector(quick_settings());
        let _pending = connector
            .begin_user_status_sync(Duration::from_secs(10))
            .unwrap();
        let (local, _remote) = tokio::io::duplex(1024);
        assert!(matches!(
            connector.attach(local, "transfer-3").await,
            Err(ImError::ExchangeInProgress(_))
        ));
    }

    #[tokio::test]
    async fn send_without_links_is_not_connected() {
        let (connector, _events) = test_connector(quick_settings());
        let msg = crate::testing::chat(1).into();
        assert!(matches!(
            connector.send_to_transfer(msg).await,
            Err(ImError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn start_connects_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let transfer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            answer_greet(stream, true).await
        });

        let (connector, _events) = test_connector(quick_settings());
        let supervisors = connector.start(&[addr.clone()]).await.unwrap();
        assert_eq!(supervisors.len(), 1);

        let live = connector.list_live_connections().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].peer(), addr);
        let (greet, _reader, _writer) = transfer.await.unwrap();
        assert_eq!(greet.from, Module::Connector);
    }

    #[tokio::test]
    async fn start_requires_addresses() {
        let (connector, _events) = test_connector(quick_settings());
        assert!(matches!(connector.start(&[]).await, Err(ImError::Config(_))));
    }

    #[tokio::test]
    async fn failed_start_tears_down_earlier_links() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = listener.local_addr().unwrap().to_string();
        let dead = {
            let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
            closed.local_addr().unwrap().to_string()
        };
        let transfer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            answer_greet(stream, true).await
        });

        let (connector, _events) = test_connector(quick_settings());
        assert!(connector.start(&[good, dead]).await.is_err());
        let _held = transfer.await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !connector.registry().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("link still registered after failed start");
        assert!(matches!(connector.list_live_connections(), Err(ImError::NotConnected)));
    }

    #[tokio::test]
    async fn dropping_handle_closes_session() {
        let (connector, _events) = test_connector(quick_settings());
        let (local, remote) = tokio::io::duplex(16 * 1024);

        let transfer = tokio::spawn(answer_greet(remote, true));
        let handle = connector.attach(local, "transfer-4").await.unwrap();
        let (_greet, mut reader, _writer) = transfer.await.unwrap();
        assert_eq!(connector.registry().len(), 1);

        drop(handle);
        // The aborted session shuts its side of the stream.
        assert!(matches!(reader.recv().await, Ok(None) | Err(_)));
        tokio::task::yield_now().await;
        assert!(connector.registry().is_empty());
    }

    #[tokio::test]
    async fn dropped_link_is_reconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (connector, _events) = test_connector(ConnectorSettings {
            reconnect_delay: Some(Duration::from_millis(50)),
            ..quick_settings()
        });

        let transfer = tokio::spawn(async move {
            // First connection: acknowledge, then hang up.
            let (stream, _) = listener.accept().await.unwrap();
            let (first, reader, writer) = answer_greet(stream, true).await;
            drop((reader, writer));

            let (stream, _) = listener.accept().await.unwrap();
            let (second, reader, writer) = answer_greet(stream, true).await;
            (first, second, reader, writer)
        });

        let _supervisors = connector.start(&[addr]).await.unwrap();
        let (first, second, _reader, _writer) = transfer.await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.msg_body, second.msg_body);
    }
}
