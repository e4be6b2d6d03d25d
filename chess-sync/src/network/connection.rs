//! 中继连接管理
//!
//! 每次 `connect()` 启动一个后台任务，负责建连、读循环、写队列和重连退避。
//! 状态通过 `watch` 通道发布，收到的字节和错误通过事件通道交给上层。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use protocol::{Codec, Connector, NetworkConfig, ProtocolError, ProtocolMessage, READ_CHUNK_SIZE};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use super::backoff::Backoff;
use crate::config::ReconnectPolicy;
use crate::error::SyncError;

/// 关闭时等待已排队帧写出的最长时间
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// 连接事件
#[derive(Debug)]
pub enum ConnectionEvent {
    /// 状态变化
    StateChanged(ConnectionState),
    /// 收到的原始字节（任意切分）
    Data(Vec<u8>),
    /// 传输错误或连接彻底失败
    Error(SyncError),
}

enum Outbound {
    Frame(Vec<u8>),
    /// 丢弃当前 socket 并重连
    Reset,
}

enum ServeEnd {
    Shutdown,
    Lost(ProtocolError),
    Reset,
}

/// 连接任务与句柄共享的状态
struct Shared {
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    retry_count: AtomicU32,
    last_activity: StdMutex<Option<Instant>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!("Connection state -> {}", state);
            self.emit(ConnectionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // 接收方已关闭时静默丢弃
        let _ = self.events.send(event);
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Some(Instant::now());
        }
    }
}

/// 到中继服务器的持久连接
pub struct RelayConnection<C: Connector> {
    connector: Arc<C>,
    config: NetworkConfig,
    policy: ReconnectPolicy,
    max_frame_size: usize,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector> RelayConnection<C> {
    /// 创建连接（尚未建连），同时返回事件接收端
    pub fn new(
        connector: C,
        config: NetworkConfig,
        policy: ReconnectPolicy,
        max_frame_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            state: state_tx,
            events: events_tx,
            retry_count: AtomicU32::new(0),
            last_activity: StdMutex::new(None),
        });

        let conn = Self {
            connector: Arc::new(connector),
            config,
            policy,
            max_frame_size,
            shared,
            outbound: None,
            shutdown: None,
            task: None,
        };
        (conn, events_rx)
    }

    /// 开始连接；已有连接任务在运行时不做任何事
    pub fn connect(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("connect() ignored, connection task already running");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.shared.retry_count.store(0, Ordering::Relaxed);
        self.shared.set_state(ConnectionState::Connecting);
        tracing::info!("Connecting to relay {}", self.config.addr());

        let task = ConnectionTask {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            backoff: Backoff::new(&self.policy),
            shared: Arc::clone(&self.shared),
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };

        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(task.run()));
    }

    /// 断开连接，可重复调用
    pub async fn disconnect(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.outbound = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Connection task ended abnormally: {}", e);
            }
            tracing::info!("Disconnected from relay {}", self.config.addr());
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// 丢弃当前 socket 并进入重连；未连接时返回 false
    pub fn force_reconnect(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        match &self.outbound {
            Some(outbound) => outbound.send(Outbound::Reset).is_ok(),
            None => false,
        }
    }

    /// 编码并排队发送一条消息
    pub fn send(&self, msg: &ProtocolMessage) -> Result<(), ProtocolError> {
        if self.state() != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let frame = Codec::encode_framed(msg, self.max_frame_size)?;
        let outbound = self.outbound.as_ref().ok_or(ProtocolError::NotConnected)?;
        outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ProtocolError::NotConnected)?;
        tracing::debug!("Queued {} seq={}", msg.kind(), msg.seq());
        Ok(())
    }

    /// 当前状态
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// 当前连续失败次数
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::Relaxed)
    }

    /// 最近一次建连或收到数据的时间
    pub fn last_activity(&self) -> Option<Instant> {
        self.shared.last_activity.lock().ok().and_then(|last| *last)
    }

    pub fn remote_host(&self) -> &str {
        &self.config.host
    }

    pub fn remote_port(&self) -> u16 {
        self.config.port
    }
}

/// 后台连接任务
struct ConnectionTask<C: Connector> {
    connector: Arc<C>,
    config: NetworkConfig,
    backoff: Backoff,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: watch::Receiver<bool>,
}

impl<C: Connector> ConnectionTask<C> {
    async fn run(mut self) {
        let addr = self.config.addr();
        let mut pending_delay = None;

        loop {
            if let Some(delay) = pending_delay.take() {
                self.shared.set_state(ConnectionState::Reconnecting);
                tracing::info!("Reconnecting to {} in {:?}", addr, delay);
                tokio::select! {
                    _ = self.shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.shared.set_state(ConnectionState::Connecting);
            let attempt = tokio::select! {
                _ = self.shutdown.changed() => return,
                res = timeout(self.config.connect_timeout(), self.connector.connect(&addr)) => res,
            };

            let failure = match attempt {
                Ok(Ok(stream)) => {
                    self.backoff.reset();
                    self.shared.retry_count.store(0, Ordering::Relaxed);
                    self.shared.touch();
                    self.shared.set_state(ConnectionState::Connected);
                    tracing::info!("Connected to relay {}", addr);

                    match self.serve(stream).await {
                        ServeEnd::Shutdown => return,
                        ServeEnd::Lost(err) => {
                            tracing::warn!("Connection to {} lost: {}", addr, err);
                            self.shared.emit(ConnectionEvent::Error(SyncError::Transport(err)));
                        }
                        ServeEnd::Reset => {
                            tracing::info!("Dropping connection to {} on request", addr);
                        }
                    }
                    self.discard_queued();
                    pending_delay = Some(self.backoff.delay_for(1));
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => ProtocolError::ConnectionTimeout,
            };

            match self.backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        "Connect attempt {} to {} failed: {}",
                        self.backoff.failures(),
                        addr,
                        failure
                    );
                    self.shared
                        .retry_count
                        .store(self.backoff.failures(), Ordering::Relaxed);
                    pending_delay = Some(delay);
                }
                None => {
                    let attempts = self.backoff.failures();
                    tracing::error!(
                        "Giving up on relay {} after {} attempts: {}",
                        addr,
                        attempts,
                        failure
                    );
                    self.shared.retry_count.store(attempts, Ordering::Relaxed);
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.shared
                        .emit(ConnectionEvent::Error(SyncError::Connectivity { attempts }));
                    return;
                }
            }
        }
    }

    /// 读写循环，直到关闭、出错或被要求重连
    ///
    /// 写操作在独立任务中进行，对端不读时读循环、关闭和重连请求不受影响。
    async fn serve(&mut self, stream: C::Stream) -> ServeEnd {
        let (mut reader, writer) = tokio::io::split(stream);
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let mut write_task = tokio::spawn(write_loop(writer, frames_rx));
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        let end = loop {
            tokio::select! {
                _ = self.shutdown.changed() => break ServeEnd::Shutdown,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break ServeEnd::Lost(ProtocolError::ConnectionClosed),
                    Ok(n) => {
                        self.shared.touch();
                        self.shared.emit(ConnectionEvent::Data(buf[..n].to_vec()));
                    }
                    Err(e) => break ServeEnd::Lost(ProtocolError::Io(e)),
                },
                cmd = self.outbound.recv() => match cmd {
                    // 写任务已退出时由下一个分支报告原因
                    Some(Outbound::Frame(bytes)) => {
                        let _ = frames.send(bytes);
                    }
                    Some(Outbound::Reset) => break ServeEnd::Reset,
                    None => break ServeEnd::Shutdown,
                },
                written = &mut write_task => {
                    break ServeEnd::Lost(match written {
                        Ok(Err(e)) => ProtocolError::Io(e),
                        _ => ProtocolError::ConnectionClosed,
                    });
                }
            }
        };

        if matches!(end, ServeEnd::Shutdown) {
            // 尽量写出关闭前已排队的帧，对端不读时限时放弃
            while let Ok(Outbound::Frame(bytes)) = self.outbound.try_recv() {
                let _ = frames.send(bytes);
            }
            drop(frames);
            if timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
                tracing::warn!("Relay not reading, dropping unsent frames on close");
            }
        }
        write_task.abort();
        end
    }

    /// 旧连接上未写出的帧不带到新连接
    fn discard_queued(&mut self) {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!("Discarded {} queued frames from the previous connection", dropped);
        }
    }
}

/// 依次写出帧；发送端关闭后优雅关闭写半部
async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = frames.recv().await {
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use protocol::Framer;
    use tokio::io::DuplexStream;

    /// 每次连接都返回一条内存管道，另一端交给测试
    struct DuplexConnector {
        peers: mpsc::UnboundedSender<DuplexStream>,
        capacity: usize,
    }

    impl DuplexConnector {
        fn new(peers: mpsc::UnboundedSender<DuplexStream>) -> Self {
            Self {
                peers,
                capacity: 4096,
            }
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _addr: &str) -> protocol::Result<DuplexStream> {
            let (client, server) = tokio::io::duplex(self.capacity);
            self.peers
                .send(server)
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            Ok(client)
        }
    }

    /// 总是失败，记录每次尝试的时间
    struct FailingConnector {
        attempts: Arc<StdMutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Connector for FailingConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _addr: &str) -> protocol::Result<DuplexStream> {
            self.attempts.lock().unwrap().push(Instant::now());
            Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
    }

    /// 永不完成的连接
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _addr: &str) -> protocol::Result<DuplexStream> {
            std::future::pending().await
        }
    }

    fn policy(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    async fn next_state(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionState {
        loop {
            match events.recv().await.expect("event channel closed") {
                ConnectionEvent::StateChanged(state) => return state,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_send_requires_connected() {
        let (peers, _peer_rx) = mpsc::unbounded_channel();
        let (conn, _events) = RelayConnection::new(
            DuplexConnector::new(peers),
            NetworkConfig::default(),
            policy(3, 10, 100),
            1024,
        );

        let err = conn.send(&ProtocolMessage::Heartbeat { seq: 1 }).unwrap_err();
        assert!(matches!(err, ProtocolError::NotConnected));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.force_reconnect());
    }

    #[tokio::test]
    async fn test_connect_send_and_receive() {
        let (peers, mut peer_rx) = mpsc::unbounded_channel();
        let (mut conn, mut events) = RelayConnection::new(
            DuplexConnector::new(peers),
            NetworkConfig::new("relay.test", 4243),
            policy(3, 10, 100),
            1024,
        );
        assert_eq!(conn.remote_host(), "relay.test");
        assert_eq!(conn.remote_port(), 4243);

        conn.connect();
        conn.connect();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert!(conn.last_activity().is_some());
        assert_eq!(conn.retry_count(), 0);
        let mut peer = peer_rx.recv().await.unwrap();

        // 出站：对端收到完整帧
        conn.send(&ProtocolMessage::Join { seq: 1, side: None }).unwrap();
        let mut framer = Framer::new(1024);
        let mut buf = [0u8; 256];
        let frame = loop {
            let n = peer.read(&mut buf).await.unwrap();
            framer.feed(&buf[..n]);
            if let Some(frame) = framer.next_frame().unwrap() {
                break frame;
            }
        };
        assert_eq!(
            Codec::decode(&frame).unwrap(),
            ProtocolMessage::Join { seq: 1, side: None }
        );

        // 入站：原始字节原样上交
        peer.write_all(b"hello").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 5 {
            match events.recv().await.unwrap() {
                ConnectionEvent::Data(bytes) => received.extend(bytes),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(received, b"hello");

        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_closes() {
        let (peers, mut peer_rx) = mpsc::unbounded_channel();
        let (mut conn, mut events) = RelayConnection::new(
            DuplexConnector::new(peers),
            NetworkConfig::default(),
            policy(3, 10, 100),
            1024,
        );

        conn.connect();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        drop(peer_rx.recv().await.unwrap());

        match events.recv().await.unwrap() {
            ConnectionEvent::Error(SyncError::Transport(ProtocolError::ConnectionClosed)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(next_state(&mut events).await, ConnectionState::Reconnecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert!(peer_rx.recv().await.is_some());

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_force_reconnect() {
        let (peers, mut peer_rx) = mpsc::unbounded_channel();
        let (mut conn, mut events) = RelayConnection::new(
            DuplexConnector::new(peers),
            NetworkConfig::default(),
            policy(3, 10, 100),
            1024,
        );

        conn.connect();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        let _first = peer_rx.recv().await.unwrap();

        assert!(conn.force_reconnect());
        assert_eq!(next_state(&mut events).await, ConnectionState::Reconnecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        assert!(peer_rx.recv().await.is_some());

        conn.disconnect().await;
    }

    /// 对端不读，大帧把管道写满
    async fn stalled_connection() -> (
        RelayConnection<DuplexConnector>,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        mpsc::UnboundedReceiver<DuplexStream>,
        DuplexStream,
    ) {
        let (peers, mut peer_rx) = mpsc::unbounded_channel();
        let (mut conn, mut events) = RelayConnection::new(
            DuplexConnector {
                peers,
                capacity: 1024,
            },
            NetworkConfig::default(),
            policy(3, 10, 100),
            1 << 20,
        );

        conn.connect();
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        let peer = peer_rx.recv().await.unwrap();

        let large = ProtocolMessage::Error {
            seq: 1,
            message: "x".repeat(64 * 1024),
            code: None,
        };
        conn.send(&large).unwrap();
        (conn, events, peer_rx, peer)
    }

    #[tokio::test]
    async fn test_disconnect_not_blocked_by_stalled_write() {
        let (mut conn, mut events, _peer_rx, mut peer) = stalled_connection().await;

        // 写被卡住时读循环照常工作
        peer.write_all(b"ping").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 4 {
            if let ConnectionEvent::Data(bytes) = events.recv().await.unwrap() {
                received.extend(bytes);
            }
        }
        assert_eq!(received, b"ping");

        timeout(Duration::from_secs(2), conn.disconnect())
            .await
            .expect("disconnect blocked by a stalled write");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_force_reconnect_not_blocked_by_stalled_write() {
        let (mut conn, mut events, mut peer_rx, _peer) = stalled_connection().await;

        assert!(conn.force_reconnect());
        timeout(Duration::from_secs(2), async {
            assert_eq!(next_state(&mut events).await, ConnectionState::Reconnecting);
            assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
            assert_eq!(next_state(&mut events).await, ConnectionState::Connected);
        })
        .await
        .expect("reconnect blocked by a stalled write");
        assert!(peer_rx.recv().await.is_some());

        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_give_up() {
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let (mut conn, mut events) = RelayConnection::new(
            FailingConnector {
                attempts: Arc::clone(&attempts),
            },
            NetworkConfig::default(),
            policy(4, 100, 250),
            1024,
        );

        conn.connect();
        let attempts_reported = loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::Error(SyncError::Connectivity { attempts }) => break attempts,
                ConnectionEvent::Error(other) => panic!("unexpected error: {:?}", other),
                _ => {}
            }
        };
        assert_eq!(attempts_reported, 4);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.retry_count(), 4);

        let times = attempts.lock().unwrap().clone();
        assert_eq!(times.len(), 4);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        let expected = [100, 200, 250].map(Duration::from_millis);
        for (gap, want) in gaps.iter().zip(expected) {
            assert!(*gap >= want, "gap {:?} shorter than {:?}", gap, want);
            assert!(*gap < want + Duration::from_millis(5), "gap {:?} too long", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let mut config = NetworkConfig::default();
        config.connect_timeout_ms = 50;
        let (mut conn, mut events) =
            RelayConnection::new(HangingConnector, config, policy(2, 10, 10), 1024);

        let started = Instant::now();
        conn.connect();
        loop {
            if let ConnectionEvent::Error(err) = events.recv().await.unwrap() {
                assert!(matches!(err, SyncError::Connectivity { attempts: 2 }));
                break;
            }
        }
        assert!(started.elapsed() >= Duration::from_millis(110));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_backoff() {
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let (mut conn, mut events) = RelayConnection::new(
            FailingConnector {
                attempts: Arc::clone(&attempts),
            },
            NetworkConfig::default(),
            policy(5, 60_000, 60_000),
            1024,
        );

        conn.connect();
        while next_state(&mut events).await != ConnectionState::Reconnecting {}

        let started = Instant::now();
        conn.disconnect().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(attempts.lock().unwrap().len(), 1);

        // 断开后可以重新连接
        conn.connect();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        conn.disconnect().await;
    }
}
