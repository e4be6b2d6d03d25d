//! 同步客户端
//!
//! UI 层唯一的入口。`start` 启动一个接收任务，独占帧解析器和同步协调器；
//! UI 的操作通过命令通道交给该任务执行，会话状态通过 `watch` 快照读取。

use std::sync::Arc;
use std::time::Duration;

use protocol::{Codec, Connector, Framer, Move, ProtocolError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::network::{ConnectionEvent, ConnectionState, RelayConnection};
use crate::sync::{
    ChessRules, GameSession, HeartbeatAction, HeartbeatMonitor, SyncCoordinator, SyncObserver,
};

/// 命令队列长度
const COMMAND_QUEUE_SIZE: usize = 32;

/// 心跳检查的最短周期
const MIN_TICK: Duration = Duration::from_millis(10);

enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Join(oneshot::Sender<Result<()>>),
    Move(Move, oneshot::Sender<Result<()>>),
    Leave(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// 同步客户端句柄
pub struct SyncClient {
    commands: mpsc::Sender<Command>,
    session: watch::Receiver<Option<GameSession>>,
    connection: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// 校验设置并启动接收任务（不会自动连接）
    pub fn start<C, R>(
        settings: SyncSettings,
        connector: C,
        rules: R,
        observer: Arc<dyn SyncObserver>,
    ) -> Result<Self>
    where
        C: Connector,
        R: ChessRules + 'static,
    {
        settings.validate()?;

        let (connection, events) = RelayConnection::new(
            connector,
            settings.network.clone(),
            settings.reconnect.clone(),
            settings.max_frame_size,
        );
        let connection_rx = connection.subscribe_state();
        let coordinator = SyncCoordinator::new(
            rules,
            Arc::clone(&observer),
            settings.local_side,
            settings.max_pending_moves,
            connection.subscribe_state(),
        );
        let session_rx = coordinator.subscribe();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

        let receiver = ReceiveLoop {
            connection,
            events,
            commands: commands_rx,
            coordinator,
            framer: Framer::new(settings.max_frame_size),
            heartbeat: HeartbeatMonitor::new(&settings.heartbeat, Instant::now()),
            observer,
        };
        let task = tokio::spawn(receiver.run());

        tracing::info!(
            "Sync client started for relay {} as {}",
            settings.network.addr(),
            settings.local_side
        );

        Ok(Self {
            commands: commands_tx,
            session: session_rx,
            connection: connection_rx,
            task: Some(task),
        })
    }

    /// 连接中继服务器
    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await
    }

    /// 断开连接（会话随之结束）
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// 加入新对局
    pub async fn join(&self) -> Result<()> {
        self.request(Command::Join).await?
    }

    /// 走一步本方棋
    pub async fn send_local_move(&self, mv: Move) -> Result<()> {
        self.request(|reply| Command::Move(mv, reply)).await?
    }

    /// 离开当前对局
    pub async fn leave(&self) -> Result<()> {
        self.request(Command::Leave).await?
    }

    /// 当前会话快照
    pub fn session(&self) -> Option<GameSession> {
        self.session.borrow().clone()
    }

    /// 订阅会话变化
    pub fn subscribe_session(&self) -> watch::Receiver<Option<GameSession>> {
        self.session.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// 订阅连接状态变化
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// 断开连接并停止接收任务，可重复调用
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(reply)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = task.await {
            tracing::warn!("Receive task ended abnormally: {}", e);
        }
        tracing::info!("Sync client stopped");
        Ok(())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SyncError::ClientStopped)?;
        response.await.map_err(|_| SyncError::ClientStopped)
    }
}

/// 接收任务：连接事件 -> 帧解析 -> 解码 -> 协调器 -> 出站队列
struct ReceiveLoop<C: Connector, R: ChessRules> {
    connection: RelayConnection<C>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands: mpsc::Receiver<Command>,
    coordinator: SyncCoordinator<R>,
    framer: Framer,
    heartbeat: HeartbeatMonitor,
    observer: Arc<dyn SyncObserver>,
}

impl<C: Connector, R: ChessRules> ReceiveLoop<C, R> {
    async fn run(mut self) {
        let period = (self.heartbeat.interval() / 2).max(MIN_TICK);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.on_event(event),
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        // 句柄已释放
                        self.stop().await;
                        return;
                    }
                },
                _ = ticker.tick() => self.on_tick(),
            }
            self.flush();
        }
    }

    fn on_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                if state == ConnectionState::Connected {
                    self.framer.reset();
                    self.heartbeat.reset(Instant::now());
                }
                self.coordinator.handle_connection_state(state);
            }
            ConnectionEvent::Data(bytes) => {
                self.heartbeat.record_inbound(Instant::now());
                self.framer.feed(&bytes);
                self.drain_frames();
            }
            ConnectionEvent::Error(error) => {
                self.observer.on_error(&error);
            }
        }
    }

    fn drain_frames(&mut self) {
        for next in self.framer.frames() {
            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Dropping frame: {}", e);
                    continue;
                }
            };
            match Codec::decode(&frame) {
                Ok(msg) => self.coordinator.handle_message(msg),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("Dropping message: {}", e);
                }
                Err(e) => self.observer.on_error(&SyncError::Protocol(e)),
            }
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => {
                self.connection.connect();
                let _ = reply.send(());
            }
            Command::Disconnect(reply) => {
                self.connection.disconnect().await;
                let _ = reply.send(());
            }
            Command::Join(reply) => {
                let result = self.require_connected().map(|()| self.coordinator.join());
                let _ = reply.send(result);
            }
            Command::Move(mv, reply) => {
                let result = self
                    .require_connected()
                    .and_then(|()| self.coordinator.send_local_move(mv));
                let _ = reply.send(result);
            }
            Command::Leave(reply) => {
                let _ = reply.send(self.coordinator.leave());
            }
            Command::Shutdown(reply) => {
                // run() 已单独处理
                let _ = reply.send(());
            }
        }
    }

    fn on_tick(&mut self) {
        if self.connection.state() != ConnectionState::Connected {
            return;
        }
        let now = Instant::now();
        match self.heartbeat.check(now) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendHeartbeat => self.coordinator.heartbeat(),
            HeartbeatAction::TimedOut => {
                tracing::warn!("No traffic from relay, forcing reconnect");
                self.observer.on_error(&SyncError::HeartbeatTimeout);
                self.connection.force_reconnect();
                self.heartbeat.reset(now);
            }
        }
    }

    /// 把协调器产生的消息交给连接的写队列
    fn flush(&mut self) {
        for msg in self.coordinator.take_outbox() {
            match self.connection.send(&msg) {
                Ok(()) => self.heartbeat.record_outbound(Instant::now()),
                Err(e) => tracing::warn!("Dropping outbound {} seq={}: {}", msg.kind(), msg.seq(), e),
            }
        }
    }

    fn require_connected(&self) -> Result<()> {
        if self.connection.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(SyncError::Protocol(ProtocolError::NotConnected))
        }
    }

    async fn stop(&mut self) {
        self.flush();
        self.connection.disconnect().await;
        // 让观察者看到最终的断开状态
        while let Ok(event) = self.events.try_recv() {
            self.on_event(event);
        }
    }
}
