use std::sync::Arc;

use anyhow::Result;
use chess_sync::{ConnectionState, LoggingObserver, StandardRules, SyncClient, SyncSettings};
use protocol::{Fen, Move, TcpConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = SyncSettings::load()?;

    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("chess_sync={}", settings.log_level).parse()?)
                .add_directive(format!("protocol={}", settings.log_level).parse()?),
        )
        .init();

    info!("AR 国际象棋同步客户端启动中...");

    let local_side = settings.local_side;
    let relay = settings.network.addr();
    let mut client = SyncClient::start(
        settings,
        TcpConnector,
        StandardRules,
        Arc::new(LoggingObserver),
    )?;

    client.connect().await?;
    let mut connection = client.subscribe_connection();
    let state = *connection
        .wait_for(|state| {
            matches!(state, ConnectionState::Connected | ConnectionState::Disconnected)
        })
        .await?;
    if state != ConnectionState::Connected {
        client.shutdown().await?;
        anyhow::bail!("无法连接中继服务器 {}", relay);
    }
    client.join().await?;

    info!("输入走法（如 e2e4、e7e8q），`board` 查看局面，`leave` 离开，`quit` 退出");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => continue,
                    "quit" => break,
                    "leave" => {
                        if let Err(e) = client.leave().await {
                            warn!("{}", e);
                        }
                    }
                    "join" => {
                        if let Err(e) = client.join().await {
                            warn!("{}", e);
                        }
                    }
                    "board" => match client.session() {
                        Some(session) => info!("{}", Fen::to_string(&session.state)),
                        None => info!("没有进行中的对局"),
                    },
                    text => match Move::parse_coordinate(text, local_side) {
                        Ok(mv) => {
                            if let Err(e) = client.send_local_move(mv).await {
                                warn!("{}", e);
                            }
                        }
                        Err(e) => warn!("无法解析走法: {}", e),
                    },
                }
            }
        }
    }

    client.shutdown().await?;
    Ok(())
}
