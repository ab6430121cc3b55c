//! The connection server: TCP listener, per-connection framing, and the
//! single engine actor every connection dispatches through.
//!
//! All engine state must be touched non-preemptively — one command runs to
//! completion before the next begins. Rather than a mutex around the
//! `Engine`, a single task owns the `Engine` and the `AppendLog`, and every
//! connection talks to it over an unbounded channel plus a oneshot reply
//! per command.

use crate::append_log::AppendLog;
use crate::config::ServerConfig;
use crate::dispatch::dispatch;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::resp::{CommandFrame, Reply, ReplyEncoder, RequestDecoder};
use futures_channel::{mpsc, oneshot};
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

enum EngineMsg {
    Dispatch(CommandFrame, oneshot::Sender<Reply>),
    Purge,
}

type EngineSender = mpsc::UnboundedSender<EngineMsg>;

/// A cheap, cloneable handle every connection task uses to reach the
/// engine actor.
#[derive(Clone)]
struct EngineHandle {
    sender: EngineSender,
}

impl EngineHandle {
    async fn dispatch(&self, frame: CommandFrame) -> Reply {
        let (tx, rx) = oneshot::channel();
        if self.sender.unbounded_send(EngineMsg::Dispatch(frame, tx)).is_err() {
            return Reply::Error("ERR server is shutting down".into());
        }
        rx.await.unwrap_or_else(|_| Reply::Error("ERR server is shutting down".into()))
    }

    fn trigger_purge(&self) {
        let _ = self.sender.unbounded_send(EngineMsg::Purge);
    }
}

/// Runs the engine actor until every `EngineHandle` has been dropped.
async fn run_engine_actor(mut receiver: mpsc::UnboundedReceiver<EngineMsg>, log_path: String) {
    let mut engine = Engine::new();
    let log = AppendLog::new(log_path);

    while let Some(msg) = receiver.next().await {
        match msg {
            EngineMsg::Dispatch(frame, reply_tx) => {
                let reply = dispatch(&frame, &mut engine, &log);
                let _ = reply_tx.send(reply);
            }
            EngineMsg::Purge => engine.purge(),
        }
    }
    debug!("engine actor stopped");
}

/// Binds the listener and runs the accept loop until `shutdown` resolves,
/// draining in-flight connections gracefully on an operator interrupt.
pub async fn run(config: ServerConfig, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
    let listener = TcpListener::bind(config.addr).await?;
    info!("listening on {}", config.addr);

    let (engine_tx, engine_rx) = mpsc::unbounded();
    let engine_task = tokio::spawn(run_engine_actor(engine_rx, config.log_path.clone()));
    let handle = EngineHandle { sender: engine_tx };

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tune_socket(&stream);
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handle).await {
                        debug!("connection {peer} closed: {e}");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    drop(handle);
    let _ = engine_task.await;
    Ok(())
}

fn tune_socket(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!("failed to set keepalive: {e}");
    }
    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {e}");
    }
}

/// One connection's life: read a command, dispatch it through the engine
/// actor, queue its reply, and — once no more frames are immediately
/// available — flush every queued reply in a single write.
async fn handle_connection(stream: TcpStream, engine: EngineHandle) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut framed_read = FramedRead::new(reader, RequestDecoder);
    let mut framed_write = FramedWrite::new(writer, ReplyEncoder);

    let mut last_purge = tokio::time::Instant::now();
    let purge_interval = Duration::from_millis(100);

    while let Some(frame) = framed_read.next().await {
        let frame = frame?;

        if last_purge.elapsed() >= purge_interval {
            engine.trigger_purge();
            last_purge = tokio::time::Instant::now();
        }

        let mut replies = vec![engine.dispatch(frame).await];
        while let Some(Some(next)) = framed_read.next().now_or_never() {
            replies.push(engine.dispatch(next?).await);
        }

        for reply in replies {
            framed_write.feed(reply).await?;
        }
        framed_write.flush().await?;
    }

    Ok(())
}
