//! 单任务反应器：在一个 Tokio 任务内驱动 [`TcpStreamEngine`]。
//!
//! # 设计背景（Why）
//! - 引擎要求独占访问；把它放进单个任务，并通过通道接收上游命令，
//!   多个生产者即可安全地并发提交 DATA/END/RESET，而引擎内部依旧无锁；
//! - 上游信号经无界通道回传：信号总量受窗口额度约束，不会无限堆积。
//!
//! # 契约说明（What）
//! - [`TcpStreamReactor::run`] 在所有句柄被丢弃或收到 `shutdown` 时返回，返回前丢弃全部套接字；
//! - 句柄上的操作只在反应器已退出时失败（[`EngineError::ReactorClosed`]）；
//!   针对已终止流的命令会被静默忽略，因为流可能在命令排队期间自行终止。

use std::future::poll_fn;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{
    config::{ConfigError, TcpStreamsConfig},
    engine::TcpStreamEngine,
    error::EngineError,
    socket::{StreamSocket, TokioSocket},
    types::{RouteId, StreamId, StreamRole, StreamSignal},
};

enum Command<S> {
    EstablishRoute(RouteId),
    RemoveRoute(RouteId),
    Open {
        route: RouteId,
        socket: S,
        role: StreamRole,
        reply: oneshot::Sender<Result<StreamId, EngineError>>,
    },
    Data {
        stream: StreamId,
        payload: Bytes,
    },
    End(StreamId),
    Reset(StreamId),
    GrantReply {
        stream: StreamId,
        credit: u32,
    },
    Shutdown,
}

/// 向反应器提交上游命令的句柄。
#[derive(Debug)]
pub struct ReactorHandle<S = TokioSocket> {
    commands: mpsc::UnboundedSender<Command<S>>,
}

impl<S> Clone for ReactorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Command<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::EstablishRoute(route) => f.debug_tuple("EstablishRoute").field(route).finish(),
            Command::RemoveRoute(route) => f.debug_tuple("RemoveRoute").field(route).finish(),
            Command::Open { route, role, .. } => f
                .debug_struct("Open")
                .field("route", route)
                .field("role", role)
                .finish_non_exhaustive(),
            Command::Data { stream, payload } => f
                .debug_struct("Data")
                .field("stream", stream)
                .field("len", &payload.len())
                .finish(),
            Command::End(stream) => f.debug_tuple("End").field(stream).finish(),
            Command::Reset(stream) => f.debug_tuple("Reset").field(stream).finish(),
            Command::GrantReply { stream, credit } => f
                .debug_struct("GrantReply")
                .field("stream", stream)
                .field("credit", credit)
                .finish(),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl<S: StreamSocket> ReactorHandle<S> {
    pub fn establish_route(&self, route: RouteId) -> Result<(), EngineError> {
        self.send(Command::EstablishRoute(route))
    }

    pub fn remove_route(&self, route: RouteId) -> Result<(), EngineError> {
        self.send(Command::RemoveRoute(route))
    }

    /// 打开流并等待反应器分配标识。
    pub async fn open_stream(
        &self,
        route: RouteId,
        socket: S,
        role: StreamRole,
    ) -> Result<StreamId, EngineError> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Open {
            route,
            socket,
            role,
            reply,
        })?;
        answer.await.map_err(|_| EngineError::ReactorClosed)?
    }

    pub fn data(&self, stream: StreamId, payload: impl Into<Bytes>) -> Result<(), EngineError> {
        self.send(Command::Data {
            stream,
            payload: payload.into(),
        })
    }

    pub fn end(&self, stream: StreamId) -> Result<(), EngineError> {
        self.send(Command::End(stream))
    }

    pub fn reset(&self, stream: StreamId) -> Result<(), EngineError> {
        self.send(Command::Reset(stream))
    }

    pub fn grant_reply_window(&self, stream: StreamId, credit: u32) -> Result<(), EngineError> {
        self.send(Command::GrantReply { stream, credit })
    }

    /// 请求反应器退出；已排队的命令先于退出被处理。
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command<S>) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::ReactorClosed)
    }
}

/// [`TcpStreamReactor::new`] 的返回值：反应器、命令句柄与上游信号接收端。
pub type ReactorParts<S> = (
    TcpStreamReactor<S>,
    ReactorHandle<S>,
    mpsc::UnboundedReceiver<StreamSignal>,
);

/// 驱动引擎的单任务反应器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“命令到达”与“套接字就绪”两类事件合并到同一个 `select!` 循环，
///   引擎在任一时刻只被一个分支以 `&mut` 访问。
///
/// ## 逻辑（How）
/// - 循环体在命令接收与 `poll_fn(|cx| engine.poll_readiness(cx))` 之间选择；
/// - 每一步之后把引擎暂存的信号全部转发给上游接收端；
/// - 接收端被丢弃时信号被丢弃，引擎照常运行直至关闭。
///
/// ## 契约（What）
/// - `new` 返回反应器、可克隆句柄与信号接收端；调用方负责 `tokio::spawn(reactor.run())`。
#[derive(Debug)]
pub struct TcpStreamReactor<S: StreamSocket = TokioSocket> {
    engine: TcpStreamEngine<S>,
    commands: mpsc::UnboundedReceiver<Command<S>>,
    signals: mpsc::UnboundedSender<StreamSignal>,
}

impl<S: StreamSocket> TcpStreamReactor<S> {
    /// 以给定配置创建反应器。
    pub fn new(config: TcpStreamsConfig) -> Result<ReactorParts<S>, ConfigError> {
        Ok(Self::with_engine(TcpStreamEngine::new(config)?))
    }

    /// 包装已有引擎，例如共享计数器的引擎。
    pub fn with_engine(engine: TcpStreamEngine<S>) -> ReactorParts<S> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        (
            Self {
                engine,
                commands: command_rx,
                signals: signal_tx,
            },
            ReactorHandle {
                commands: command_tx,
            },
            signal_rx,
        )
    }

    pub fn engine(&self) -> &TcpStreamEngine<S> {
        &self.engine
    }

    /// 运行直到关闭。
    pub async fn run(self) {
        let Self {
            mut engine,
            mut commands,
            signals,
        } = self;
        debug!("tcp stream reactor started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => apply(&mut engine, command),
                },
                dispatched = poll_fn(|cx| engine.poll_readiness(cx)) => {
                    trace!(dispatched, "readiness events dispatched");
                }
            }
            for signal in engine.drain_signals() {
                let _ = signals.send(signal);
            }
        }
        debug!(active = engine.active_streams(), "tcp stream reactor stopped");
    }
}

fn apply<S: StreamSocket>(engine: &mut TcpStreamEngine<S>, command: Command<S>) {
    let result = match command {
        Command::EstablishRoute(route) => {
            engine.establish_route(route);
            Ok(())
        }
        Command::RemoveRoute(route) => {
            engine.remove_route(route);
            Ok(())
        }
        Command::Open {
            route,
            socket,
            role,
            reply,
        } => {
            let _ = reply.send(engine.open_stream(route, socket, role));
            Ok(())
        }
        Command::Data { stream, payload } => engine.on_data(stream, &payload),
        Command::End(stream) => engine.on_end(stream),
        Command::Reset(stream) => engine.on_reset(stream),
        Command::GrantReply { stream, credit } => engine.grant_reply_window(stream, credit),
        Command::Shutdown => Ok(()),
    };
    if let Err(error) = result {
        debug!(%error, "command ignored");
    }
}
