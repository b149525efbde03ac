use std::{
    collections::HashSet,
    sync::Arc,
    task::{Context, Poll},
    vec,
};

use tracing::debug;

use crate::{
    admission::AdmissionController,
    config::{ConfigError, TcpStreamsConfig},
    counters::TcpCounters,
    error::{EngineError, socket_fault},
    poller::{ReadinessPoller, ReadyKind},
    socket::{StreamSocket, TokioSocket},
    stream::{StreamEnv, StreamState, TcpStream},
    table::StreamTable,
    types::{RouteId, StreamId, StreamRole, StreamSignal},
};

/// TCP 写路径引擎：流表、准入表、写槽与计数器的唯一所有者。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 所有可变状态只被一个执行单元以 `&mut self` 访问，因此流、槽与准入表都不需要锁；
/// - 计数器是唯一的共享部件，以 `Arc<TcpCounters>` 暴露给观测方。
///
/// ## 逻辑（How）
/// - 上游事件（`on_data`/`on_end`/`on_reset`/`grant_reply_window`）按 [`StreamId`] 路由到状态机；
/// - [`poll_readiness`](Self::poll_readiness) 由所在任务驱动：收集就绪事件并逐个分发；
/// - 每次操作后进入终止状态的流立即从表中移除，其套接字在同一调用内被丢弃；
/// - 发往上游的 [`StreamSignal`] 先暂存，由调用方通过 [`drain_signals`](Self::drain_signals) 取走。
///
/// ## 契约（What）
/// - 打开流前必须先 [`establish_route`](Self::establish_route)，否则返回 [`EngineError::UnknownRoute`]；
/// - 针对已终止或从未存在的流的操作返回 [`EngineError::UnknownStream`]，不影响其他流；
/// - 任一时刻持槽流数不超过 `max_pending_write_streams`。
///
/// ## 注意事项（Trade-offs）
/// - 引擎不做超时检测；慢消费者只会受槽容量与准入上限约束。
#[derive(Debug)]
pub struct TcpStreamEngine<S: StreamSocket = TokioSocket> {
    config: TcpStreamsConfig,
    counters: Arc<TcpCounters>,
    admission: AdmissionController,
    routes: HashSet<RouteId>,
    streams: StreamTable<TcpStream<S>>,
    poller: ReadinessPoller,
    signals: Vec<StreamSignal>,
}

impl<S: StreamSocket> TcpStreamEngine<S> {
    /// 以独立计数器创建引擎。
    pub fn new(config: TcpStreamsConfig) -> Result<Self, ConfigError> {
        Self::with_counters(config, Arc::new(TcpCounters::new()))
    }

    /// 与其他引擎共享同一组进程级计数器。
    pub fn with_counters(
        config: TcpStreamsConfig,
        counters: Arc<TcpCounters>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            admission: AdmissionController::new(config.max_pending_write_streams()),
            config,
            counters,
            routes: HashSet::new(),
            streams: StreamTable::new(),
            poller: ReadinessPoller::new(),
            signals: Vec::new(),
        })
    }

    pub fn config(&self) -> &TcpStreamsConfig {
        &self.config
    }

    pub fn counters(&self) -> Arc<TcpCounters> {
        Arc::clone(&self.counters)
    }

    /// 记录已建立的路由；同一路由只计数一次。
    pub fn establish_route(&mut self, route: RouteId) {
        if self.routes.insert(route) {
            self.counters.record_route();
            debug!(%route, "route established");
        }
    }

    /// 遗忘路由；已打开的流不受影响。
    pub fn remove_route(&mut self, route: RouteId) -> bool {
        self.routes.remove(&route)
    }

    pub fn has_route(&self, route: RouteId) -> bool {
        self.routes.contains(&route)
    }

    /// 在已建立的路由上打开流，并发出初始窗口信号。
    pub fn open_stream(
        &mut self,
        route: RouteId,
        socket: S,
        role: StreamRole,
    ) -> Result<StreamId, EngineError> {
        if !self.routes.contains(&route) {
            return Err(EngineError::UnknownRoute(route));
        }
        let Self {
            config,
            counters,
            admission,
            streams,
            signals,
            ..
        } = self;
        let mut env = StreamEnv {
            config,
            admission,
            counters,
            signals,
        };
        let id = streams.insert_with(|id| TcpStream::open(id, socket, role, &mut env));
        counters.record_stream();
        debug!(stream = %id, %route, "stream bound to route");
        Ok(id)
    }

    /// 上游 DATA。
    pub fn on_data(&mut self, stream: StreamId, payload: &[u8]) -> Result<(), EngineError> {
        self.with_stream(stream, |s, env| s.on_data(payload, env))
    }

    /// 上游 END：积压刷出后关闭写半部。
    pub fn on_end(&mut self, stream: StreamId) -> Result<(), EngineError> {
        self.with_stream(stream, |s, env| s.on_end(env))
    }

    /// 上游 RESET：立即复位，丢弃积压。
    pub fn on_reset(&mut self, stream: StreamId) -> Result<(), EngineError> {
        self.with_stream(stream, |s, env| s.on_reset(env))
    }

    /// 授予回复方向读取额度。
    pub fn grant_reply_window(&mut self, stream: StreamId, credit: u32) -> Result<(), EngineError> {
        self.with_stream(stream, |s, _| s.grant_reply(credit))
    }

    /// 套接字可写时刷出积压。
    pub fn on_socket_writable(&mut self, stream: StreamId) -> Result<(), EngineError> {
        self.with_stream(stream, |s, env| s.on_socket_writable(env))
    }

    /// 套接字可读时读取回复数据。
    pub fn on_socket_readable(&mut self, stream: StreamId) -> Result<(), EngineError> {
        self.with_stream(stream, |s, env| s.on_socket_readable(env))
    }

    /// 探测所有有兴趣的流并分发就绪事件，返回分发的事件数。
    ///
    /// 没有任何事件时返回 `Pending`，此时每个有兴趣的流都已登记 `cx` 的 `Waker`。
    pub fn poll_readiness(&mut self, cx: &mut Context<'_>) -> Poll<usize> {
        let events = self.poller.collect(&mut self.streams, cx);
        if events.is_empty() {
            return Poll::Pending;
        }
        let dispatched = events.len();
        for event in events {
            let id = event.stream;
            // 同一批次中先前的事件可能已使该流终止。
            let _ = match event.kind {
                ReadyKind::Writable => self.on_socket_writable(id),
                ReadyKind::Readable => self.on_socket_readable(id),
                ReadyKind::Failed(op, source) => {
                    let fault = socket_fault(op, source);
                    self.with_stream(id, |s, env| s.on_socket_fault(fault, env))
                }
            };
        }
        Poll::Ready(dispatched)
    }

    pub fn stream_state(&self, stream: StreamId) -> Option<StreamState> {
        self.streams.get(stream).map(TcpStream::state)
    }

    pub fn stream_role(&self, stream: StreamId) -> Option<StreamRole> {
        self.streams.get(stream).map(TcpStream::role)
    }

    /// 流的写槽中尚未刷出的字节数。
    pub fn buffered(&self, stream: StreamId) -> Option<usize> {
        self.streams.get(stream).map(TcpStream::buffered)
    }

    /// 上游当前还可发送的窗口额度。
    pub fn window_credit(&self, stream: StreamId) -> Option<u32> {
        self.streams.get(stream).map(TcpStream::window_credit)
    }

    /// 当前持有写槽的流数量。
    pub fn pending_writers(&self) -> usize {
        self.admission.len()
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// 取走暂存的上游信号。
    pub fn drain_signals(&mut self) -> vec::Drain<'_, StreamSignal> {
        self.signals.drain(..)
    }

    fn with_stream(
        &mut self,
        id: StreamId,
        op: impl FnOnce(&mut TcpStream<S>, &mut StreamEnv<'_>),
    ) -> Result<(), EngineError> {
        let Self {
            config,
            counters,
            admission,
            streams,
            signals,
            ..
        } = self;
        let stream = streams.get_mut(id).ok_or(EngineError::UnknownStream(id))?;
        let mut env = StreamEnv {
            config,
            admission,
            counters,
            signals,
        };
        op(stream, &mut env);
        let state = stream.state();
        if state.is_terminal() {
            streams.remove(id);
            debug!(stream = %id, ?state, "stream removed");
        }
        Ok(())
    }
}
