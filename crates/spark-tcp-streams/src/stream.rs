//! 单条流的写路径状态机。

use std::io;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::{
    admission::{AdmissionController, AdmissionToken},
    config::TcpStreamsConfig,
    counters::TcpCounters,
    error::{READ, ResetCause, SHUTDOWN, StreamError, WRITE, is_transient, socket_fault},
    slot::WriteSlot,
    socket::StreamSocket,
    types::{StreamId, StreamRole, StreamSignal},
    window::StreamWindow,
};

/// 流的生命周期状态。
///
/// `Open → PendingWrite ⇄ Open → Closed`，任意非终止状态都可以进入 `Reset`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// 没有积压，新数据直接写入套接字。
    Open,
    /// 持有写槽，等待套接字可写以刷出积压。
    PendingWrite,
    /// 积压已刷出且写半部已关闭。
    Closed,
    /// 流被复位，积压被丢弃。
    Reset,
}

impl StreamState {
    /// `Closed` 与 `Reset` 之后不再进行任何 IO。
    pub const fn is_terminal(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Reset)
    }
}

/// 流当前需要的就绪事件。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct StreamInterest {
    pub writable: bool,
    pub readable: bool,
}

/// 状态机操作期间借用的引擎共享部件。
pub(crate) struct StreamEnv<'a> {
    pub config: &'a TcpStreamsConfig,
    pub admission: &'a mut AdmissionController,
    pub counters: &'a TcpCounters,
    pub signals: &'a mut Vec<StreamSignal>,
}

#[derive(Debug)]
struct Backlog {
    slot: WriteSlot,
    token: AdmissionToken,
}

/// 单条逻辑流：套接字、窗口、可选写槽与回复方向额度。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 写路径的全部决策（直写、申请准入、追加积压、刷出、关闭、复位）集中在一个状态机里，
///   引擎只负责把事件路由到正确的流；
/// - 状态机不持有任何锁，所有共享部件通过 [`StreamEnv`] 临时借用。
///
/// ## 逻辑（How）
/// - `on_data`：先消耗窗口额度；若已有积压，先尽量刷出积压，积压仍非空则整段追加，
///   否则直写并把剩余部分追加到写槽（必要时申请准入）；被接纳后即在槽余量内归还窗口；
/// - `on_socket_writable`：从槽首尽量刷出，槽空即释放准入，如有挂起的 END 则半关闭，
///   随后归还此前因余量不足而暂扣的额度；
/// - 任何内部失败都经 `settle` 统一走向 `reset`，保证资源释放只有一条路径。
///
/// ## 契约（What）
/// - 每条流最多持有一个写槽，准入只在“由无积压变为有积压”时申请一次；
/// - 归还额度永不使 `buffered + credit` 超过 `slot_capacity`；`slot_capacity ≥ window_size`
///   （默认）时，只在窗口内发送的上游不会触发槽溢出；
/// - 进入终止状态后所有入口直接返回，不再写入、缓冲或归还窗口；
/// - 对端收到的字节始终是提交字节的前缀，不乱序、不重复。
///
/// ## 注意事项（Trade-offs）
/// - 复位时已写出的字节保持已送达，槽内字节直接丢弃，不做任何补偿。
#[derive(Debug)]
pub(crate) struct TcpStream<S> {
    id: StreamId,
    socket: S,
    role: StreamRole,
    state: StreamState,
    window: StreamWindow,
    backlog: Option<Backlog>,
    end_pending: bool,
    reply_credit: u32,
    read_open: bool,
}

impl<S: StreamSocket> TcpStream<S> {
    /// 创建流并向上游通告初始窗口。
    pub(crate) fn open(id: StreamId, socket: S, role: StreamRole, env: &mut StreamEnv<'_>) -> Self {
        let window = StreamWindow::new(env.config.window_size());
        env.signals.push(StreamSignal::Window {
            stream: id,
            credit: window.credit(),
        });
        debug!(stream = %id, ?role, window = window.size(), "tcp stream opened");
        Self {
            id,
            socket,
            role,
            state: StreamState::Open,
            window,
            backlog: None,
            end_pending: false,
            reply_credit: 0,
            read_open: true,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn role(&self) -> StreamRole {
        self.role
    }

    /// 槽内尚未刷出的字节数。
    pub(crate) fn buffered(&self) -> usize {
        self.backlog.as_ref().map_or(0, |backlog| backlog.slot.len())
    }

    pub(crate) fn window_credit(&self) -> u32 {
        self.window.credit()
    }

    pub(crate) fn interest(&self) -> StreamInterest {
        if self.state.is_terminal() {
            return StreamInterest::default();
        }
        StreamInterest {
            writable: self.state == StreamState::PendingWrite,
            readable: self.read_open && self.reply_credit > 0,
        }
    }

    pub(crate) fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub(crate) fn on_data(&mut self, payload: &[u8], env: &mut StreamEnv<'_>) {
        if self.state.is_terminal() {
            return;
        }
        let result = self.accept_data(payload, env);
        self.settle(result, env);
    }

    pub(crate) fn on_socket_writable(&mut self, env: &mut StreamEnv<'_>) {
        if self.state != StreamState::PendingWrite {
            return;
        }
        let result = self
            .flush_backlog()
            .and_then(|()| self.complete_drain(env));
        let drained = result.is_ok();
        self.settle(result, env);
        if drained && !self.state.is_terminal() {
            self.grant_credit(env);
        }
    }

    pub(crate) fn on_end(&mut self, env: &mut StreamEnv<'_>) {
        if self.state.is_terminal() || self.end_pending {
            return;
        }
        self.end_pending = true;
        let result = match self.backlog {
            None => self.close(),
            Some(_) => {
                debug!(stream = %self.id, buffered = self.buffered(), "end deferred until backlog drains");
                Ok(())
            }
        };
        self.settle(result, env);
    }

    /// 上游主动复位；不回送 `Reset` 信号。
    pub(crate) fn on_reset(&mut self, env: &mut StreamEnv<'_>) {
        if self.state.is_terminal() {
            return;
        }
        self.reset(StreamError::SourceReset, env);
    }

    /// 以套接字故障复位，用于就绪探测失败。
    pub(crate) fn on_socket_fault(&mut self, fault: StreamError, env: &mut StreamEnv<'_>) {
        if self.state.is_terminal() {
            return;
        }
        self.reset(fault, env);
    }

    /// 增加回复方向额度。
    pub(crate) fn grant_reply(&mut self, credit: u32) {
        if self.state.is_terminal() {
            return;
        }
        self.reply_credit = self.reply_credit.saturating_add(credit);
    }

    pub(crate) fn on_socket_readable(&mut self, env: &mut StreamEnv<'_>) {
        if !self.interest().readable {
            return;
        }
        let result = self.read_reply(env);
        self.settle(result, env);
    }

    fn accept_data(&mut self, payload: &[u8], env: &mut StreamEnv<'_>) -> Result<(), StreamError> {
        if self.end_pending {
            return Err(StreamError::DataAfterEnd);
        }
        self.window.consume(payload.len())?;
        self.flush_backlog()?;

        let remainder = if self.buffered() == 0 {
            let written = write_nonblocking(self.id, &mut self.socket, payload)?;
            &payload[written..]
        } else {
            payload
        };
        if !remainder.is_empty() {
            self.buffer(remainder, env)?;
        }

        self.complete_drain(env)?;
        self.grant_credit(env);
        Ok(())
    }

    /// 在槽余量允许的范围内归还窗口额度。
    ///
    /// 上游持有的额度随时可能整段落入槽中，因此归还后须满足
    /// `buffered + credit ≤ slot_capacity`；余量不足的部分暂扣，待槽刷出后再归还。
    fn grant_credit(&mut self, env: &mut StreamEnv<'_>) {
        let buffered = u32::try_from(self.buffered()).unwrap_or(u32::MAX);
        let headroom = env
            .config
            .slot_capacity()
            .saturating_sub(buffered)
            .saturating_sub(self.window.credit());
        let credit = self.window.replenish(headroom as usize);
        if credit > 0 {
            env.signals.push(StreamSignal::Window {
                stream: self.id,
                credit,
            });
        } else if self.window.unreplenished() > 0 {
            trace!(stream = %self.id, withheld = self.window.unreplenished(), buffered, "window credit withheld");
        }
    }

    /// 把剩余字节放入写槽；首次积压时申请准入。
    fn buffer(&mut self, remainder: &[u8], env: &mut StreamEnv<'_>) -> Result<(), StreamError> {
        if self.backlog.is_none() {
            let token = env
                .admission
                .try_acquire(self.id)
                .ok_or(StreamError::AdmissionDenied {
                    capacity: env.admission.capacity(),
                })?;
            debug!(
                stream = %self.id,
                pending_writers = env.admission.len(),
                "stream backlogged; write slot acquired"
            );
            self.backlog = Some(Backlog {
                slot: WriteSlot::with_capacity(env.config.slot_capacity() as usize),
                token,
            });
        }
        if let Some(backlog) = self.backlog.as_mut() {
            backlog.slot.append(remainder)?;
            trace!(stream = %self.id, appended = remainder.len(), buffered = backlog.slot.len(), "bytes buffered");
        }
        self.state = StreamState::PendingWrite;
        Ok(())
    }

    /// 从槽首尽量刷出，不改变状态。
    fn flush_backlog(&mut self) -> Result<(), StreamError> {
        let Some(backlog) = self.backlog.as_mut() else {
            return Ok(());
        };
        let written = write_nonblocking(self.id, &mut self.socket, backlog.slot.chunk())?;
        backlog.slot.drain(written);
        Ok(())
    }

    /// 槽已空时释放准入，并在 END 挂起时完成关闭。
    fn complete_drain(&mut self, env: &mut StreamEnv<'_>) -> Result<(), StreamError> {
        if self.buffered() > 0 {
            return Ok(());
        }
        if let Some(backlog) = self.backlog.take() {
            env.admission.release(backlog.token, self.id);
            debug!(stream = %self.id, "backlog drained; write slot released");
        }
        if self.end_pending {
            return self.close();
        }
        self.state = StreamState::Open;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.socket
            .shutdown_write()
            .map_err(|source| socket_fault(SHUTDOWN, source))?;
        self.state = StreamState::Closed;
        debug!(stream = %self.id, "tcp stream closed");
        Ok(())
    }

    fn read_reply(&mut self, env: &mut StreamEnv<'_>) -> Result<(), StreamError> {
        let max = self.reply_credit.min(env.config.read_chunk_size()) as usize;
        let mut buf = BytesMut::zeroed(max);
        loop {
            match self.socket.try_read(&mut buf) {
                Ok(0) => {
                    self.read_open = false;
                    env.signals.push(StreamSignal::End { stream: self.id });
                    debug!(stream = %self.id, "peer closed its write half");
                    return Ok(());
                }
                Ok(n) => {
                    buf.truncate(n);
                    self.reply_credit -= n as u32;
                    env.signals.push(StreamSignal::Data {
                        stream: self.id,
                        payload: buf.freeze(),
                    });
                    return Ok(());
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if is_transient(&error) => return Ok(()),
                Err(error) => return Err(socket_fault(READ, error)),
            }
        }
    }

    fn settle(&mut self, result: Result<(), StreamError>, env: &mut StreamEnv<'_>) {
        if let Err(error) = result {
            self.reset(error, env);
        }
    }

    fn reset(&mut self, error: StreamError, env: &mut StreamEnv<'_>) {
        let cause = error.cause();
        let discarded = match self.backlog.take() {
            Some(backlog) => {
                env.admission.release(backlog.token, self.id);
                backlog.slot.len()
            }
            None => 0,
        };
        if cause.counts_as_overflow() {
            env.counters.record_overflow();
            warn!(stream = %self.id, code = error.code(), discarded, %error, "tcp stream reset");
        } else {
            debug!(stream = %self.id, code = error.code(), discarded, %error, "tcp stream reset");
        }
        self.socket.abort(env.config.abortive_reset());
        self.state = StreamState::Reset;
        if cause != ResetCause::SourceReset {
            env.signals.push(StreamSignal::Reset {
                stream: self.id,
                cause,
            });
        }
    }
}

/// 循环非阻塞写，直到写完、`WouldBlock` 或套接字不再接受字节。
fn write_nonblocking<S: StreamSocket>(
    id: StreamId,
    socket: &mut S,
    buf: &[u8],
) -> Result<usize, StreamError> {
    let mut written = 0;
    while written < buf.len() {
        match socket.try_write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if is_transient(&error) => break,
            Err(error) => return Err(socket_fault(WRITE, error)),
        }
    }
    if !buf.is_empty() {
        trace!(stream = %id, written, len = buf.len(), "tcp write");
    }
    Ok(written)
}
