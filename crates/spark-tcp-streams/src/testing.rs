//! 脚本化套接字：分片写、可写门控、入站数据与故障注入。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 真实内核的发送缓冲大小不可控，无法稳定复现“只写入 5 字节、随后不可写”的时序；
//! - 脚本化套接字把每次 `try_write` 能接受的字节数写成脚本，测试因而完全确定。
//!
//! ## 逻辑（How）
//! - [`scripted_pair`] 返回引擎侧的 [`ScriptedSocket`] 与测试侧的 [`ScriptedPeer`]，
//!   二者共享 `Arc<parking_lot::Mutex<PeerState>>`；
//! - 写脚本中每一项对应一次 `try_write` 调用的上限；脚本耗尽后使用 `then` 作为上限，
//!   上限为 [`BLOCKED`] 时返回 `WouldBlock` 并在 `poll_writable` 登记 `Waker`；
//! - 测试调用 [`ScriptedPeer::unblock_writes`] 等方法时唤醒已登记的 `Waker`。
//!
//! ## 契约（What）
//! - 仅在 `test` 或 `test-util` 特性下编译，不属于生产契约；
//! - 对端视角的观测（收到的字节、是否半关闭、是否被中止或丢弃）全部经由 [`ScriptedPeer`]。

use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use crate::socket::{StreamSocket, sealed};

/// 单次写入不设上限。
pub const ALL: usize = usize::MAX;
/// 套接字不可写。
pub const BLOCKED: usize = 0;

#[derive(Debug)]
struct PeerState {
    write_script: VecDeque<usize>,
    write_then: usize,
    write_fault: Option<io::ErrorKind>,
    write_attempts: usize,
    received: Vec<u8>,
    inbound: VecDeque<u8>,
    inbound_eof: bool,
    read_fault: Option<io::ErrorKind>,
    write_shutdown: bool,
    aborted: Option<bool>,
    dropped: bool,
    write_waker: Option<Waker>,
    read_waker: Option<Waker>,
}

impl PeerState {
    fn next_write_cap(&self) -> usize {
        self.write_script.front().copied().unwrap_or(self.write_then)
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

/// 创建一对相连的脚本化套接字与对端观测句柄，初始状态下写入不受限。
pub fn scripted_pair() -> (ScriptedSocket, ScriptedPeer) {
    let state = Arc::new(Mutex::new(PeerState {
        write_script: VecDeque::new(),
        write_then: ALL,
        write_fault: None,
        write_attempts: 0,
        received: Vec::new(),
        inbound: VecDeque::new(),
        inbound_eof: false,
        read_fault: None,
        write_shutdown: false,
        aborted: None,
        dropped: false,
        write_waker: None,
        read_waker: None,
    }));
    (
        ScriptedSocket {
            state: Arc::clone(&state),
        },
        ScriptedPeer { state },
    )
}

/// 引擎侧的脚本化套接字。
#[derive(Debug)]
pub struct ScriptedSocket {
    state: Arc<Mutex<PeerState>>,
}

/// 测试侧的对端句柄，可在引擎运行时从任意线程操作。
#[derive(Clone, Debug)]
pub struct ScriptedPeer {
    state: Arc<Mutex<PeerState>>,
}

impl ScriptedPeer {
    /// 替换写脚本：依次作为后续每次 `try_write` 的上限，耗尽后使用 `then`。
    pub fn script_writes(&self, caps: impl IntoIterator<Item = usize>, then: usize) {
        let mut state = self.state.lock();
        state.write_script = caps.into_iter().collect();
        state.write_then = then;
        state.wake_writer();
    }

    /// 清空脚本并恢复不受限写入。
    pub fn unblock_writes(&self) {
        self.script_writes([], ALL);
    }

    /// 清空脚本并使套接字不可写。
    pub fn block_writes(&self) {
        self.script_writes([], BLOCKED);
    }

    /// 对端至今收到的全部字节。
    pub fn received(&self) -> Vec<u8> {
        self.state.lock().received.clone()
    }

    /// 取走对端已收到的字节，用于长时间运行的基准。
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().received)
    }

    /// 本端调用 `try_write` 的累计次数，包括返回 `WouldBlock` 的调用。
    pub fn write_attempts(&self) -> usize {
        self.state.lock().write_attempts
    }

    /// 对端向本端发送字节（回复方向）。
    pub fn send(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.inbound.extend(bytes.iter().copied());
        state.wake_reader();
    }

    /// 对端关闭写半部，本端读尽后得到 EOF。
    pub fn close_write(&self) {
        let mut state = self.state.lock();
        state.inbound_eof = true;
        state.wake_reader();
    }

    /// 此后每次写入都以 `kind` 失败。
    pub fn inject_write_fault(&self, kind: io::ErrorKind) {
        let mut state = self.state.lock();
        state.write_fault = Some(kind);
        state.wake_writer();
    }

    /// 此后每次读取都以 `kind` 失败。
    pub fn inject_read_fault(&self, kind: io::ErrorKind) {
        let mut state = self.state.lock();
        state.read_fault = Some(kind);
        state.wake_reader();
    }

    /// 本端是否执行了写半关闭。
    pub fn is_write_shutdown(&self) -> bool {
        self.state.lock().write_shutdown
    }

    /// 本端是否以复位方式关闭；`Some(true)` 表示 RST。
    pub fn aborted(&self) -> Option<bool> {
        self.state.lock().aborted
    }

    /// 本端是否已丢弃套接字。
    pub fn is_dropped(&self) -> bool {
        self.state.lock().dropped
    }

    /// 对端是否会观察到 EOF：写半关闭、非 RST 复位或套接字被丢弃。
    pub fn observed_eof(&self) -> bool {
        let state = self.state.lock();
        state.write_shutdown || state.aborted == Some(false) || state.dropped
    }
}

impl sealed::Sealed for ScriptedSocket {}

impl StreamSocket for ScriptedSocket {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.write_attempts += 1;
        if let Some(kind) = state.write_fault {
            return Err(io::Error::new(kind, "injected write fault"));
        }
        if state.write_shutdown || state.aborted.is_some() {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let cap = state.next_write_cap();
        if cap == BLOCKED {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        state.write_script.pop_front();
        let written = cap.min(buf.len());
        state.received.extend_from_slice(&buf[..written]);
        Ok(written)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if let Some(kind) = state.read_fault {
            return Err(io::Error::new(kind, "injected read fault"));
        }
        if state.inbound.is_empty() {
            return if state.inbound_eof {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        }
        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn poll_writable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();
        if state.write_fault.is_some() || state.next_write_cap() != BLOCKED {
            return Poll::Ready(Ok(()));
        }
        state.write_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.state.lock();
        if state.read_fault.is_some() || state.inbound_eof || !state.inbound.is_empty() {
            return Poll::Ready(Ok(()));
        }
        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.state.lock().write_shutdown = true;
        Ok(())
    }

    fn abort(&mut self, abortive: bool) {
        self.state.lock().aborted = Some(abortive);
    }
}

impl Drop for ScriptedSocket {
    fn drop(&mut self) {
        self.state.lock().dropped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_script_caps_each_call_then_blocks() {
        let (mut socket, peer) = scripted_pair();
        peer.script_writes([5, 6], BLOCKED);

        assert_eq!(socket.try_write(b"client data 1").expect("first"), 5);
        assert_eq!(socket.try_write(b"data 1").expect("second"), 6);
        let err = socket.try_write(b"1").expect_err("blocked");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(peer.write_attempts(), 3);
        assert_eq!(peer.received(), b"client data 1"[..11].to_vec());
    }

    #[test]
    fn unblocking_wakes_the_registered_writer() {
        let (mut socket, peer) = scripted_pair();
        peer.block_writes();

        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert!(socket.poll_writable(&mut cx).is_pending());
        peer.unblock_writes();
        assert!(socket.poll_writable(&mut cx).is_ready());
    }

    #[test]
    fn inbound_bytes_then_eof() {
        let (mut socket, peer) = scripted_pair();
        peer.send(b"pong");
        peer.close_write();

        let mut buf = [0u8; 3];
        assert_eq!(socket.try_read(&mut buf).expect("read"), 3);
        assert_eq!(&buf, b"pon");
        assert_eq!(socket.try_read(&mut buf).expect("read"), 1);
        assert_eq!(socket.try_read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn drop_is_visible_to_peer() {
        let (socket, peer) = scripted_pair();
        assert!(!peer.observed_eof());
        drop(socket);
        assert!(peer.is_dropped());
        assert!(peer.observed_eof());
    }
}
