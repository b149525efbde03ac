//! 引擎看到的非阻塞套接字抽象。
//!
//! # 设计背景（Why）
//! - 写路径只需要“尝试写/尝试读/等待就绪/半关闭/中止”五个动作，抽象成 trait 后，
//!   测试可以用脚本化实现精确复现分片写与不可写窗口；
//! - trait 是 sealed 的：生产实现只有 [`TokioSocket`]，测试实现位于 `testing` 模块，
//!   外部 crate 无法提供第三种实现，从而不会绕过就绪语义。
//!
//! # 契约说明（What）
//! - `try_*` 永不阻塞：暂时无法推进时返回 `WouldBlock`；
//! - `poll_*` 在未就绪时登记 `Waker` 并返回 `Pending`，就绪后由调用方紧接着调用 `try_*`；
//! - `abort` 只做尽力而为的关闭，失败仅记录日志，随后套接字会被丢弃。

use std::{
    io,
    net::{Shutdown as StdShutdown, SocketAddr},
    task::{Context, Poll},
    time::Duration,
};

use socket2::SockRef;
use tokio::net::TcpStream as TokioTcpStream;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// 单条流下游的非阻塞套接字。
pub trait StreamSocket: sealed::Sealed + Send + 'static {
    /// 非阻塞写，返回实际写入的字节数。
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// 非阻塞读，`Ok(0)` 表示对端已关闭写半部。
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 等待可写。
    fn poll_writable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// 等待可读。
    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// 关闭写半部，对端随后读到 EOF。
    fn shutdown_write(&mut self) -> io::Result<()>;

    /// 复位时关闭连接；`abortive` 为真时以 RST 终止，否则以 FIN 终止。
    fn abort(&mut self, abortive: bool);
}

/// 基于 Tokio `TcpStream` 的生产实现。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 引擎运行在单一任务中，套接字由它独占，因此不再需要互斥锁包裹流；
/// - 直接复用 Tokio 的 `poll_write_ready`/`try_write` 组合，就绪信息来自运行时的 IO 驱动。
///
/// ## 逻辑 (How)
/// - `try_*` 返回 `WouldBlock` 时 Tokio 会清除就绪标记，下一次 `poll_*` 因而登记 `Waker`；
/// - 半关闭与 `SO_LINGER` 通过 `socket2::SockRef` 在借用上完成，不转移所有权。
///
/// ## 注意事项 (Trade-offs)
/// - `abort(false)` 执行双向 `shutdown`，若本端仍有未读入站数据，内核可能改发 RST。
#[derive(Debug)]
pub struct TokioSocket {
    stream: TokioTcpStream,
}

impl TokioSocket {
    pub fn new(stream: TokioTcpStream) -> Self {
        Self { stream }
    }

    /// 从标准库流构造，自动切换到非阻塞模式。
    ///
    /// 必须在 Tokio 运行时上下文内调用。
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        TokioTcpStream::from_std(stream).map(Self::new)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn into_inner(self) -> TokioTcpStream {
        self.stream
    }
}

impl sealed::Sealed for TokioSocket {}

impl StreamSocket for TokioSocket {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn poll_writable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_write_ready(cx)
    }

    fn poll_readable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_read_ready(cx)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        sync_shutdown(&self.stream, StdShutdown::Write)
    }

    fn abort(&mut self, abortive: bool) {
        let sock = SockRef::from(&self.stream);
        let result = if abortive {
            sock.set_linger(Some(Duration::ZERO))
        } else {
            sock.shutdown(StdShutdown::Both)
        };
        if let Err(error) = result {
            tracing::trace!(%error, abortive, "tcp abort failed; socket will be dropped anyway");
        }
    }
}

fn sync_shutdown(stream: &TokioTcpStream, direction: StdShutdown) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.shutdown(direction)
}
