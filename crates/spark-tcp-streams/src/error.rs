//! 写路径错误域。
//!
//! - [`OperationKind`] 为每类套接字操作提供稳定错误码与默认文案；
//! - [`StreamError`] 描述单条流走向复位的全部原因，[`ResetCause`] 是它可复制的摘要，
//!   随 [`StreamSignal::Reset`](crate::StreamSignal::Reset) 发往上游；
//! - [`EngineError`] 只描述调用方误用（未知路由、已终止的流、反应器已关闭）。

use std::io;

use thiserror::Error;

use crate::{slot::SlotOverflow, types::RouteId, types::StreamId, window::WindowExceeded};

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "spark.transport.tcp.shutdown_failed",
    message: "tcp shutdown",
};
pub(crate) const POLL_WRITABLE: OperationKind = OperationKind {
    code: "spark.transport.tcp.poll_writable_failed",
    message: "tcp poll_writable",
};
pub(crate) const POLL_READABLE: OperationKind = OperationKind {
    code: "spark.transport.tcp.poll_readable_failed",
    message: "tcp poll_readable",
};

/// 流被复位的原因摘要。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `io::Error` 不可复制，不适合随信号跨通道广播；摘要只保留分类与稳定错误码；
/// - 计数器依据摘要判断是否计入 `overflows`，保证统计口径集中在一处。
///
/// ## 契约（What）
/// - `AdmissionDenied` 与 `SlotOverflow` 计入溢出计数；
/// - 其余原因只终止流，不影响 `overflows`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResetCause {
    AdmissionDenied,
    SlotOverflow,
    SocketFault,
    WindowExceeded,
    DataAfterEnd,
    SourceReset,
}

impl ResetCause {
    /// 稳定错误码。
    pub const fn code(self) -> &'static str {
        match self {
            ResetCause::AdmissionDenied => "spark.transport.tcp.admission_denied",
            ResetCause::SlotOverflow => "spark.transport.tcp.slot_overflow",
            ResetCause::SocketFault => "spark.transport.tcp.socket_fault",
            ResetCause::WindowExceeded => "spark.transport.tcp.window_exceeded",
            ResetCause::DataAfterEnd => "spark.transport.tcp.data_after_end",
            ResetCause::SourceReset => "spark.transport.tcp.source_reset",
        }
    }

    /// 是否计入 `overflows` 计数器。
    pub const fn counts_as_overflow(self) -> bool {
        matches!(self, ResetCause::AdmissionDenied | ResetCause::SlotOverflow)
    }
}

/// 单条流的终止性错误。
#[derive(Debug, Error)]
pub enum StreamError {
    /// 需要缓冲时准入表已满。
    #[error("admission denied: {capacity} streams already hold pending writes")]
    AdmissionDenied { capacity: usize },
    /// 追加后缓冲将超过槽容量。
    #[error(transparent)]
    SlotOverflow(#[from] SlotOverflow),
    /// 套接字读写或就绪探测失败。
    #[error("{}: {source}", .op.message)]
    SocketFault {
        op: OperationKind,
        #[source]
        source: io::Error,
    },
    /// 上游发送的数据超过剩余窗口。
    #[error(transparent)]
    WindowExceeded(#[from] WindowExceeded),
    /// 上游在 END 之后继续发送数据。
    #[error("data received after end of stream")]
    DataAfterEnd,
    /// 上游主动复位。
    #[error("stream reset by source")]
    SourceReset,
}

impl StreamError {
    /// 归约为可复制的复位原因。
    pub fn cause(&self) -> ResetCause {
        match self {
            StreamError::AdmissionDenied { .. } => ResetCause::AdmissionDenied,
            StreamError::SlotOverflow(_) => ResetCause::SlotOverflow,
            StreamError::SocketFault { .. } => ResetCause::SocketFault,
            StreamError::WindowExceeded(_) => ResetCause::WindowExceeded,
            StreamError::DataAfterEnd => ResetCause::DataAfterEnd,
            StreamError::SourceReset => ResetCause::SourceReset,
        }
    }

    /// 稳定错误码；套接字故障使用具体操作的错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::SocketFault { op, .. } => op.code,
            other => other.cause().code(),
        }
    }
}

/// 调用方误用引擎时返回的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0} is not established")]
    UnknownRoute(RouteId),
    #[error("{0} is not active")]
    UnknownStream(StreamId),
    #[error("tcp stream reactor has shut down")]
    ReactorClosed,
}

/// 将 IO 错误映射为套接字故障。
pub(crate) fn socket_fault(op: OperationKind, source: io::Error) -> StreamError {
    StreamError::SocketFault { op, source }
}

/// `WouldBlock`/`Interrupted` 只代表“此刻无法推进”，不会终止流。
pub(crate) fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
