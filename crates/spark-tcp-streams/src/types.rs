//! 引擎对外共享的标识与信号类型。
//!
//! # 设计总览（Why）
//! - 路由、流标识与上行信号在引擎、反应器与测试之间反复出现，集中定义以免语义漂移；
//! - 全部类型均为 `Copy` 或廉价克隆（`Bytes`），可以跨越 Tokio 通道而无需额外分配。

use bytes::Bytes;
use std::fmt;

use crate::error::ResetCause;

/// 控制面建立的路由标识。
///
/// 路由的创建逻辑不属于本 crate；引擎只记录“该路由已建立”，并以此作为打开流的前置条件。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(u64);

impl RouteId {
    /// 包装控制面分配的原始路由号。
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 读取原始路由号。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

/// 引擎分配的逻辑流标识。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 流表以槽位数组存储，`index` 让查找与准入表定位都是 O(1)；
/// - 槽位会被复用，`generation` 保证已终止流的旧标识不会误命中新流。
///
/// ## 契约（What）
/// - 标识只由 [`TcpStreamEngine::open_stream`](crate::TcpStreamEngine::open_stream) 生成；
/// - 同一 `index` 上的 `generation` 单调递增，旧标识在流终止后永久失效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    index: u32,
    generation: u32,
}

impl StreamId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// 槽位下标。
    pub const fn index(self) -> u32 {
        self.index
    }

    /// 槽位代数。
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}.{}", self.index, self.generation)
    }
}

/// 流在连接建立中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// 本端主动发起连接。
    Initiator,
    /// 本端接受入站连接。
    Acceptor,
}

/// 引擎发往上游（source）的信号。
///
/// # 契约（What）
/// - `Window`：补充的写窗口额度（增量，单位字节）；打开流时会先发出一次完整窗口；
/// - `Data`/`End`：回复方向从套接字读到的数据与 EOF；
/// - `Reset`：引擎主动复位流，携带原因；由上游自己发起的复位不会回送。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    Window { stream: StreamId, credit: u32 },
    Data { stream: StreamId, payload: Bytes },
    End { stream: StreamId },
    Reset { stream: StreamId, cause: ResetCause },
}

impl StreamSignal {
    /// 信号所属的流。
    pub fn stream(&self) -> StreamId {
        match self {
            StreamSignal::Window { stream, .. }
            | StreamSignal::Data { stream, .. }
            | StreamSignal::End { stream }
            | StreamSignal::Reset { stream, .. } => *stream,
        }
    }
}
