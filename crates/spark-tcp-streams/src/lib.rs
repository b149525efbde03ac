#![doc = r#"
# spark-tcp-streams

## 设计动机（Why）
- **定位**：该 crate 是 Spark TCP 传输绑定的写路径：在非阻塞套接字只接受部分字节时，
  负责暂存剩余数据、限制同时积压的流数量，并在超限时复位流。
- **架构角色**：上游（source）以 DATA/END/RESET 驱动逻辑流，引擎把字节写入 Tokio
  `TcpStream`，并以 [`StreamSignal`] 回送窗口额度、回复数据与复位原因。
- **设计理念**：单一所有者 + 就绪驱动。流表、写槽与准入表只被一个任务访问，
  因此没有任何每流锁；唯一跨线程共享的是 [`TcpCounters`] 中的原子计数器。

## 核心契约（What）
- **顺序**：对端收到的字节始终是提交字节的前缀，不乱序、不重复；
- **内存上界**：持槽流数 ≤ `max_pending_write_streams`，每个槽 ≤ `slot_capacity`；
  第一次溢出的追加使 `overflows` 恰好加一并复位该流；
- **终止**：`Closed` 与 `Reset` 之后不再有任何写入、缓冲或窗口归还，流在同一调用内被移除。

## 实现策略（How）
- [`WriteSlot`]：以 `BytesMut` 实现的定容写缓冲；
- [`AdmissionController`]：定长持有者表 + 空闲下标栈，O(1) 获取与释放；
- [`StreamWindow`]：读侧窗口额度，数据被写出或被槽接纳即归还，归还量以槽余量为上限；
- [`TcpStreamEngine`]：状态机与就绪轮询的所有者；
- [`TcpStreamReactor`]：在单个 Tokio 任务中以 `select!` 驱动引擎，[`ReactorHandle`] 负责提交命令。

## 风险与考量（Trade-offs）
- **无超时**：慢消费者只受槽容量与准入上限约束，不做基于时间的存活检测；
- **复位语义**：默认以 FIN 关闭被复位的连接，需要 RST 时开启 `abortive_reset`；
- **测试设施**：`test-util` 特性提供脚本化套接字，仅供测试与基准使用。
"#]

mod admission;
mod config;
mod counters;
mod engine;
mod error;
mod poller;
mod reactor;
mod slot;
mod socket;
mod stream;
mod table;
mod types;
mod window;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use admission::{AdmissionController, AdmissionToken};
pub use config::{ConfigError, MAX_PENDING_WRITE_STREAMS_LIMIT, TcpStreamsConfig};
pub use counters::{CountersSnapshot, TcpCounters};
pub use engine::TcpStreamEngine;
pub use error::{EngineError, OperationKind, ResetCause, StreamError};
pub use reactor::{ReactorHandle, ReactorParts, TcpStreamReactor};
pub use slot::{SlotOverflow, WriteSlot};
pub use socket::{StreamSocket, TokioSocket};
pub use stream::StreamState;
pub use types::{RouteId, StreamId, StreamRole, StreamSignal};
pub use window::{StreamWindow, WindowExceeded};
