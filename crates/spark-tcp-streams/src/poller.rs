//! 就绪轮询：只探测有兴趣的流，把就绪结果收集为事件批次。

use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    error::{OperationKind, POLL_READABLE, POLL_WRITABLE},
    socket::StreamSocket,
    stream::TcpStream,
    table::StreamTable,
    types::StreamId,
};

#[derive(Debug)]
pub(crate) enum ReadyKind {
    Writable,
    Readable,
    Failed(OperationKind, io::Error),
}

#[derive(Debug)]
pub(crate) struct ReadyEvent {
    pub stream: StreamId,
    pub kind: ReadyKind,
}

impl ReadyEvent {
    fn new(stream: StreamId, kind: ReadyKind) -> Self {
        Self { stream, kind }
    }
}

/// 单线程就绪轮询器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 就绪来源是 Tokio IO 驱动；轮询器只负责“问哪些流”和“以什么顺序分发”；
/// - 未就绪的流在 `poll_*` 中登记当前任务的 `Waker`，就绪时整个引擎任务被唤醒。
///
/// ## 逻辑 (How)
/// - 每轮从游标位置开始遍历流表，游标逐轮前移，避免低下标的流总是先被服务；
/// - `PendingWrite` 的流探测可写，持有回复额度且读半部未关闭的流探测可读；
/// - 探测失败记为 `Failed`，由引擎转换成套接字故障。
///
/// ## 契约 (What)
/// - `collect` 不执行任何读写，只产出事件；返回空批次意味着所有有兴趣的流都已登记唤醒。
#[derive(Debug, Default)]
pub(crate) struct ReadinessPoller {
    cursor: usize,
}

impl ReadinessPoller {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 轮询一遍流表，返回本轮就绪事件。
    pub(crate) fn collect<S: StreamSocket>(
        &mut self,
        streams: &mut StreamTable<TcpStream<S>>,
        cx: &mut Context<'_>,
    ) -> Vec<ReadyEvent> {
        let total = streams.capacity();
        if total == 0 {
            return Vec::new();
        }
        let start = self.cursor % total;
        let mut events = Vec::new();
        for offset in 0..total {
            let Some((id, stream)) = streams.get_by_index_mut((start + offset) % total) else {
                continue;
            };
            let interest = stream.interest();
            if interest.writable {
                match stream.socket_mut().poll_writable(cx) {
                    Poll::Ready(Ok(())) => events.push(ReadyEvent::new(id, ReadyKind::Writable)),
                    Poll::Ready(Err(error)) => {
                        events.push(ReadyEvent::new(id, ReadyKind::Failed(POLL_WRITABLE, error)));
                        continue;
                    }
                    Poll::Pending => {}
                }
            }
            if interest.readable {
                match stream.socket_mut().poll_readable(cx) {
                    Poll::Ready(Ok(())) => events.push(ReadyEvent::new(id, ReadyKind::Readable)),
                    Poll::Ready(Err(error)) => {
                        events.push(ReadyEvent::new(id, ReadyKind::Failed(POLL_READABLE, error)))
                    }
                    Poll::Pending => {}
                }
            }
        }
        self.cursor = start + 1;
        events
    }
}
