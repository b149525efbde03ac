use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// 追加将超过槽容量时返回的错误。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error(
    "write slot overflow: {buffered} buffered + {incoming} incoming exceeds capacity {capacity}"
)]
pub struct SlotOverflow {
    pub buffered: usize,
    pub incoming: usize,
    pub capacity: usize,
}

/// 单条流的有界写缓冲（“槽”）。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 套接字只接受部分字节时，剩余数据必须暂存且保持顺序，直到下一次可写；
/// - 容量在配置阶段固定，慢消费者的积压因此有上界，不会无限膨胀。
///
/// ## 逻辑 (How)
/// - 以 `BytesMut` 存储，尾部追加、头部 `split_to` 取出，取出的 `Bytes` 与缓冲共享底层内存；
/// - 追加前先做容量检查，失败时缓冲保持原样，绝不截断。
///
/// ## 契约 (What)
/// - `append`：`len + bytes.len() <= capacity` 时成功，恰好填满也成功；否则返回 [`SlotOverflow`]；
/// - `drain`：取出最多 `max` 字节，不阻塞，空槽返回空 `Bytes`；
/// - `chunk`：只读窥视队首，供非阻塞写尝试使用，随后以 `drain(written)` 确认。
///
/// ## 注意事项 (Trade-offs)
/// - 内存按需增长而非预分配整块容量，空闲流不占用槽内存；
/// - 多次部分 `drain` 后 `BytesMut` 会在下一次 `reserve` 时回收前部空间。
#[derive(Debug)]
pub struct WriteSlot {
    buf: BytesMut,
    capacity: usize,
}

impl WriteSlot {
    /// 创建指定容量的空槽。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            capacity,
        }
    }

    /// 追加字节，超出容量时不做任何修改。
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), SlotOverflow> {
        let buffered = self.buf.len();
        match buffered.checked_add(bytes.len()) {
            Some(total) if total <= self.capacity => {
                self.buf.extend_from_slice(bytes);
                Ok(())
            }
            _ => Err(SlotOverflow {
                buffered,
                incoming: bytes.len(),
                capacity: self.capacity,
            }),
        }
    }

    /// 从队首取出最多 `max` 字节。
    pub fn drain(&mut self, max: usize) -> Bytes {
        let take = max.min(self.buf.len());
        self.buf.split_to(take).freeze()
    }

    /// 队首待写字节。
    pub fn chunk(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 剩余可追加的字节数。
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_that_exactly_fills_capacity_succeeds() {
        let mut slot = WriteSlot::with_capacity(15);
        slot.append(b" 1").expect("fits");
        slot.append(b"client data 2").expect("exactly fills");
        assert_eq!(slot.len(), 15);
        assert_eq!(slot.remaining(), 0);
    }

    #[test]
    fn one_byte_beyond_capacity_overflows_without_truncation() {
        let mut slot = WriteSlot::with_capacity(4);
        slot.append(b"abc").expect("fits");
        let err = slot.append(b"de").expect_err("must overflow");
        assert_eq!(
            err,
            SlotOverflow {
                buffered: 3,
                incoming: 2,
                capacity: 4
            }
        );
        assert_eq!(slot.chunk(), b"abc", "overflow must leave contents untouched");
    }

    #[test]
    fn partial_drains_preserve_order() {
        let mut slot = WriteSlot::with_capacity(32);
        slot.append(b"client ").expect("fits");
        slot.append(b"data 1").expect("fits");

        let mut out = Vec::new();
        for step in [1, 3, 0, 5, 100] {
            out.extend_from_slice(&slot.drain(step));
        }
        assert_eq!(out, b"client data 1");
        assert!(slot.is_empty());
    }

    #[test]
    fn drain_on_empty_slot_returns_nothing() {
        let mut slot = WriteSlot::with_capacity(8);
        assert!(slot.drain(8).is_empty());
    }

    #[test]
    fn drained_space_becomes_available_again() {
        let mut slot = WriteSlot::with_capacity(4);
        slot.append(b"abcd").expect("fills");
        assert_eq!(&slot.drain(2)[..], b"ab");
        slot.append(b"ef").expect("space reclaimed");
        assert_eq!(slot.chunk(), b"cdef");
    }
}
