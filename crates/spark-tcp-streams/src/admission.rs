use crate::types::StreamId;

/// 持有写槽的许可凭证，记录其在准入表中的位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionToken {
    index: u32,
}

/// 限制同时持有写槽的流数量的准入控制器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同一 I/O 线程上的全部积压内存 = 持槽流数 × 槽容量；限制持槽流数即限制总内存；
/// - 竞争超出容量时直接拒绝（由调用方复位该流），用完整性换取有界的延迟与内存。
///
/// ## 逻辑（How）
/// - `holders` 为持有者表，下标即凭证；`free` 为已释放下标栈；
/// - 获取优先弹出空闲下标，栈空且未达容量时在表尾追加新下标；释放把下标压回栈，均为摊还 O(1)；
/// - 表按实际并发持有数增长，从不超过 `capacity`，容量本身不会触发预分配。
///
/// ## 契约（What）
/// - `try_acquire`：当前持有数小于容量时授予凭证，否则返回 `None`；
/// - `release`：凭证必须由同一条流归还，否则视为过期凭证并返回 `false`；
/// - 不排队、不保证公平，释放后的第一个请求即可获取。
#[derive(Debug)]
pub struct AdmissionController {
    holders: Vec<Option<StreamId>>,
    free: Vec<u32>,
    capacity: u32,
}

impl AdmissionController {
    /// 创建容量为 `capacity` 的准入表；表项在首次需要时才分配。
    pub fn new(capacity: usize) -> Self {
        Self {
            holders: Vec::new(),
            free: Vec::new(),
            capacity: u32::try_from(capacity).unwrap_or(u32::MAX),
        }
    }

    /// 尝试为 `stream` 获取写槽许可。
    pub fn try_acquire(&mut self, stream: StreamId) -> Option<AdmissionToken> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.holders.len() < self.capacity as usize => {
                self.holders.push(None);
                (self.holders.len() - 1) as u32
            }
            None => return None,
        };
        let entry = &mut self.holders[index as usize];
        debug_assert!(entry.is_none(), "free index must not have a holder");
        *entry = Some(stream);
        Some(AdmissionToken { index })
    }

    /// 归还许可；凭证与持有者不匹配时不做修改。
    pub fn release(&mut self, token: AdmissionToken, stream: StreamId) -> bool {
        match self.holders.get_mut(token.index as usize) {
            Some(entry) if *entry == Some(stream) => {
                *entry = None;
                self.free.push(token.index);
                true
            }
            _ => false,
        }
    }

    /// `token` 当前是否由 `stream` 持有。
    pub fn holds(&self, token: AdmissionToken, stream: StreamId) -> bool {
        self.holders
            .get(token.index as usize)
            .is_some_and(|entry| *entry == Some(stream))
    }

    /// 当前持槽的流。
    pub fn holders(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.holders.iter().filter_map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.holders.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(index: u32) -> StreamId {
        StreamId::new(index, 0)
    }

    #[test]
    fn grants_up_to_capacity_then_denies() {
        let mut admission = AdmissionController::new(2);
        assert!(admission.try_acquire(stream(1)).is_some());
        assert!(admission.try_acquire(stream(2)).is_some());
        assert!(admission.is_full());
        assert!(admission.try_acquire(stream(3)).is_none());
        assert_eq!(admission.len(), 2);
    }

    #[test]
    fn release_makes_room_for_next_contender() {
        let mut admission = AdmissionController::new(1);
        let first = admission.try_acquire(stream(1)).expect("granted");
        assert!(admission.try_acquire(stream(2)).is_none());

        assert!(admission.release(first, stream(1)));
        let second = admission.try_acquire(stream(2)).expect("granted after release");
        assert!(admission.holds(second, stream(2)));
        assert_eq!(admission.holders().collect::<Vec<_>>(), vec![stream(2)]);
    }

    #[test]
    fn stale_release_is_ignored() {
        let mut admission = AdmissionController::new(1);
        let token = admission.try_acquire(stream(1)).expect("granted");
        assert!(!admission.release(token, stream(9)));
        assert!(admission.release(token, stream(1)));
        assert!(!admission.release(token, stream(1)), "double release");
        assert!(admission.is_empty());
    }

    #[test]
    fn table_grows_with_holders_not_capacity() {
        let mut admission = AdmissionController::new(u32::MAX as usize);
        assert_eq!(admission.capacity(), u32::MAX as usize);
        let first = admission.try_acquire(stream(1)).expect("granted");
        admission.try_acquire(stream(2)).expect("granted");
        assert_eq!(admission.holders.len(), 2);

        assert!(admission.release(first, stream(1)));
        let reused = admission.try_acquire(stream(3)).expect("granted");
        assert_eq!(reused, first, "released index is reused before growing");
        assert_eq!(admission.holders.len(), 2);
        assert!(!admission.is_full());
    }

    #[test]
    fn zero_capacity_denies_everything() {
        let mut admission = AdmissionController::new(0);
        assert!(admission.try_acquire(stream(1)).is_none());
        assert_eq!(admission.capacity(), 0);
    }
}
