use crate::types::StreamId;

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// 以下标 + 代数寻址的流表。
///
/// # 设计背景（Why）
/// - 就绪轮询需要按稳定顺序遍历全部流，事件分发需要按标识 O(1) 定位；
/// - 空位复用时代数加一，已终止流的旧标识不会命中新流。
#[derive(Debug)]
pub(crate) struct StreamTable<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> StreamTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// 分配标识并以其构造元素。
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(StreamId) -> T) -> StreamId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[index as usize];
        let id = StreamId::new(index, entry.generation);
        entry.value = Some(make(id));
        self.len += 1;
        id
    }

    pub(crate) fn get(&self, id: StreamId) -> Option<&T> {
        self.entries
            .get(id.index() as usize)
            .filter(|entry| entry.generation == id.generation())
            .and_then(|entry| entry.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut T> {
        self.entries
            .get_mut(id.index() as usize)
            .filter(|entry| entry.generation == id.generation())
            .and_then(|entry| entry.value.as_mut())
    }

    /// 移除元素并使该标识失效。
    pub(crate) fn remove(&mut self, id: StreamId) -> Option<T> {
        let entry = self
            .entries
            .get_mut(id.index() as usize)
            .filter(|entry| entry.generation == id.generation())?;
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index());
        self.len -= 1;
        Some(value)
    }

    /// 按下标访问，供轮询器遍历。
    pub(crate) fn get_by_index_mut(&mut self, index: usize) -> Option<(StreamId, &mut T)> {
        let entry = self.entries.get_mut(index)?;
        let id = StreamId::new(index as u32, entry.generation);
        entry.value.as_mut().map(|value| (id, value))
    }

    /// 下标空间大小（含空位）。
    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
