use thiserror::Error;

/// 上游发送的数据超过剩余窗口时返回的错误。
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("{len} bytes exceed remaining window credit {credit}")]
pub struct WindowExceeded {
    pub len: usize,
    pub credit: u32,
}

/// 单条流的读侧窗口（上游可继续发送的字节额度）。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 上游每发送一段 DATA 即消耗额度，引擎在数据“写入套接字或被槽接纳”后归还，
///   而不是等到最终刷出，避免刷出延迟拖住整个上游；
/// - 归还量由调用方按槽余量封顶：窗口只负责记账，“能还多少”由持有写槽的流决定。
///
/// ## 契约 (What)
/// - `consume`：额度不足时返回 [`WindowExceeded`] 且不修改状态；
/// - `replenish`：最多归还已消耗未归还的量，因此额度永不为负、永不超过窗口大小。
#[derive(Clone, Debug)]
pub struct StreamWindow {
    size: u32,
    credit: u32,
    unreplenished: u32,
}

impl StreamWindow {
    /// 以完整窗口初始化。
    pub fn new(size: u32) -> Self {
        Self {
            size,
            credit: size,
            unreplenished: 0,
        }
    }

    /// 消耗 `len` 字节额度。
    pub fn consume(&mut self, len: usize) -> Result<(), WindowExceeded> {
        match u32::try_from(len) {
            Ok(amount) if amount <= self.credit => {
                self.credit -= amount;
                self.unreplenished += amount;
                Ok(())
            }
            _ => Err(WindowExceeded {
                len,
                credit: self.credit,
            }),
        }
    }

    /// 最多归还 `len` 字节额度，返回实际归还量；未归还的部分留待下次。
    pub fn replenish(&mut self, len: usize) -> u32 {
        let amount = u32::try_from(len)
            .unwrap_or(u32::MAX)
            .min(self.unreplenished);
        self.unreplenished -= amount;
        self.credit += amount;
        amount
    }

    /// 当前剩余额度。
    pub fn credit(&self) -> u32 {
        self.credit
    }

    /// 已消耗但尚未归还的额度。
    pub fn unreplenished(&self) -> u32 {
        self.unreplenished
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}
