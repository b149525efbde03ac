use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_WINDOW_SIZE: u32 = 65_536;
const DEFAULT_MAX_PENDING_WRITE_STREAMS: usize = 1_024;
const DEFAULT_READ_CHUNK_SIZE: u32 = 8_192;
/// 持槽流数上限的上界；更大的值几乎总是笔误。
pub const MAX_PENDING_WRITE_STREAMS_LIMIT: usize = 1 << 20;

/// TCP 流引擎的显式配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 窗口、准入上限与槽容量都在构造引擎时一次性传入，不依赖任何进程级全局属性，
///   同一进程内的多个引擎可以使用不同配置；
/// - 与 `TcpSocketConfig` 相同，采用 `with_*` 链式设置，另外支持从 TOML 反序列化。
///
/// ## 契约（What）
/// - `window_size`：每条流初始写窗口（字节）；
/// - `max_pending_write_streams`：同时持有写槽的流数量上限；
/// - `slot_capacity`：单条流可缓冲的最大未刷出字节数，缺省等于 `window_size`；
/// - `read_chunk_size`：回复方向单次读取的最大字节数；
/// - `abortive_reset`：复位时是否以 `SO_LINGER=0` 发送 RST（缺省发送 FIN）；
/// - **后置条件**：[`validate`](Self::validate) 通过的配置中所有数值均大于零。
///
/// ## 注意事项（Trade-offs）
/// - 窗口与槽容量相互独立：窗口在数据被槽接纳时即归还，槽容量检查才是积压内存的硬上界。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpStreamsConfig {
    window_size: u32,
    max_pending_write_streams: usize,
    slot_capacity: Option<u32>,
    read_chunk_size: u32,
    abortive_reset: bool,
}

/// 配置校验或解析失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },
    #[error("`{field}` = {value} exceeds the limit of {limit}")]
    TooLarge {
        field: &'static str,
        value: usize,
        limit: usize,
    },
    #[error("invalid tcp streams configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Default for TcpStreamsConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_pending_write_streams: DEFAULT_MAX_PENDING_WRITE_STREAMS,
            slot_capacity: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            abortive_reset: false,
        }
    }
}

impl TcpStreamsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_max_pending_write_streams(mut self, max: usize) -> Self {
        self.max_pending_write_streams = max;
        self
    }

    pub fn with_slot_capacity(mut self, capacity: u32) -> Self {
        self.slot_capacity = Some(capacity);
        self
    }

    pub fn with_read_chunk_size(mut self, size: u32) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_abortive_reset(mut self, enabled: bool) -> Self {
        self.abortive_reset = enabled;
        self
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn max_pending_write_streams(&self) -> usize {
        self.max_pending_write_streams
    }

    /// 生效的槽容量：未显式配置时等于窗口大小。
    pub fn slot_capacity(&self) -> u32 {
        self.slot_capacity.unwrap_or(self.window_size)
    }

    pub fn read_chunk_size(&self) -> u32 {
        self.read_chunk_size
    }

    pub fn abortive_reset(&self) -> bool {
        self.abortive_reset
    }

    /// 拒绝任何为零的数值项，以及超过 [`MAX_PENDING_WRITE_STREAMS_LIMIT`] 的持槽流数上限。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("window_size", self.window_size as usize),
            ("max_pending_write_streams", self.max_pending_write_streams),
            ("slot_capacity", self.slot_capacity() as usize),
            ("read_chunk_size", self.read_chunk_size as usize),
        ];
        if let Some((field, _)) = checks.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.max_pending_write_streams > MAX_PENDING_WRITE_STREAMS_LIMIT {
            return Err(ConfigError::TooLarge {
                field: "max_pending_write_streams",
                value: self.max_pending_write_streams,
                limit: MAX_PENDING_WRITE_STREAMS_LIMIT,
            });
        }
        Ok(())
    }
}
