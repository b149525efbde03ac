#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicU64, Ordering};

/// 进程内的 TCP 流计数器。
///
/// # 设计背景（Why）
/// - 计数器是引擎中唯一跨线程可见的状态，观测方（测试、指标导出）可以在引擎运行时随时读取；
/// - 其余状态（流表、槽、准入表）都由单一所有者修改，因此这里只需原子自增，无需任何锁。
///
/// # 契约说明（What）
/// - `streams`：累计打开的流；`routes`：累计建立的路由；
///   `overflows`：因槽溢出或准入被拒而复位的流；
/// - 三者单调不减，读取使用 `Acquire`，写入使用 `AcqRel` 语义的 `fetch_add`。
///
/// # 风险提示（Trade-offs）
/// - 三个计数器各自独立，`snapshot` 不是原子快照，并发读取时各字段可能来自不同时刻。
#[derive(Debug)]
pub struct TcpCounters {
    streams: AtomicU64,
    routes: AtomicU64,
    overflows: AtomicU64,
}

/// 计数器的只读快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub streams: u64,
    pub routes: u64,
    pub overflows: u64,
}

impl TcpCounters {
    pub fn new() -> Self {
        Self {
            streams: AtomicU64::new(0),
            routes: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
        }
    }

    pub fn streams(&self) -> u64 {
        self.streams.load(Ordering::Acquire)
    }

    pub fn routes(&self) -> u64 {
        self.routes.load(Ordering::Acquire)
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Acquire)
    }

    /// 逐字段读取，生成快照。
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            streams: self.streams(),
            routes: self.routes(),
            overflows: self.overflows(),
        }
    }

    pub(crate) fn record_stream(&self) {
        self.streams.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_route(&self) {
        self.routes.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for TcpCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn increments_from_many_threads_are_not_lost() {
        let counters = Arc::new(TcpCounters::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        counters.record_overflow();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker must not panic");
        }
        assert_eq!(counters.overflows(), 4_000);
    }

    #[test]
    fn snapshot_reflects_each_counter() {
        let counters = TcpCounters::new();
        counters.record_route();
        counters.record_stream();
        counters.record_stream();
        assert_eq!(
            counters.snapshot(),
            CountersSnapshot {
                streams: 2,
                routes: 1,
                overflows: 0
            }
        );
    }
}

#[cfg(all(test, any(loom, spark_loom)))]
mod loom_model {
    use super::*;
    use loom::{sync::Arc, thread};

    #[test]
    fn concurrent_records_are_all_observed() {
        //
        // 教案级说明：两个线程分别记录溢出与流，主线程在 join 后读取。
        // - **Why**：计数器是引擎唯一跨线程共享的状态，自增不可丢失；
        // - **What**：任意调度交错下，join 之后快照都等于各线程记录次数之和。
        loom::model(|| {
            let counters = Arc::new(TcpCounters::new());
            let a = {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    counters.record_overflow();
                    counters.record_stream();
                })
            };
            let b = {
                let counters = Arc::clone(&counters);
                thread::spawn(move || counters.record_overflow())
            };
            a.join().expect("thread a must not panic");
            b.join().expect("thread b must not panic");
            assert_eq!(
                counters.snapshot(),
                CountersSnapshot {
                    streams: 1,
                    routes: 0,
                    overflows: 2
                }
            );
        });
    }
}
