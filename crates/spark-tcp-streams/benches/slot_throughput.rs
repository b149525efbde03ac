use criterion::{Criterion, black_box};
use spark_tcp_streams::{
    RouteId, StreamRole, TcpStreamEngine, TcpStreamsConfig, WriteSlot,
    testing::{BLOCKED, ScriptedSocket, scripted_pair},
};
use std::{
    env,
    task::{Context, Waker},
    time::Duration,
};

/// 写槽追加与分段取出的成本。
///
/// # 设计背景（Why）
/// - 慢消费者场景下，每段 DATA 都会经过一次追加与若干次部分取出，槽的开销直接决定写路径吞吐。
///
/// # 逻辑解析（How）
/// - 每轮把 16 段 1 KiB 数据追加到 16 KiB 槽中，再以 3 KiB 为步长取空。
fn bench_slot_append_drain(c: &mut Criterion) {
    let fragment = [7u8; 1024];
    c.bench_function("slot_append_drain_16k", |b| {
        let mut slot = WriteSlot::with_capacity(16 * 1024);
        b.iter(|| {
            for _ in 0..16 {
                slot.append(black_box(&fragment)).expect("fits in slot");
            }
            while !slot.is_empty() {
                black_box(slot.drain(3 * 1024));
            }
        });
    });
}

/// 经过完整状态机的“分片写 → 积压 → 可写刷出”循环。
///
/// 脚本化套接字每轮只接受 512 字节，其余进入写槽，随后解除阻塞并由就绪轮询刷出。
fn bench_backlog_cycle(c: &mut Criterion) {
    let config = TcpStreamsConfig::new()
        .with_window_size(8 * 1024)
        .with_max_pending_write_streams(1);
    let mut engine = TcpStreamEngine::<ScriptedSocket>::new(config).expect("valid config");
    let route = RouteId::new(1);
    engine.establish_route(route);
    let (socket, peer) = scripted_pair();
    let stream = engine
        .open_stream(route, socket, StreamRole::Initiator)
        .expect("route established");
    let payload = vec![1u8; 4 * 1024];
    let mut cx = Context::from_waker(Waker::noop());

    c.bench_function("backlog_cycle_4k", |b| {
        b.iter(|| {
            peer.script_writes([512], BLOCKED);
            engine.on_data(stream, &payload).expect("stream stays open");
            peer.unblock_writes();
            black_box(engine.poll_readiness(&mut cx));
            engine.drain_signals().for_each(drop);
            black_box(peer.take_received());
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_slot_append_drain(&mut criterion);
    bench_backlog_cycle(&mut criterion);
    criterion.final_summary();
}
