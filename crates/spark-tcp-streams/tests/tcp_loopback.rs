//! 真实 Tokio 回环连接上的写路径验证。
//!
//! # 教案式说明
//! - **Why**：脚本化套接字无法覆盖内核发送缓冲、FIN 与 RST 的真实语义；
//! - **How**：在 `127.0.0.1:0` 上建立连接，本端交给反应器，对端由测试直接读写；
//! - **What**：对端按序读到全部字节并看到 EOF；复位时按配置观察到 EOF 或 RST。

use std::{io, time::Duration};

use anyhow::{Context as _, Result, bail};
use bytes::Bytes;
use spark_tcp_streams::{
    ReactorHandle, RouteId, StreamId, StreamRole, StreamSignal, TcpStreamReactor,
    TcpStreamsConfig, TokioSocket,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc::UnboundedReceiver,
};

const ROUTE: RouteId = RouteId::new(1);
const WAIT: Duration = Duration::from_secs(10);

async fn connected_pair() -> Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    Ok((client?, accepted?.0))
}

async fn next_signal(signals: &mut UnboundedReceiver<StreamSignal>) -> Result<StreamSignal> {
    tokio::time::timeout(WAIT, signals.recv())
        .await
        .context("timed out waiting for a stream signal")?
        .context("reactor dropped the signal channel")
}

async fn start(
    config: TcpStreamsConfig,
) -> Result<(
    ReactorHandle,
    UnboundedReceiver<StreamSignal>,
    tokio::task::JoinHandle<()>,
)> {
    let (reactor, handle, signals) = TcpStreamReactor::<TokioSocket>::new(config)?;
    let task = tokio::spawn(reactor.run());
    handle.establish_route(ROUTE)?;
    Ok((handle, signals, task))
}

async fn open(
    handle: &ReactorHandle,
    signals: &mut UnboundedReceiver<StreamSignal>,
    local: TcpStream,
) -> Result<(StreamId, u32)> {
    let stream = handle
        .open_stream(ROUTE, TokioSocket::new(local), StreamRole::Acceptor)
        .await?;
    match next_signal(signals).await? {
        StreamSignal::Window { stream: s, credit } if s == stream => Ok((stream, credit)),
        other => bail!("expected initial window, got {other:?}"),
    }
}

/// 在窗口约束下发送 1 MiB，对端按序读到全部字节后看到 EOF。
///
/// 槽容量取默认值（等于窗口）；额度只在槽余量允许时归还，上游因此永远不会使槽溢出。
#[tokio::test(flavor = "multi_thread")]
async fn bulk_data_arrives_in_order_and_end_becomes_eof() -> Result<()> {
    let config = TcpStreamsConfig::new().with_window_size(16 * 1024);
    let (reactor, handle, mut signals) = TcpStreamReactor::<TokioSocket>::new(config)?;
    let counters = reactor.engine().counters();
    let task = tokio::spawn(reactor.run());
    handle.establish_route(ROUTE)?;
    let (local, mut remote) = connected_pair().await?;
    let (stream, mut credit) = open(&handle, &mut signals, local).await?;

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.map(|_| received)
    });

    for chunk in payload.chunks(4096) {
        while credit < chunk.len() as u32 {
            match next_signal(&mut signals).await? {
                StreamSignal::Window { credit: more, .. } => credit += more,
                other => bail!("unexpected signal while sending: {other:?}"),
            }
        }
        credit -= chunk.len() as u32;
        handle.data(stream, Bytes::copy_from_slice(chunk))?;
    }
    handle.end(stream)?;

    let received = tokio::time::timeout(WAIT, reader).await???;
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "peer bytes must equal submitted bytes");
    assert_eq!(counters.overflows(), 0);

    handle.shutdown()?;
    task.await?;
    Ok(())
}

/// 默认复位以 FIN 结束连接，对端读到 EOF。
#[tokio::test]
async fn reset_closes_with_eof_by_default() -> Result<()> {
    let (handle, mut signals, task) = start(TcpStreamsConfig::new()).await?;
    let (local, mut remote) = connected_pair().await?;
    let (stream, _) = open(&handle, &mut signals, local).await?;

    handle.data(stream, &b"partial"[..])?;
    handle.reset(stream)?;

    let mut received = Vec::new();
    tokio::time::timeout(WAIT, remote.read_to_end(&mut received)).await??;
    assert!(b"partial".starts_with(&received));

    handle.shutdown()?;
    task.await?;
    Ok(())
}

/// 开启 `abortive_reset` 后对端观察到连接被重置。
#[tokio::test]
async fn abortive_reset_surfaces_as_connection_reset() -> Result<()> {
    let config = TcpStreamsConfig::new().with_abortive_reset(true);
    let (handle, mut signals, task) = start(config).await?;
    let (local, mut remote) = connected_pair().await?;
    let (stream, _) = open(&handle, &mut signals, local).await?;

    handle.reset(stream)?;

    let mut buf = [0u8; 16];
    let result = tokio::time::timeout(WAIT, remote.read(&mut buf)).await?;
    match result {
        Err(error) => assert_eq!(error.kind(), io::ErrorKind::ConnectionReset),
        Ok(n) => bail!("expected RST, read {n} bytes"),
    }

    handle.shutdown()?;
    task.await?;
    Ok(())
}

/// 回复方向：授予额度后，对端写入的数据以 `Data` 信号送达上游，关闭写半部后收到 `End`。
#[tokio::test]
async fn reply_bytes_are_forwarded_under_credit() -> Result<()> {
    let (handle, mut signals, task) = start(TcpStreamsConfig::new()).await?;
    let (local, mut remote) = connected_pair().await?;
    let (stream, _) = open(&handle, &mut signals, local).await?;

    remote.write_all(b"pong").await?;
    remote.shutdown().await?;
    handle.grant_reply_window(stream, 1024)?;

    let mut reply = Vec::new();
    loop {
        match next_signal(&mut signals).await? {
            StreamSignal::Data { stream: s, payload } if s == stream => {
                reply.extend_from_slice(&payload)
            }
            StreamSignal::End { stream: s } if s == stream => break,
            other => bail!("unexpected signal: {other:?}"),
        }
    }
    assert_eq!(reply, b"pong");

    handle.shutdown()?;
    task.await?;
    Ok(())
}
