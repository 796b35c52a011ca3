//! Awaiting stream requests on a polling worker driven from tokio.
//!
//! No progress thread exists; the [`drive`] task advances the worker while
//! the main task awaits request futures on the same runtime.

use std::sync::Arc;

use bytes::BytesMut;
use tokio_util::sync::CancellationToken;
use ucxio::{
    Context,
    Endpoint,
    ProgressMode,
    Worker,
    WorkerConfig,
    config::Config,
    driver::drive,
    transport::loopback::LoopbackFabric,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let fabric = Arc::new(LoopbackFabric::new());
    let context = Context::new(fabric, Config::new(Default::default()));
    let worker = Worker::new(
        &context,
        WorkerConfig::default().with_progress_mode(ProgressMode::Polling),
    )?;
    let token = CancellationToken::new();
    let driver = tokio::spawn(drive(Arc::clone(&worker), token.clone()));

    let (requests, mut incoming) = tokio::sync::mpsc::unbounded_channel();
    let listener = worker.listen(0, move |request| {
        let _ = requests.send(request);
    })?;
    let client = Endpoint::connect(&worker, "127.0.0.1", listener.port(), true)?;
    let request = incoming.recv().await.ok_or("listener closed")?;
    let server = Endpoint::accept(&listener, request, true)?;

    let recv = server.stream_recv(BytesMut::zeroed(11))?;
    let sent = client.stream_send(BytesMut::from(&b"hello tokio"[..]))?.await?;
    let received = recv.future().await?;
    let buffer = recv.take_buffer().ok_or("receive buffer missing")?;
    println!("sent {sent} bytes, received {received}: {:?}", String::from_utf8_lossy(&buffer));

    token.cancel();
    driver.await?;
    worker.shutdown();
    Ok(())
}
