//! Ping/pong between two threaded workers over the loopback fabric.
//!
//! The server echoes every tagged ping back to the client with the counter
//! incremented, until the client has seen `ROUNDS` pongs.

use std::{
    sync::{Arc, mpsc},
    time::Duration,
};

use bytes::BytesMut;
use ucxio::{
    Context,
    Endpoint,
    ProgressMode,
    Worker,
    WorkerConfig,
    config::Config,
    transport::{FULL_TAG_MASK, loopback::LoopbackFabric},
};

const PING: u64 = 1;
const PONG: u64 = 2;
const ROUNDS: u32 = 5;
const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn counter(buffer: &[u8]) -> u32 {
    let mut bytes = [0_u8; 4];
    bytes.copy_from_slice(&buffer[..4]);
    u32::from_be_bytes(bytes)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let fabric = Arc::new(LoopbackFabric::new());
    let context = Context::new(fabric, Config::new(Default::default()));
    let config = WorkerConfig::default().with_progress_mode(ProgressMode::Thread);
    let server_worker = Worker::new(&context, config.clone().with_thread_name("server"))?;
    let client_worker = Worker::new(&context, config.with_thread_name("client"))?;

    let (requests, incoming) = mpsc::channel();
    let listener = server_worker.listen(0, move |request| {
        let _ = requests.send(request);
    })?;
    let client = Endpoint::connect(&client_worker, "127.0.0.1", listener.port(), true)?;
    let server = Endpoint::accept(&listener, incoming.recv_timeout(Duration::from_secs(5))?, true)?;

    let mut value = 0_u32;
    for _ in 0..ROUNDS {
        let ping = server.tag_recv(BytesMut::zeroed(4), PING, FULL_TAG_MASK)?;
        client
            .tag_send(BytesMut::from(&value.to_be_bytes()[..]), PING)?
            .wait(WAIT)?;
        ping.wait(WAIT)?;
        let seen = counter(&ping.take_buffer().ok_or("ping buffer missing")?);

        let pong = client.tag_recv(BytesMut::zeroed(4), PONG, FULL_TAG_MASK)?;
        server
            .tag_send(BytesMut::from(&(seen + 1).to_be_bytes()[..]), PONG)?
            .wait(WAIT)?;
        pong.wait(WAIT)?;
        value = counter(&pong.take_buffer().ok_or("pong buffer missing")?);
        println!("ping {seen} -> pong {value}");
    }

    client.close()?;
    server.close()?;
    client_worker.shutdown();
    server_worker.shutdown();
    Ok(())
}
