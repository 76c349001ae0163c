use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use framelane::{ByteBuf, DrrConfig, Event, HeaderScheme, Priority};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::oneshot,
};

const N: usize = 50;
const TIMEOUT: Duration = Duration::from_secs(30);

// Echoes every frame of the first connection back to it
async fn pong(handshake: bool, scheme: HeaderScheme, addr_tx: oneshot::Sender<SocketAddr>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    addr_tx.send(listener.local_addr().unwrap()).unwrap();

    let (stream, _addr) = listener.accept().await.unwrap();
    let (stream_reader, stream_writer) = stream.into_split();

    let (sender, _sender_task) = framelane::sender(stream_writer)
        .encoder(framelane::EncoderConfig::default().with_scheme(scheme))
        .build();
    let (tx, mut inbox) = framelane::inbox(64);
    let _receiver_task = framelane::receiver(stream_reader, tx)
        .handshake(handshake)
        .decoder(framelane::DecoderConfig::default().with_scheme(scheme))
        .build();

    loop {
        match inbox.recv().await.unwrap() {
            Event::Handshake { handshake, .. } => {
                // Answer with the value of the echo header
                let value = handshake.headers().get("x-echo").unwrap_or_default();
                sender.send(ByteBuf::from(value.as_bytes())).await.unwrap();
            }
            Event::Frame { payload, .. } => sender.send(ByteBuf::from(payload)).await.unwrap(),
            Event::Closed { .. } => break,
        }
    }
}

async fn ping(handshake: Option<&[u8]>, scheme: HeaderScheme) {
    let (addr_tx, addr_rx) = oneshot::channel();
    let server = tokio::task::spawn(pong(handshake.is_some(), scheme, addr_tx));
    let addr = addr_rx.await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (stream_reader, mut stream_writer) = stream.into_split();
    if let Some(text) = handshake {
        stream_writer.write_all(text).await.unwrap();
    }

    let (control, bulk) = (Priority::new(0), Priority::new(1));
    let (sender, sender_task) = framelane::sender(stream_writer)
        .encoder(framelane::EncoderConfig::default().with_scheme(scheme))
        .drr(DrrConfig::default().with_class(control, 2.0).with_class(bulk, 1.0))
        .build();
    let (tx, mut inbox) = framelane::inbox(64);
    let receiver_task = framelane::receiver(stream_reader, tx)
        .decoder(framelane::DecoderConfig::default().with_scheme(scheme))
        .build();

    if handshake.is_some() {
        match inbox.recv_timeout(TIMEOUT).await.unwrap() {
            Event::Frame { payload, .. } => assert_eq!(payload, b"hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    for size in [0, 8, 32_767, 32_768, 1_000_000] {
        for i in 0..N {
            let payload: Vec<u8> = (0..size).map(|b| (b + i) as u8).collect();
            let priority = if i % 2 == 0 { control } else { bulk };
            sender
                .send(ByteBuf::from(payload.clone()).with_priority(priority))
                .await
                .unwrap();

            match inbox.recv_timeout(TIMEOUT).await.unwrap() {
                Event::Frame { id, payload: echo } => {
                    assert_eq!(id, receiver_task.id());
                    assert_eq!(echo, payload);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    // Closing the write half ends the server loop, which closes its side
    sender.stop();
    let exit = sender_task.stop().await.unwrap();
    assert!(exit.error.is_none());
    drop(exit.io);

    match inbox.recv_timeout(TIMEOUT).await.unwrap() {
        Event::Closed { error, .. } => assert!(error.is_none(), "{error:?}"),
        other => panic!("unexpected {other:?}"),
    }
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn base() {
    ping(None, HeaderScheme::Varint).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn base_short_long() {
    ping(None, HeaderScheme::ShortLong).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn base_handshake() {
    ping(
        Some(&b"HELLO /echo FL/1\r\nX-Echo: hello\r\nX-Other: 1\r\n\r\n"[..]),
        HeaderScheme::Varint,
    )
    .await;
}

// Small request/response exchanges on sockets left with Nagle enabled
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn base_small_frames_latency() {
    const ROUNDS: usize = 200;

    let (addr_tx, addr_rx) = oneshot::channel();
    let server = tokio::task::spawn(pong(false, HeaderScheme::Varint, addr_tx));
    let addr = addr_rx.await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    assert!(!stream.nodelay().unwrap());
    let (stream_reader, stream_writer) = stream.into_split();
    let (sender, sender_task) = framelane::sender(stream_writer).build();
    let (tx, mut inbox) = framelane::inbox(64);
    let _receiver_task = framelane::receiver(stream_reader, tx).build();

    let now = Instant::now();
    for i in 0..ROUNDS {
        let payload = (i as u32).to_be_bytes();
        sender.send(ByteBuf::from(&payload[..])).await.unwrap();
        match inbox.recv_timeout(TIMEOUT).await.unwrap() {
            Event::Frame { payload: echo, .. } => assert_eq!(echo, payload),
            other => panic!("unexpected {other:?}"),
        }
    }
    let elapsed = now.elapsed();
    println!("{ROUNDS} round trips in {elapsed:?}");
    // A delayed acknowledgement per frame would cost about 40 ms each
    assert!(elapsed < Duration::from_millis(20 * ROUNDS as u64), "{elapsed:?}");

    sender.stop();
    let exit = sender_task.stop().await.unwrap();
    assert!(exit.error.is_none());
    drop(exit.io);
    tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
}
