use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use framelane::{ByteBuf, DrrConfig, Event, Priority};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() {
    let Args { verbose, command } = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if verbose { "framelane=debug" } else { "framelane=info" })
        .init();

    match command {
        Command::Server { addr } => server(addr).await,
        Command::Client {
            addr,
            count,
            size,
            interval,
        } => client(addr, count, size, interval).await,
    }
}

// Echoes back every frame of every connection
async fn server(addr: String) {
    let listener = TcpListener::bind(&addr).await.unwrap();
    println!("Listening on {addr}");

    let (tx, mut inbox) = framelane::inbox(1024);
    let mut senders = std::collections::HashMap::new();

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, peer) = res.unwrap();
                let (stream_reader, stream_writer) = stream.into_split();
                let receiver_task = framelane::receiver(stream_reader, tx.clone()).handshake(true).build();
                let (sender, _sender_task) = framelane::sender(stream_writer).build();
                println!("{} connected from {peer}", receiver_task.id());
                senders.insert(receiver_task.id(), sender);
            }
            res = inbox.recv() => match res.unwrap() {
                Event::Handshake { id, handshake } => {
                    println!("{id} handshake: {}", handshake.request_line());
                    for (name, values) in handshake.headers().iter() {
                        println!("{id}   {name}: {}", values.join(", "));
                    }
                }
                Event::Frame { id, payload } => {
                    if let Some(sender) = senders.get(&id) {
                        if let Err(e) = sender.send(ByteBuf::from(payload)).await {
                            println!("{id} send failed: {e}");
                        }
                    }
                }
                Event::Closed { id, error } => {
                    println!("{id} closed: {error:?}");
                    senders.remove(&id);
                }
            }
        }
    }
}

// Sends `count` payloads alternating two priority classes and measures the echo
async fn client(addr: String, count: usize, size: usize, interval: f32) {
    let stream = TcpStream::connect(&addr).await.unwrap();
    let (stream_reader, mut stream_writer) = stream.into_split();

    use tokio::io::AsyncWriteExt;
    stream_writer
        .write_all(b"ECHO / FL/1\r\nUser-Agent: framelane-demo\r\n\r\n")
        .await
        .unwrap();

    let (control, bulk) = (Priority::new(0), Priority::new(1));
    let (sender, _sender_task) = framelane::sender(stream_writer)
        .drr(DrrConfig::default().with_class(control, 2.0).with_class(bulk, 1.0))
        .build();
    let (tx, mut inbox) = framelane::inbox(1024);
    let _receiver_task = framelane::receiver(stream_reader, tx).build();

    let mut interval = tokio::time::interval(Duration::from_secs_f32(interval));
    for counter in 0..count {
        interval.tick().await;

        let priority = if counter % 2 == 0 { control } else { bulk };
        let mut buf = ByteBuf::with_capacity(size).with_priority(priority);
        buf.write_slice(&vec![counter as u8; size]);

        let now = Instant::now();
        sender.send(buf).await.unwrap();
        match inbox.recv().await.unwrap() {
            Event::Frame { payload, .. } => {
                println!(
                    "[{counter:4}] {priority} {} bytes echoed in {:?}",
                    payload.len(),
                    now.elapsed()
                );
            }
            Event::Closed { error, .. } => {
                println!("Connection closed: {error:?}");
                return;
            }
            Event::Handshake { .. } => {}
        }
    }
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Echo every frame back to its connection
    Server {
        #[arg(short, long, default_value = "127.0.0.1:9999")]
        addr: String,
    },
    /// Send frames and wait for their echo
    Client {
        #[arg(short, long, default_value = "127.0.0.1:9999")]
        addr: String,
        #[arg(short, long, default_value = "10")]
        count: usize,
        #[arg(short, long, default_value = "1024")]
        size: usize,
        #[arg(short, long, default_value = "0.5")]
        interval: f32,
    },
}
