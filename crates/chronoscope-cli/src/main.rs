//! Demo and control client for the profiler (spec §6, C8).
//!
//! `demo` runs a small synthetic workload instrumented with `block!`/
//! `event!`, optionally serving the TCP control protocol while it runs;
//! `connect` is a one-shot client for that protocol, useful for poking a
//! running process without a GUI.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::info;

use chronoscope::{block, event};
use chronoscope_network::{ClientRequest, ServerMessage};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a synthetic instrumented workload and dump a capture file.
    Demo {
        /// How long to run, in seconds.
        #[arg(long, default_value_t = 3)]
        duration_secs: u64,
        /// Where to write the capture (spec §4.7).
        #[arg(long, default_value = "chronoscope-demo.chron")]
        output: std::path::PathBuf,
        /// Serve the control protocol on this address while running.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Send one control request to a running process and print the response.
    Connect {
        #[arg(long, default_value = "127.0.0.1:28077")]
        addr: SocketAddr,
        #[command(subcommand)]
        request: ConnectRequest,
    },
}

#[derive(Subcommand)]
enum ConnectRequest {
    Ping,
    MainThreadFps,
    StartCapture,
    StopCapture,
    BlocksDescription,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Demo { duration_secs, output, listen } => run_demo(duration_secs, &output, listen),
        Command::Connect { addr, request } => run_connect(addr, request),
    }
}

fn run_demo(duration_secs: u64, output: &std::path::Path, listen: Option<SocketAddr>) {
    chronoscope::init(chronoscope::ProfilerConfig::builder().enabled_at_start(true).capture_file(output).build());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        let _ = ctrlc::set_handler(move || running.store(false, Ordering::Relaxed));
    }

    let mut bridge = listen.map(|addr| {
        info!(%addr, "serving the control protocol");
        chronoscope::NetworkBridge::bind(addr).expect("failed to bind control listener")
    });

    let worker = std::thread::Builder::new()
        .name("chronoscope-demo-worker".into())
        .spawn(workload_loop)
        .expect("failed to spawn worker thread");

    let deadline = Instant::now() + Duration::from_secs(duration_secs);
    while Instant::now() < deadline && running.load(Ordering::Relaxed) {
        let _span = block!("main loop tick");
        if let Some(bridge) = bridge.as_mut() {
            bridge.poll(chronoscope::manager());
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    running.store(false, Ordering::Relaxed);
    worker.join().expect("worker thread panicked");

    chronoscope::dump_to_file().expect("failed to write capture file");
    info!(path = %output.display(), "capture written");
}

fn workload_loop() {
    let _guard = chronoscope::register_thread_scoped("demo-worker");
    for i in 0..50 {
        let _span = block!("process batch");
        do_work(i);
        event!("batch done");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn do_work(i: u64) {
    let _span = block!("inner work");
    let mut acc = i;
    for _ in 0..1000 {
        acc = acc.wrapping_mul(2654435761).wrapping_add(1);
    }
    std::hint::black_box(acc);
}

fn run_connect(addr: SocketAddr, request: ConnectRequest) {
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).ok();

    // The server greets every new connection with a Status message before
    // the client sends anything (spec §4.8 handshake); drain it first so it
    // doesn't get mistaken for the response to our request.
    let greeting = read_frame(&mut stream).expect("connection closed before handshake");
    info!(?greeting, "server status");

    let request = match request {
        ConnectRequest::Ping => ClientRequest::Ping,
        ConnectRequest::MainThreadFps => ClientRequest::RequestMainThreadFps,
        ConnectRequest::StartCapture => ClientRequest::RequestStartCapture,
        ConnectRequest::StopCapture => ClientRequest::RequestStopCapture,
        ConnectRequest::BlocksDescription => ClientRequest::RequestBlocksDescription,
    };
    write_frame(&mut stream, &request);

    if matches!(request, ClientRequest::RequestStartCapture) {
        println!("capture started");
        return;
    }

    let response = read_frame(&mut stream).expect("no response from server");
    println!("{response:?}");
}

fn write_frame(stream: &mut TcpStream, request: &ClientRequest) {
    let mut payload = Vec::new();
    request.encode(&mut payload);
    stream.write_all(&(payload.len() as u32).to_le_bytes()).expect("write failed");
    stream.write_all(&payload).expect("write failed");
}

fn read_frame(stream: &mut TcpStream) -> Option<ServerMessage> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    ServerMessage::decode(&payload).ok()
}
