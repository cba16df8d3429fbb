//! Start/stop capture driven entirely over a real TCP connection, the way
//! a GUI would (spec §8 S5).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chronoscope::{BlockStatus, BlockType, Color, NetworkBridge, ProfileManager, ProfilerConfig};
use chronoscope_clock::Tick;
use chronoscope_network::{ClientRequest, ServerMessage};

fn write_frame(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(&(bytes.len() as u32).to_le_bytes()).unwrap();
    stream.write_all(bytes).unwrap();
}

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition never became true within the test's deadline");
}

#[test]
fn start_capture_record_a_block_then_stop_capture_over_tcp() {
    let addr = "127.0.0.1:18733".parse().unwrap();
    let manager = Arc::new(ProfileManager::new(ProfilerConfig::default()));
    let mut bridge = NetworkBridge::bind(addr).expect("bind the control listener");

    let stop = Arc::new(AtomicBool::new(false));
    let poll_manager = Arc::clone(&manager);
    let poll_stop = Arc::clone(&stop);
    let poller = thread::spawn(move || {
        while !poll_stop.load(Ordering::Acquire) {
            bridge.poll(&poll_manager);
            thread::sleep(Duration::from_millis(5));
        }
    });

    let mut client = TcpStream::connect(addr).expect("connect to the control listener");
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    // The bridge greets every new connection with its current status
    // before answering any request (spec §4.8 connection handshake).
    let greeting = ServerMessage::decode(&read_frame(&mut client)).unwrap();
    assert!(matches!(greeting, ServerMessage::Status { is_enabled: false, .. }));

    let mut start_request = Vec::new();
    ClientRequest::RequestStartCapture.encode(&mut start_request);
    write_frame(&mut client, &start_request);
    wait_until(|| manager.is_enabled());

    let thread = manager.register_thread(99, Some("net-worker".into()), false);
    let descriptor =
        manager.descriptors.register("net-work", "net.rs", 1, Color::DEFAULT, BlockType::Block, BlockStatus::ON, false);
    thread.begin_block(descriptor.clone(), Tick::now(), None);
    thread.end_block(Tick::now());

    let mut stop_request = Vec::new();
    ClientRequest::RequestStopCapture.encode(&mut stop_request);
    write_frame(&mut client, &stop_request);

    let response = ServerMessage::decode(&read_frame(&mut client)).unwrap();
    match response {
        ServerMessage::CaptureData { bytes } => {
            assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), chronoscope::SIGNATURE);
            assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), chronoscope::FORMAT_VERSION);
        }
        other => panic!("expected CaptureData, got {other:?}"),
    }
    assert!(!manager.is_enabled());

    stop.store(true, Ordering::Release);
    poller.join().unwrap();
}
