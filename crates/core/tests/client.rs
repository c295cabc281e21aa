//! Client integration tests over loopback: against the crate's own server,
//! and against a scripted server for authentication failures.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtsp::media::annex_b;
use rtsp::media::h264::H264Packetizer;
use rtsp::protocol::auth::basic_authorization;
use rtsp::protocol::reader::MessageReader;
use rtsp::protocol::{RtspRequest, RtspResponse};
use rtsp::{
    ClientConfig, Credentials, FailureReason, Frame, QueueListener, RtspClient, RtspListener,
    Server, SessionState, StopHandle,
};

const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1e];
const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn start_server() -> Server {
    let packetizer = H264Packetizer::with_random_ssrc(96)
        .with_parameter_sets(SPS.to_vec(), PPS.to_vec())
        .with_mtu(1200);
    let mut server = Server::with_packetizer("127.0.0.1:0", Box::new(packetizer));
    server.start().expect("server start");
    server
}

fn client_config(server: &Server) -> ClientConfig {
    let addr = server.local_addr().expect("server bound");
    ClientConfig::new(format!("rtsp://{}/live", addr))
        .with_rtp_bind_ip("127.0.0.1".parse().unwrap())
        .with_response_timeout(Duration::from_secs(2))
}

fn spawn_client(
    config: ClientConfig,
    listener: Arc<dyn RtspListener>,
) -> (StopHandle, thread::JoinHandle<SessionState>) {
    let mut client = RtspClient::new(config, listener);
    let handle = client.handle();
    (handle, thread::spawn(move || client.run()))
}

fn idr_frame(len: usize, seed: u8) -> Vec<u8> {
    let mut nal = vec![0x65, 0x88];
    nal.extend((0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)));
    annex_b([nal.as_slice()])
}

#[test]
fn receives_priming_frame_then_reassembled_units() {
    let server = start_server();
    let listener = QueueListener::new(32);
    let video = listener.video_queue();
    let (handle, session) = spawn_client(client_config(&server), Arc::new(listener));

    assert!(
        wait_for(Duration::from_secs(5), || handle.state() == SessionState::Playing),
        "client never reached Playing: {}",
        handle.state()
    );
    assert!(wait_for(Duration::from_secs(2), || server.get_viewers().len() == 1));

    // Large enough to need FU-A at MTU 1200.
    let frames: Vec<Vec<u8>> = (0..5).map(|i| idr_frame(4000 + i * 100, i as u8)).collect();
    for frame in &frames {
        assert_eq!(server.publish(frame, 3000).unwrap(), 1);
        thread::sleep(Duration::from_millis(10));
    }

    let priming = video.pop(Duration::from_secs(2)).expect("priming frame");
    assert_eq!(priming.data(), annex_b([SPS.as_slice(), PPS.as_slice()]).as_slice());
    assert_eq!(priming.timestamp_micros(), 0);

    let mut last_ts = 0;
    for (i, expected) in frames.iter().enumerate() {
        let frame = video.pop(Duration::from_secs(2)).expect("access unit");
        assert_eq!(frame.data(), expected.as_slice(), "unit {}", i);
        assert!(frame.timestamp_micros() >= last_ts, "timestamps must not go backwards");
        assert_eq!(frame.timestamp_micros(), i as i64 * 3000 * 1_000_000 / 90_000);
        last_ts = frame.timestamp_micros();
    }

    handle.stop();
    assert_eq!(session.join().unwrap(), SessionState::TornDown);
    assert!(
        wait_for(Duration::from_secs(2), || server.get_viewers().is_empty()),
        "server session should be torn down"
    );
}

#[test]
fn stop_wakes_blocked_consumer_quickly() {
    let server = start_server();
    let listener = QueueListener::new(8);
    let video = listener.video_queue();
    let (handle, session) = spawn_client(client_config(&server), Arc::new(listener));
    handle.clear_on_stop(video.clone());

    assert!(wait_for(Duration::from_secs(5), || handle.state() == SessionState::Playing));

    let consumer = {
        let video = video.clone();
        thread::spawn(move || {
            // Drain the priming frame, then block.
            while video.pop(Duration::from_millis(50)).is_some() {}
            let started = Instant::now();
            let popped = video.pop(Duration::from_secs(10));
            (popped.is_none(), started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(200));

    let stopped_at = Instant::now();
    handle.stop();
    let (woke_empty, _) = consumer.join().unwrap();
    assert!(woke_empty);
    assert!(
        stopped_at.elapsed() < Duration::from_secs(1),
        "consumer took {:?} to wake",
        stopped_at.elapsed()
    );

    assert_eq!(session.join().unwrap(), SessionState::TornDown);
    assert!(stopped_at.elapsed() < Duration::from_secs(2));
}

#[test]
fn unreachable_server_fails_with_network_reason() {
    // Bind then drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let config = ClientConfig::new(format!("rtsp://127.0.0.1:{}/live", port))
        .with_response_timeout(Duration::from_millis(500));
    let mut client = RtspClient::new(config, Arc::new(QueueListener::default()));

    match client.run() {
        SessionState::Failed(FailureReason::Network(_)) => {}
        other => panic!("expected network failure, got {}", other),
    }
}

#[test]
fn stop_while_connecting_tears_down_quickly() {
    // A listener that never accepts. Once its backlog is full, further
    // connects hang until they time out.
    let silent = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = silent.local_addr().unwrap();
    let mut held = Vec::new();
    for _ in 0..4096 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(100)) {
            Ok(stream) => held.push(stream),
            Err(_) => break,
        }
    }

    let config = ClientConfig::new(format!("rtsp://{}/live", addr))
        .with_response_timeout(Duration::from_secs(5));
    let (handle, session) = spawn_client(config, Arc::new(QueueListener::default()));
    assert!(wait_for(Duration::from_secs(2), || handle.state() != SessionState::Idle));
    thread::sleep(Duration::from_millis(300));

    let stopped_at = Instant::now();
    handle.stop();
    assert_eq!(session.join().unwrap(), SessionState::TornDown);
    assert!(
        stopped_at.elapsed() < Duration::from_secs(1),
        "stop took {:?}",
        stopped_at.elapsed()
    );
    drop(held);
}

/// Records which terminal callback fired.
#[derive(Default)]
struct Outcome {
    unauthorized: AtomicBool,
    failed: Mutex<Option<FailureReason>>,
}

impl RtspListener for Outcome {
    fn on_failed(&self, reason: &FailureReason) {
        *self.failed.lock() = Some(reason.clone());
    }

    fn on_failed_unauthorized(&self) {
        self.unauthorized.store(true, Ordering::SeqCst);
    }

    fn on_video_unit(&self, _frame: Frame) {
        panic!("no media expected");
    }
}

/// One-connection scripted server. `reply` maps each request to a response;
/// returns every request received.
fn scripted_server(
    reply: impl Fn(&RtspRequest) -> RtspResponse + Send + 'static,
) -> (String, thread::JoinHandle<Vec<RtspRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("rtsp://{}/cam", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let mut reader = MessageReader::new();
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let raw = match reader.read_from(&mut stream) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(_) => break,
            };
            let request = RtspRequest::from_raw(raw).unwrap();
            let response = reply(&request).add_header("CSeq", request.cseq().unwrap_or("0"));
            stream.write_all(response.serialize().as_bytes()).unwrap();
            seen.push(request);
        }
        seen
    });
    (url, handle)
}

#[test]
fn second_401_ends_in_failed_unauthorized() {
    let (url, server) = scripted_server(|request| match request.method.as_str() {
        "OPTIONS" => RtspResponse::ok().add_header("Public", "OPTIONS, DESCRIBE, SETUP, PLAY"),
        _ => RtspResponse::unauthorized("test"),
    });

    let credentials = Credentials::new("user", "wrong");
    let outcome = Arc::new(Outcome::default());
    let mut client = RtspClient::new(
        ClientConfig::new(url).with_credentials(credentials.clone()),
        outcome.clone(),
    );

    assert_eq!(client.run(), SessionState::Failed(FailureReason::Unauthorized));
    assert!(outcome.unauthorized.load(Ordering::SeqCst));
    assert!(outcome.failed.lock().is_none());

    let requests = server.join().unwrap();
    let describes: Vec<_> = requests.iter().filter(|r| r.method == "DESCRIBE").collect();
    assert_eq!(describes.len(), 2, "exactly one retry");
    assert_eq!(describes[0].get_header("Authorization"), None);
    assert_eq!(
        describes[1].get_header("Authorization"),
        Some(basic_authorization(&credentials).as_str())
    );
    assert!(requests.iter().all(|r| r.get_header("User-Agent").is_some()));
}

#[test]
fn digest_challenge_is_answered_with_digest() {
    let (url, server) = scripted_server(|request| {
        match (request.method.as_str(), request.get_header("Authorization")) {
            ("DESCRIBE", None) => RtspResponse::new(401, "Unauthorized")
                .add_header("WWW-Authenticate", "Basic realm=\"cam\"")
                .add_header(
                    "WWW-Authenticate",
                    "Digest realm=\"cam\", nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\"",
                ),
            ("DESCRIBE", Some(_)) => RtspResponse::not_found(),
            _ => RtspResponse::ok(),
        }
    });

    let outcome = Arc::new(Outcome::default());
    let mut client = RtspClient::new(
        ClientConfig::new(url.replace("rtsp://", "rtsp://admin:pw@")),
        outcome.clone(),
    );

    match client.run() {
        SessionState::Failed(FailureReason::Protocol(msg)) => assert!(msg.contains("404"), "{}", msg),
        other => panic!("expected protocol failure, got {}", other),
    }
    assert!(matches!(*outcome.failed.lock(), Some(FailureReason::Protocol(_))));

    let requests = server.join().unwrap();
    let retry = requests
        .iter()
        .filter(|r| r.method == "DESCRIBE")
        .nth(1)
        .expect("retried DESCRIBE");
    let authorization = retry.get_header("Authorization").unwrap();
    assert!(authorization.starts_with("Digest "), "{}", authorization);
    assert!(authorization.contains("username=\"admin\""));
    assert!(authorization.contains(&format!("uri=\"{}\"", retry.uri)));
    assert!(!retry.uri.contains("admin"), "credentials must be stripped from the URL");
}

#[test]
fn missing_credentials_fail_without_retry() {
    let (url, server) = scripted_server(|request| match request.method.as_str() {
        "DESCRIBE" => RtspResponse::unauthorized("test"),
        _ => RtspResponse::ok(),
    });

    let outcome = Arc::new(Outcome::default());
    let mut client = RtspClient::new(ClientConfig::new(url), outcome.clone());
    assert_eq!(client.run(), SessionState::Failed(FailureReason::Unauthorized));
    assert!(outcome.unauthorized.load(Ordering::SeqCst));

    let requests = server.join().unwrap();
    assert_eq!(requests.iter().filter(|r| r.method == "DESCRIBE").count(), 1);
}
