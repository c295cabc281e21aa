//! Integration test: server-side handshake OPTIONS → DESCRIBE → SETUP → PLAY
//! → TEARDOWN over loopback, with RTP delivered to the negotiated port.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use rtsp::media::h264::H264Packetizer;
use rtsp::protocol::auth::basic_authorization;
use rtsp::{Credentials, Server, ServerConfig};

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    // Parse Content-Length and read body if present
    if let Some(len) = header(&response, "content-length").and_then(|v| v.parse::<usize>().ok())
        && len > 0
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        response.push_str(&String::from_utf8_lossy(&body));
    }

    Ok(response)
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

fn connect(server: &Server) -> (TcpStream, SocketAddr) {
    let addr = server.local_addr().expect("server bound");
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();
    (stream, addr)
}

#[test]
fn full_handshake_options_describe_setup_play_teardown() {
    let packetizer = H264Packetizer::new(96, 0x1234_5678)
        .with_parameter_sets(vec![0x67, 0x42, 0x00, 0x1e], vec![0x68, 0xce, 0x3c, 0x80]);
    let mut server = Server::with_packetizer("127.0.0.1:0", Box::new(packetizer));
    server.start().expect("server start");
    let (mut stream, addr) = connect(&server);

    let base_uri = format!("rtsp://{}/stream", addr);

    // OPTIONS
    let opt_resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {} RTSP/1.0\r\nCSeq: 1\r\n\r\n", base_uri),
    )
    .expect("OPTIONS response");
    assert!(
        opt_resp.starts_with("RTSP/1.0 200 OK"),
        "OPTIONS: expected 200 OK, got: {}",
        status_line(&opt_resp)
    );
    assert!(
        header(&opt_resp, "Public").is_some_and(|p| p.contains("GET_PARAMETER")),
        "OPTIONS: Public must list GET_PARAMETER"
    );

    // DESCRIBE
    let desc_resp = rtsp_request(
        &mut stream,
        &format!(
            "DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n",
            base_uri
        ),
    )
    .expect("DESCRIBE response");
    assert!(
        desc_resp.starts_with("RTSP/1.0 200 OK"),
        "DESCRIBE: expected 200 OK, got: {}",
        status_line(&desc_resp)
    );
    assert_eq!(header(&desc_resp, "Content-Type"), Some("application/sdp"));
    assert_eq!(
        header(&desc_resp, "Content-Base"),
        Some(format!("{}/", base_uri).as_str())
    );
    assert!(desc_resp.contains("m=video 0 RTP/AVP 96"));
    assert!(desc_resp.contains("a=rtpmap:96 H264/90000"));
    assert!(desc_resp.contains("sprop-parameter-sets=Z0IAHg==,aM48gA=="));

    // SETUP (track1) with a real client socket
    let rtp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp_socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let client_port = rtp_socket.local_addr().unwrap().port();
    let setup_resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {}/track1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            base_uri,
            client_port,
            client_port + 1
        ),
    )
    .expect("SETUP response");
    assert!(
        setup_resp.starts_with("RTSP/1.0 200 OK"),
        "SETUP: expected 200 OK, got: {}",
        status_line(&setup_resp)
    );
    let transport = header(&setup_resp, "Transport").expect("SETUP: missing Transport header");
    assert!(transport.contains(&format!("client_port={}-{}", client_port, client_port + 1)));
    assert!(transport.contains("server_port="));
    assert!(!transport.contains("server_port=0-"), "server_port must be bound: {}", transport);

    let session_id = header(&setup_resp, "Session")
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    assert!(!session_id.is_empty(), "SETUP: could not parse Session id");

    // PLAY
    let play_resp = rtsp_request(
        &mut stream,
        &format!(
            "PLAY {} RTSP/1.0\r\nCSeq: 4\r\nSession: {}\r\n\r\n",
            base_uri, session_id
        ),
    )
    .expect("PLAY response");
    assert!(
        play_resp.starts_with("RTSP/1.0 200 OK"),
        "PLAY: expected 200 OK, got: {}",
        status_line(&play_resp)
    );
    assert!(header(&play_resp, "RTP-Info").is_some(), "PLAY: missing RTP-Info header");
    assert_eq!(server.get_viewers().len(), 1);

    // Media reaches the negotiated port
    let reached = server
        .publish(&[0, 0, 0, 1, 0x65, 0x88, 0x80, 0x10], 3000)
        .expect("publish");
    assert_eq!(reached, 1);
    let mut buf = [0u8; 2048];
    let (len, _) = rtp_socket.recv_from(&mut buf).expect("RTP datagram");
    assert_eq!(buf[0] >> 6, 2, "RTP version");
    assert_eq!(buf[1] & 0x7f, 96, "payload type");
    assert_eq!(buf[1] & 0x80, 0x80, "marker on last packet of the frame");
    assert_eq!(&buf[12..len], &[0x65, 0x88, 0x80, 0x10]);

    // GET_PARAMETER keepalive
    let keepalive = rtsp_request(
        &mut stream,
        &format!(
            "GET_PARAMETER {} RTSP/1.0\r\nCSeq: 5\r\nSession: {}\r\n\r\n",
            base_uri, session_id
        ),
    )
    .expect("GET_PARAMETER response");
    assert!(keepalive.starts_with("RTSP/1.0 200 OK"));

    // TEARDOWN
    let teardown = rtsp_request(
        &mut stream,
        &format!(
            "TEARDOWN {} RTSP/1.0\r\nCSeq: 6\r\nSession: {}\r\n\r\n",
            base_uri, session_id
        ),
    )
    .expect("TEARDOWN response");
    assert!(teardown.starts_with("RTSP/1.0 200 OK"));
    assert!(server.get_viewers().is_empty());

    server.stop();
}

#[test]
fn basic_auth_gates_describe_but_not_options() {
    let credentials = Credentials::new("viewer", "s3cret");
    let config = ServerConfig::default().with_credentials(credentials.clone());
    let mut server = Server::with_config("127.0.0.1:0", config);
    server.start().expect("server start");
    let (mut stream, addr) = connect(&server);
    let uri = format!("rtsp://{}/stream", addr);

    let options = rtsp_request(&mut stream, &format!("OPTIONS {} RTSP/1.0\r\nCSeq: 1\r\n\r\n", uri))
        .unwrap();
    assert!(options.starts_with("RTSP/1.0 200 OK"));

    let denied = rtsp_request(&mut stream, &format!("DESCRIBE {} RTSP/1.0\r\nCSeq: 2\r\n\r\n", uri))
        .unwrap();
    assert!(denied.starts_with("RTSP/1.0 401"), "got: {}", status_line(&denied));
    assert!(header(&denied, "WWW-Authenticate").is_some_and(|v| v.starts_with("Basic realm=")));

    let allowed = rtsp_request(
        &mut stream,
        &format!(
            "DESCRIBE {} RTSP/1.0\r\nCSeq: 3\r\nAuthorization: {}\r\n\r\n",
            uri,
            basic_authorization(&credentials)
        ),
    )
    .unwrap();
    assert!(allowed.starts_with("RTSP/1.0 200 OK"), "got: {}", status_line(&allowed));
    assert!(allowed.contains("v=0"));

    server.stop();
}

#[test]
fn garbage_request_line_gets_400() {
    let mut server = Server::new("127.0.0.1:0");
    server.start().expect("server start");
    let (mut stream, _) = connect(&server);

    let response = rtsp_request(&mut stream, "HELLO\r\nCSeq: 1\r\n\r\n").unwrap();
    assert!(response.starts_with("RTSP/1.0 400"), "got: {}", status_line(&response));

    server.stop();
}
