use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use rtsp::media::h264::H264Packetizer;
use rtsp::media::annex_b;
use rtsp::protocol::SdpInfo;
use rtsp::{
    ClientConfig, Credentials, FailureReason, Frame, QueueListener, RtspClient, RtspListener,
    Server, ServerConfig, SessionState,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rtsp-engine", about = "RTSP player and H.264 file server")]
struct Cli {
    /// Dump every RTSP message and log sampled RTP counters
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play an rtsp:// URL and log the received access units
    Play(PlayArgs),
    /// Serve an Annex B H.264 file in a loop
    Serve(ServeArgs),
}

#[derive(Args)]
struct Auth {
    #[arg(long, short)]
    user: Option<String>,

    #[arg(long, short, requires = "user")]
    password: Option<String>,
}

impl Auth {
    fn credentials(&self) -> Option<Credentials> {
        let user = self.user.as_ref()?;
        Some(Credentials::new(
            user.as_str(),
            self.password.as_deref().unwrap_or_default(),
        ))
    }
}

#[derive(Args)]
struct PlayArgs {
    url: String,

    #[command(flatten)]
    auth: Auth,

    /// Also request the audio track
    #[arg(long)]
    audio: bool,

    /// Frames buffered between the network and the consumer
    #[arg(long, default_value_t = 60)]
    queue: usize,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[derive(Args)]
struct ServeArgs {
    file: PathBuf,

    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[command(flatten)]
    auth: Auth,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Play(args) => play(args, cli.debug),
        Command::Serve(args) => serve(args, cli.debug),
    }
}

/// Stop on Enter.
fn on_enter(stop: impl FnOnce() + Send + 'static) {
    thread::spawn(move || {
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_ok() {
            stop();
        }
    });
}

/// Logs session events and forwards media to the queues.
struct LoggingListener {
    queues: QueueListener,
}

impl RtspListener for LoggingListener {
    fn on_connecting(&self) {
        tracing::info!("connecting");
    }

    fn on_connected(&self, sdp: &SdpInfo) {
        for track in &sdp.tracks {
            tracing::info!(
                kind = %track.media_type,
                codec = ?track.codec,
                clock_rate = track.clock_rate_hz,
                "track"
            );
        }
        self.queues.on_connected(sdp);
    }

    fn on_video_unit(&self, frame: Frame) {
        self.queues.on_video_unit(frame);
    }

    fn on_audio_unit(&self, frame: Frame) {
        tracing::trace!(bytes = frame.len(), ts = frame.timestamp_micros(), "audio");
        self.queues.on_audio_unit(frame);
    }

    fn on_disconnected(&self) {
        tracing::info!("disconnected");
        self.queues.on_disconnected();
    }

    fn on_failed(&self, reason: &FailureReason) {
        tracing::error!(%reason, "session failed");
        self.queues.on_failed(reason);
    }

    fn on_failed_unauthorized(&self) {
        tracing::error!("authentication rejected");
        self.queues.on_failed_unauthorized();
    }
}

fn play(args: PlayArgs, debug: bool) -> ExitCode {
    let mut config = ClientConfig::new(args.url)
        .with_audio(args.audio)
        .with_queue_capacity(args.queue)
        .with_debug(debug);
    if let Some(credentials) = args.auth.credentials() {
        config = config.with_credentials(credentials);
    }

    let queues = QueueListener::from_config(&config);
    let video = queues.video_queue();
    let mut client = RtspClient::new(config, Arc::new(LoggingListener { queues }));
    let handle = client.handle();
    handle.clear_on_stop(video.clone());

    let session = thread::spawn(move || client.run());

    let consumer = {
        let video = video.clone();
        thread::spawn(move || {
            let mut frames = 0u64;
            let mut bytes = 0u64;
            while !video.is_closed() {
                let Some(frame) = video.pop(Duration::from_millis(200)) else {
                    continue;
                };
                frames += 1;
                bytes += frame.len() as u64;
                tracing::debug!(bytes = frame.len(), ts = frame.timestamp_micros(), "video");
                if frames % 100 == 0 {
                    tracing::info!(frames, bytes, dropped = video.stats().dropped, "received");
                }
            }
            (frames, bytes)
        })
    };

    {
        let handle = handle.clone();
        on_enter(move || handle.stop());
    }
    println!("Playing, press Enter to stop");

    if let Some(secs) = args.duration {
        let deadline = Instant::now() + Duration::from_secs(secs);
        while Instant::now() < deadline && !handle.state().is_terminal() {
            thread::sleep(Duration::from_millis(100));
        }
        handle.stop();
    }

    let state = session.join().unwrap_or_else(|_| {
        SessionState::Failed(FailureReason::Protocol("session thread panicked".into()))
    });
    video.close();
    if let Ok((frames, bytes)) = consumer.join() {
        tracing::info!(frames, bytes, "done");
    }

    match state {
        SessionState::TornDown => ExitCode::SUCCESS,
        other => {
            eprintln!("{}", other);
            ExitCode::FAILURE
        }
    }
}

/// Group a NAL stream into access units. A VCL NAL whose slice starts at
/// macroblock 0, or a non-VCL NAL following a VCL one, opens a new unit.
fn access_units(nals: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut units = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut has_vcl = false;

    for nal in nals.into_iter().filter(|n| n.len() > 1) {
        let nal_type = nal[0] & 0x1f;
        let vcl = (1..=5).contains(&nal_type);
        let first_slice = vcl && nal[1] & 0x80 != 0;
        if has_vcl && (!vcl || first_slice) {
            units.push(annex_b(current.iter().map(Vec::as_slice)));
            current.clear();
            has_vcl = false;
        }
        has_vcl |= vcl;
        current.push(nal);
    }
    if has_vcl {
        units.push(annex_b(current.iter().map(Vec::as_slice)));
    }
    units
}

fn serve(args: ServeArgs, debug: bool) -> ExitCode {
    let data = match std::fs::read(&args.file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Cannot read {}: {}", args.file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let units = access_units(H264Packetizer::extract_nal_units(&data));
    if units.is_empty() {
        eprintln!("No H.264 access units in {}", args.file.display());
        return ExitCode::FAILURE;
    }

    let mut config = ServerConfig::default().with_debug(debug);
    if let Some(credentials) = args.auth.credentials() {
        config = config.with_credentials(credentials);
    }
    let mut server = Server::with_config(&args.bind, config);
    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    let fps = args.fps.max(1);
    let ticks = 90_000 / fps;
    let interval = Duration::from_secs(1) / fps;
    tracing::info!(units = units.len(), fps, file = %args.file.display(), "serving");
    println!("RTSP server on {}, press Enter to stop", args.bind);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        on_enter(move || running.store(false, Ordering::SeqCst));
    }

    let mut next = Instant::now();
    'outer: loop {
        for unit in &units {
            if !running.load(Ordering::SeqCst) {
                break 'outer;
            }
            if let Err(e) = server.publish(unit, ticks) {
                tracing::warn!(error = %e, "publish failed");
            }
            next += interval;
            if let Some(wait) = next.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }

    server.stop();
    ExitCode::SUCCESS
}
