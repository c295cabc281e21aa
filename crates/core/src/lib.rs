pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{
    ClientConfig, FailureReason, QueueListener, RtspClient, RtspListener, SessionState, StopHandle,
};
pub use error::{Result, RtspError};
pub use media::{MediaKind, Packetizer};
pub use protocol::auth::Credentials;
pub use queue::{Frame, FrameQueue, OverflowPolicy};
pub use server::{Server, ServerConfig, ServerObserver, Viewer};
