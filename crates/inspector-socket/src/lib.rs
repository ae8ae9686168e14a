//! # inspector-socket
//!
//! Server-side WebSocket endpoint (RFC 6455) for debugger front-ends.
//!
//! A debugging agent publishes a localhost endpoint; a front-end attaches by
//! opening one TCP connection, speaking HTTP/1.1, and optionally upgrading to
//! a WebSocket. This crate owns that single connection end to end:
//!
//! - [`Handshake`] drives the HTTP phase. Plain `GET` requests and the
//!   upgrade request are surfaced to a user-supplied [`HandshakePolicy`],
//!   which can answer them (writing verbatim response bytes) or veto them.
//! - [`InspectorSocket`] is the upgraded connection. It decodes masked
//!   client text frames into a [`futures::Stream`] of payloads, encodes
//!   outbound messages as unmasked text frames, and runs the two-sided
//!   close handshake.
//!
//! The server accepts only single-fragment text frames. Binary, ping, pong
//! and continuation frames, fragmented messages and permessage-deflate are
//! all rejected as protocol violations, which covers everything a DevTools
//! front-end sends.
//!
//! # Server Example
//! ```no_run
//! use futures::StreamExt;
//! use inspector_socket::{HandshakeEvent, InspectorSocket};
//! use tokio::net::TcpListener;
//!
//! async fn serve() -> inspector_socket::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:9229").await?;
//!     // Gate the handshake; e.g. only allow the published session path.
//!     let policy = |_: &mut inspector_socket::HandshakeWriter,
//!                   event: HandshakeEvent,
//!                   path: Option<&str>| {
//!         event != HandshakeEvent::Upgrading || path == Some("/session")
//!     };
//!     let mut socket = InspectorSocket::accept(&listener, policy).await?;
//!
//!     socket.write("{\"method\":\"Runtime.enable\"}").await?;
//!     while let Some(message) = socket.next().await {
//!         let _payload = message?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod frame;
pub mod handshake;
#[doc(hidden)]
pub mod mask;
mod socket;

pub use codec::{FrameCodec, Role};
pub use frame::{Frame, OpCode};
pub use handshake::{Handshake, HandshakeEvent, HandshakePolicy, HandshakeWriter, accept_key};
pub use socket::InspectorSocket;
use thiserror::Error;

/// Result type for inspector socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

/// Errors that can occur while handshaking or exchanging frames.
#[derive(Error, Debug)]
pub enum SocketError {
    /// Reserved bits 2 or 3 in the frame header are set.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// The frame is not a final fragment. Fragmented messages are not
    /// supported on this endpoint.
    #[error("Fragmented frames are not supported")]
    FragmentedFrame,

    /// RSV1 is set but no compression extension is ever negotiated.
    #[error("Received compressed frame on stream that doesn't support compression")]
    CompressionUnsupported,

    /// A client frame arrived without a masking key (RFC 6455 violation).
    #[error("Client frame is not masked")]
    UnmaskedClientFrame,

    /// Frame opcode other than text or close.
    #[error("Unsupported opcode (byte={0})")]
    UnsupportedOpCode(u8),

    /// Declared payload length exceeds what this platform can hold.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The transport reached EOF or was torn down before the close
    /// handshake completed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The HTTP phase ended without an upgrade: a malformed request, a
    /// non-GET method, a missing `Sec-WebSocket-Key`, a policy veto, or
    /// peer EOF mid-handshake.
    #[error("WebSocket handshake failed")]
    HandshakeFailed,

    /// I/O error from the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SocketError {
    /// Returns `true` if this is a framing-level violation (RFC 6455).
    ///
    /// These correspond to the conditions under which the connection is
    /// dropped without a close frame.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::ReservedBitsNotZero
                | Self::FragmentedFrame
                | Self::CompressionUnsupported
                | Self::UnmaskedClientFrame
                | Self::UnsupportedOpCode(_)
                | Self::FrameTooLarge
        )
    }

    /// Returns `true` if the connection is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Returns `true` if this is a handshake error.
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Self::HandshakeFailed)
    }
}
