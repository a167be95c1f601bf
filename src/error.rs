//! Errors reported by the transport engine.
//!
//! There are two layers. The framing code (request writer, response parser, body decoders) works
//! purely in terms of [`std::io::Error`], like any other futures-io codec: errors passed up from
//! the socket pass through unmodified, a server closing its socket before the response is complete
//! is reported as [`std::io::ErrorKind::UnexpectedEof`], and a malformed or unsupported response
//! is reported as [`std::io::ErrorKind::InvalidData`] whose inner error is a [`ProtocolError`].
//!
//! The engine itself reports [`TransportError`], which classifies those I/O errors and adds the
//! failure modes that only exist above a single socket: connecting, timing out, and operating on a
//! transport that has been closed. None of these errors are retried internally.

use std::fmt::{Display, Formatter};

/// The ways in which a received `Content-Length` header can be invalid.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BadContentLength {
	/// The header is not valid UTF-8.
	#[error("{0}")]
	NotUtf8(#[source] std::str::Utf8Error),

	/// The header is not a nonnegative integer or does not fit into a `u64`.
	#[error("{0}")]
	NotU64(#[source] std::num::ParseIntError),
}

/// The ways in which a chunk header can be invalid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BadChunkHeader {
	/// A byte in the chunk size is not a hex digit.
	#[error("chunk size is not a hex number")]
	SizeNotHex,

	/// The size does not fit in a `u64`.
	#[error("chunk size is too large")]
	SizeNotU64,

	/// A character in the chunk extensions section was not permitted to appear there.
	#[error("chunk extensions contain an invalid character")]
	ExtChar,

	/// A CR or LF was not present where required: after the chunk header, after a chunk’s data,
	/// after a trailer field, or after the blank line following the end marker.
	#[error("chunk framing contains incorrect newlines")]
	Newline,

	/// The trailer section following the last chunk is larger than permitted.
	#[error("chunked trailer section too long")]
	TrailerTooLong,
}

/// A malformed or unsupported HTTP response.
///
/// This is the nested error inside any [`std::io::Error`] of kind
/// [`InvalidData`](std::io::ErrorKind::InvalidData) that originates in the framing code. Errors
/// that only pass through (such as those returned by the socket) may have the same kind without
/// carrying a `ProtocolError`.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ProtocolError {
	/// An error occurred while parsing the status line or headers.
	#[error("{0}")]
	ParseHeaders(#[from] httparse::Error),

	/// The response head is larger than the configured limit.
	#[error("response headers too long")]
	ResponseHeadersTooLong,

	/// The server decided to switch protocols. This is not supported.
	#[error("unsupported 101 Switching Protocols received")]
	SwitchingProtocols,

	/// The server sent both a `Content-Length` header and a `Transfer-Encoding` header.
	#[error("Content-Length and Transfer-Encoding both received")]
	ContentLengthAndTransferEncoding,

	/// The server sent multiple `Content-Length` headers.
	#[error("multiple Content-Length headers received")]
	MultipleContentLengths,

	/// The server sent an invalid `Content-Length` header.
	#[error("invalid Content-Length header received: {0}")]
	BadContentLength(#[from] BadContentLength),

	/// The server sent multiple `Transfer-Encoding` headers.
	#[error("multiple Transfer-Encoding headers received")]
	MultipleTransferEncodings,

	/// The server sent a `Transfer-Encoding` header with an encoding other than `chunked`.
	#[error("unsupported Transfer-Encoding received")]
	NotChunked,

	/// The server sent an invalid chunk header.
	#[error("invalid chunk header received: {0}")]
	BadChunkHeader(#[from] BadChunkHeader),
}

impl From<ProtocolError> for std::io::Error {
	fn from(inner: ProtocolError) -> Self {
		Self::new(std::io::ErrorKind::InvalidData, inner)
	}
}

impl From<BadContentLength> for std::io::Error {
	fn from(inner: BadContentLength) -> Self {
		ProtocolError::from(inner).into()
	}
}

impl From<BadChunkHeader> for std::io::Error {
	fn from(inner: BadChunkHeader) -> Self {
		ProtocolError::from(inner).into()
	}
}

/// The operation that was running when a timeout expired.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
	/// DNS resolution, TCP connect, or TLS handshake.
	Connect,

	/// Sending the request head or body.
	Write,

	/// Waiting for the response head or for the next piece of the response body.
	Read,
}

impl Display for Phase {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Connect => "connect",
			Self::Write => "write",
			Self::Read => "read",
		})
	}
}

/// An error reported by the transport engine.
///
/// Whenever one of these is returned for an operation that held a connection, that connection has
/// already been evicted from the pool.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	/// Name resolution, the TCP connect, or the TLS handshake failed.
	#[error("failed to connect to {target}: {source}")]
	Connect {
		/// The destination, as `scheme://host:port`.
		target: String,

		/// The underlying failure.
		#[source]
		source: std::io::Error,
	},

	/// The server sent a malformed or unsupported response.
	#[error("protocol error: {0}")]
	Protocol(#[from] ProtocolError),

	/// The connect timeout or the per-operation stall timeout expired.
	#[error("{0} timed out")]
	Timeout(Phase),

	/// The transport has been closed, or was force-closed while this operation was running.
	#[error("transport is closed")]
	Closed,

	/// A socket operation failed.
	#[error("I/O error: {0}")]
	Io(#[source] std::io::Error),

	/// The URL has a scheme other than `http` or `https`, or has no host.
	#[error("unsupported URL: {0}")]
	UnsupportedUrl(String),
}

impl TransportError {
	/// Returns whether this is a [`Timeout`](Self::Timeout) error.
	#[must_use]
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout(_))
	}

	/// Returns whether this is a [`Connect`](Self::Connect) error.
	#[must_use]
	pub fn is_connect(&self) -> bool {
		matches!(self, Self::Connect { .. })
	}

	/// Returns whether this is a [`Closed`](Self::Closed) error.
	#[must_use]
	pub fn is_closed(&self) -> bool {
		matches!(self, Self::Closed)
	}

	/// Returns whether this is a [`Protocol`](Self::Protocol) error.
	#[must_use]
	pub fn is_protocol(&self) -> bool {
		matches!(self, Self::Protocol(_))
	}
}

impl From<std::io::Error> for TransportError {
	fn from(err: std::io::Error) -> Self {
		match err.kind() {
			std::io::ErrorKind::InvalidData
				if err
					.get_ref()
					.map_or(false, |inner| inner.is::<ProtocolError>()) =>
			{
				match err.into_inner().map(|inner| inner.downcast::<ProtocolError>()) {
					Some(Ok(protocol)) => Self::Protocol(*protocol),
					Some(Err(other)) => Self::Io(std::io::Error::new(
						std::io::ErrorKind::InvalidData,
						other,
					)),
					None => Self::Io(std::io::ErrorKind::InvalidData.into()),
				}
			}
			std::io::ErrorKind::TimedOut => Self::Timeout(Phase::Read),
			_ => Self::Io(err),
		}
	}
}

impl From<TransportError> for std::io::Error {
	fn from(err: TransportError) -> Self {
		match err {
			TransportError::Io(inner) => inner,
			TransportError::Timeout(_) => Self::new(std::io::ErrorKind::TimedOut, err),
			TransportError::Protocol(inner) => inner.into(),
			other => Self::new(std::io::ErrorKind::Other, other),
		}
	}
}
