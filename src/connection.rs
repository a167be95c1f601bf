//! Pooled connections and the keys they are pooled under.

use crate::error::TransportError;
use futures_core::ready;
use std::fmt::{Display, Formatter};
use std::io::Result;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead as _, AsyncRead as _, AsyncWrite as _, BufReader, BufWriter};
use tokio::net::TcpStream;

/// The scheme of a pooled destination.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Scheme {
	/// Plain-text HTTP.
	Http,

	/// HTTP over TLS.
	Https,
}

impl Scheme {
	/// The port used when a URL names none.
	#[must_use]
	pub fn default_port(self) -> u16 {
		match self {
			Self::Http => 80,
			Self::Https => 443,
		}
	}

	/// The scheme as it appears in a URL.
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Http => "http",
			Self::Https => "https",
		}
	}
}

/// Identifies a bucket of interchangeable connections: scheme, host, and port.
///
/// Connections are only ever handed out to requests whose key is equal to the one the connection
/// was opened for.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PoolKey {
	scheme: Scheme,
	host: String,
	port: u16,
}

impl PoolKey {
	/// Builds a key from its parts. The host is lowercased.
	pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
		Self {
			scheme,
			host: host.to_ascii_lowercase(),
			port,
		}
	}

	/// Derives the key a request to `url` is pooled under.
	///
	/// # Errors
	/// Returns [`TransportError::UnsupportedUrl`] if the scheme is neither `http` nor `https`, or
	/// the URL has no host.
	pub fn from_url(url: &url::Url) -> std::result::Result<Self, TransportError> {
		let scheme = match url.scheme() {
			"http" => Scheme::Http,
			"https" => Scheme::Https,
			_ => return Err(TransportError::UnsupportedUrl(url.to_string())),
		};
		let host = url
			.host_str()
			.filter(|h| !h.is_empty())
			.ok_or_else(|| TransportError::UnsupportedUrl(url.to_string()))?;
		let port = url.port().unwrap_or_else(|| scheme.default_port());
		Ok(Self::new(scheme, host, port))
	}

	/// Returns the scheme.
	#[must_use]
	pub fn scheme(&self) -> Scheme {
		self.scheme
	}

	/// Returns the host as it appears in a URL; IPv6 literals keep their brackets.
	#[must_use]
	pub fn host(&self) -> &str {
		&self.host
	}

	/// Returns the port.
	#[must_use]
	pub fn port(&self) -> u16 {
		self.port
	}

	/// The host in the form name resolution and TLS server names expect.
	pub(crate) fn bare_host(&self) -> &str {
		self.host
			.strip_prefix('[')
			.and_then(|h| h.strip_suffix(']'))
			.unwrap_or(&self.host)
	}

	/// The value of a `Host` header for this destination.
	pub(crate) fn authority(&self) -> String {
		if self.port == self.scheme.default_port() {
			self.host.clone()
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}
}

impl Display for PoolKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
	}
}

/// Where a connection is in its life.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
	/// Owned by the pool, waiting for a request.
	Idle,

	/// Owned by a request or by a response body.
	InUse,

	/// An I/O error, protocol violation, or timeout made it unusable. It will be closed.
	Broken,

	/// Shut down and about to be dropped.
	Closed,
}

/// Counts the connections that are currently open.
#[derive(Debug)]
pub(crate) struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
	pub(crate) fn new(counter: &Arc<AtomicUsize>) -> Self {
		let _ = counter.fetch_add(1, Ordering::Relaxed);
		Self(Arc::clone(counter))
	}
}

impl Drop for OpenGuard {
	fn drop(&mut self) {
		let _ = self.0.fetch_sub(1, Ordering::Relaxed);
	}
}

/// A transport-level byte stream, either plain TCP or TLS over TCP.
#[derive(Debug)]
pub(crate) enum Stream {
	Plain(TcpStream),
	#[cfg(feature = "tls")]
	Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for Stream {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut tokio::io::ReadBuf<'_>,
	) -> Poll<Result<()>> {
		match self.get_mut() {
			Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
			#[cfg(feature = "tls")]
			Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
		}
	}
}

impl tokio::io::AsyncWrite for Stream {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
		match self.get_mut() {
			Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
			#[cfg(feature = "tls")]
			Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		match self.get_mut() {
			Self::Plain(s) => Pin::new(s).poll_flush(cx),
			#[cfg(feature = "tls")]
			Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
		}
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		match self.get_mut() {
			Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
			#[cfg(feature = "tls")]
			Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
		}
	}
}

/// A connection to one destination, buffered in both directions.
///
/// A connection is owned by exactly one party at a time: the pool while idle, or the request and
/// then the response body while in use. Dropping it closes the socket.
#[derive(Debug)]
pub(crate) struct Connection {
	id: u64,
	key: PoolKey,
	io: BufReader<BufWriter<Stream>>,
	state: State,
	idle_since: Instant,
	requests: u64,
	_open: OpenGuard,
}

impl Connection {
	pub(crate) fn new(id: u64, key: PoolKey, stream: Stream, open: OpenGuard) -> Self {
		Self {
			id,
			key,
			io: BufReader::new(BufWriter::new(stream)),
			state: State::InUse,
			idle_since: Instant::now(),
			requests: 0,
			_open: open,
		}
	}

	/// Returns the identifier, unique within the process.
	#[must_use]
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Returns the key this connection is pooled under.
	#[must_use]
	pub fn key(&self) -> &PoolKey {
		&self.key
	}

	/// Returns the current state.
	#[must_use]
	pub fn state(&self) -> State {
		self.state
	}

	pub(crate) fn set_state(&mut self, state: State) {
		self.state = state;
		if state == State::Idle {
			self.idle_since = Instant::now();
		}
	}

	/// How long the connection has been sitting idle, as of `now`.
	pub(crate) fn idle_for(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.idle_since)
	}

	/// Records the start of a request, returning whether an earlier request used the connection.
	pub(crate) fn begin_request(&mut self) -> bool {
		self.requests += 1;
		self.requests > 1
	}

	/// The number of received bytes sitting in the read buffer, not yet consumed.
	pub(crate) fn buffered_len(&self) -> usize {
		self.io.buffer().len()
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		tracing::trace!(id = self.id, key = %self.key, state = ?self.state(), "connection closed");
	}
}

impl futures_io::AsyncRead for Connection {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let mut read_buf = tokio::io::ReadBuf::new(buf);
		ready!(Pin::new(&mut self.io).poll_read(cx, &mut read_buf))?;
		Ok(read_buf.filled().len()).into()
	}
}

impl futures_io::AsyncBufRead for Connection {
	fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<&[u8]>> {
		Pin::new(&mut self.get_mut().io).poll_fill_buf(cx)
	}

	fn consume(mut self: Pin<&mut Self>, amt: usize) {
		Pin::new(&mut self.io).consume(amt);
	}
}

impl futures_io::AsyncWrite for Connection {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<Result<usize>> {
		Pin::new(&mut self.io).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		Pin::new(&mut self.io).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		Pin::new(&mut self.io).poll_shutdown(cx)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn key(url: &str) -> std::result::Result<PoolKey, TransportError> {
		PoolKey::from_url(&url.parse().unwrap())
	}

	/// Tests deriving keys from URLs.
	#[test]
	fn test_from_url() {
		let k = key("http://Example.COM/path?q=1").unwrap();
		assert_eq!(k, PoolKey::new(Scheme::Http, "example.com", 80));
		assert_eq!(k.authority(), "example.com");
		assert_eq!(k.to_string(), "http://example.com:80");

		let k = key("https://example.com:8443/").unwrap();
		assert_eq!(k.scheme(), Scheme::Https);
		assert_eq!(k.port(), 8443);
		assert_eq!(k.authority(), "example.com:8443");

		let k = key("http://[::1]:8080/").unwrap();
		assert_eq!(k.host(), "[::1]");
		assert_eq!(k.bare_host(), "::1");
	}

	/// Tests that keys differing only in port or scheme differ.
	#[test]
	fn test_distinct_keys() {
		assert_ne!(key("http://a/").unwrap(), key("http://a:81/").unwrap());
		assert_ne!(key("http://a:443/").unwrap(), key("https://a/").unwrap());
		assert_eq!(key("http://a/").unwrap(), key("http://A:80/x").unwrap());
	}

	/// Tests that other schemes are refused.
	#[test]
	fn test_unsupported() {
		assert!(matches!(key("ftp://example.com/"), Err(TransportError::UnsupportedUrl(_))));
		assert!(matches!(key("file:///tmp/x"), Err(TransportError::UnsupportedUrl(_))));
	}

	/// Tests the open-connection counter.
	#[test]
	fn test_open_guard() {
		let counter = Arc::new(AtomicUsize::new(0));
		let a = OpenGuard::new(&counter);
		let b = OpenGuard::new(&counter);
		assert_eq!(counter.load(Ordering::Relaxed), 2);
		drop(a);
		assert_eq!(counter.load(Ordering::Relaxed), 1);
		drop(b);
		assert_eq!(counter.load(Ordering::Relaxed), 0);
	}
}
