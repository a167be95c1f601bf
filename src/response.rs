pub(crate) mod body;
pub(crate) mod head;

use crate::request::Extensions;
use std::fmt::{Display, Formatter};

/// The HTTP version of a response.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HttpVersion {
	/// HTTP/1.0.
	Http10,

	/// HTTP/1.1.
	Http11,
}

impl Display for HttpVersion {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Http10 => "HTTP/1.0",
			Self::Http11 => "HTTP/1.1",
		})
	}
}

/// Which pooled connection carried a response.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
	/// The connection’s identifier, unique within the process.
	pub id: u64,

	/// Whether the connection had already carried an earlier request.
	pub reused: bool,
}

/// A response received through a transport.
///
/// The body is a live handle onto the connection. Reading it consumes bytes from the socket.
#[derive(Debug)]
pub struct Response<B> {
	/// The status code.
	pub status: u16,

	/// The HTTP version the server replied with.
	pub version: HttpVersion,

	/// The reason phrase.
	pub reason: String,

	/// The response headers, in the order they were received.
	pub headers: Vec<(String, Vec<u8>)>,

	/// The extensions of the request that produced this response.
	pub extensions: Extensions,

	/// The connection that carried the exchange.
	pub connection: ConnectionInfo,

	/// The body handle.
	pub body: B,
}

impl<B> Response<B> {
	/// Returns the value of the first header named `name`, compared case-insensitively.
	#[must_use]
	pub fn header(&self, name: &str) -> Option<&[u8]> {
		crate::util::find_header(&self.headers, name)
	}

	/// Replaces the body, keeping everything else.
	pub fn map_body<C>(self, f: impl FnOnce(B) -> C) -> Response<C> {
		Response {
			status: self.status,
			version: self.version,
			reason: self.reason,
			headers: self.headers,
			extensions: self.extensions,
			connection: self.connection,
			body: f(self.body),
		}
	}
}
