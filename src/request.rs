mod body;
pub(crate) mod head;

use bytes::Bytes;
use futures_core::Stream;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::time::Duration;

/// Free-form per-request metadata, carried through to the response unchanged.
///
/// The only key the engine itself interprets is `"timeout"`: a positive number of seconds that
/// replaces the configured read timeout for this request and for reads of its response body.
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// A lazily produced request body.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

/// The body of a request.
pub enum RequestBody {
	/// No body at all.
	Empty,

	/// A body whose bytes are all known up front. It is sent with a `Content-Length` header.
	Full(Bytes),

	/// A body produced one piece at a time.
	///
	/// Unless the request carries its own `Content-Length` header, each item becomes one HTTP chunk
	/// and the body is sent with `Transfer-Encoding: chunked`.
	Stream(BodyStream),
}

impl RequestBody {
	/// Builds a streamed body from any stream of byte chunks.
	pub fn from_stream<S>(stream: S) -> Self
	where
		S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
	{
		Self::Stream(Box::pin(stream))
	}

	/// Builds a streamed body from a synchronous iterator of chunks.
	pub fn from_chunks<I>(chunks: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<Bytes>,
		I::IntoIter: Send + 'static,
	{
		use futures_util::StreamExt as _;
		Self::from_stream(futures_util::stream::iter(chunks).map(|chunk| Ok(chunk.into())))
	}

	/// Returns the length of the body, if it is known without consuming it.
	#[must_use]
	pub fn known_length(&self) -> Option<u64> {
		match self {
			Self::Empty => Some(0),
			Self::Full(bytes) => Some(bytes.len() as u64),
			Self::Stream(_) => None,
		}
	}
}

impl Default for RequestBody {
	fn default() -> Self {
		Self::Empty
	}
}

impl Debug for RequestBody {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Empty => f.write_str("Empty"),
			Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
			Self::Stream(_) => f.write_str("Stream(..)"),
		}
	}
}

impl From<Bytes> for RequestBody {
	fn from(bytes: Bytes) -> Self {
		Self::Full(bytes)
	}
}

impl From<Vec<u8>> for RequestBody {
	fn from(bytes: Vec<u8>) -> Self {
		Self::Full(bytes.into())
	}
}

impl From<String> for RequestBody {
	fn from(text: String) -> Self {
		Self::Full(text.into())
	}
}

impl From<&'static str> for RequestBody {
	fn from(text: &'static str) -> Self {
		Self::Full(Bytes::from_static(text.as_bytes()))
	}
}

impl From<&'static [u8]> for RequestBody {
	fn from(bytes: &'static [u8]) -> Self {
		Self::Full(Bytes::from_static(bytes))
	}
}

/// A request to be sent through a transport.
///
/// Headers are kept in the order they were added and duplicates are allowed. The engine adds
/// `Host`, `User-Agent`, and the body framing headers when they are needed.
///
/// ```
/// use httpx_transport::Request;
///
/// let url = "http://example.com/upload".parse().unwrap();
/// let request = Request::new("POST", url)
/// 	.header("Content-Type", "text/plain")
/// 	.body("hello")
/// 	.extension("timeout", 2.5);
/// assert_eq!(request.method(), "POST");
/// assert_eq!(request.headers().len(), 1);
/// ```
#[derive(Debug)]
pub struct Request {
	method: String,
	url: url::Url,
	headers: Vec<(String, Vec<u8>)>,
	body: RequestBody,
	extensions: Extensions,
}

impl Request {
	/// Creates a request with no headers and no body.
	pub fn new(method: impl Into<String>, url: url::Url) -> Self {
		Self {
			method: method.into(),
			url,
			headers: Vec::new(),
			body: RequestBody::Empty,
			extensions: Extensions::new(),
		}
	}

	/// Appends a header.
	#[must_use]
	pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	/// Sets the body.
	#[must_use]
	pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
		self.body = body.into();
		self
	}

	/// Sets an extension value.
	#[must_use]
	pub fn extension(
		mut self,
		key: impl Into<String>,
		value: impl Into<serde_json::Value>,
	) -> Self {
		let _ = self.extensions.insert(key.into(), value.into());
		self
	}

	/// Replaces the whole extension map.
	#[must_use]
	pub fn extensions(mut self, extensions: Extensions) -> Self {
		self.extensions = extensions;
		self
	}

	/// Returns the method.
	#[must_use]
	pub fn method(&self) -> &str {
		&self.method
	}

	/// Returns the target URL.
	#[must_use]
	pub fn url(&self) -> &url::Url {
		&self.url
	}

	/// Returns the headers in the order they were added.
	#[must_use]
	pub fn headers(&self) -> &[(String, Vec<u8>)] {
		&self.headers
	}

	/// Returns the extension map.
	#[must_use]
	pub fn extension_map(&self) -> &Extensions {
		&self.extensions
	}

	/// Returns the per-request timeout carried in the `"timeout"` extension, if any.
	///
	/// A value too large to represent is treated as no limit at all.
	#[must_use]
	pub fn timeout(&self) -> Option<Duration> {
		let seconds = self.extensions.get("timeout")?.as_f64()?;
		if seconds > 0.0 {
			Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
		} else {
			None
		}
	}

	pub(crate) fn into_parts(self) -> Parts {
		Parts {
			method: self.method,
			url: self.url,
			headers: self.headers,
			body: self.body,
			extensions: self.extensions,
		}
	}
}

/// A request taken apart for execution.
pub(crate) struct Parts {
	pub method: String,
	pub url: url::Url,
	pub headers: Vec<(String, Vec<u8>)>,
	pub body: RequestBody,
	pub extensions: Extensions,
}

/// Metadata about a request.
///
/// Certain information about a request is needed in order to properly process the corresponding
/// response. It is captured when the request head is written and handed to the response parser.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Metadata {
	/// Whether the method was `HEAD`.
	pub head: bool,

	/// Whether there was a `Connection` header with the value `close`.
	pub connection_close: bool,
}

#[cfg(test)]
mod test {
	use super::*;

	fn url() -> url::Url {
		"http://example.com/".parse().unwrap()
	}

	/// Tests reading the per-request timeout extension.
	#[test]
	fn test_timeout_extension() {
		assert_eq!(Request::new("GET", url()).timeout(), None);
		let request = Request::new("GET", url()).extension("timeout", 1.5);
		assert_eq!(request.timeout(), Some(Duration::from_millis(1500)));
		let request = Request::new("GET", url()).extension("timeout", 0);
		assert_eq!(request.timeout(), None);
		let request = Request::new("GET", url()).extension("timeout", "soon");
		assert_eq!(request.timeout(), None);
		for huge in [1e300, f64::MAX] {
			let request = Request::new("GET", url()).extension("timeout", huge);
			assert_eq!(request.timeout(), Some(Duration::MAX));
		}
	}

	/// Tests the known lengths of the different body kinds.
	#[test]
	fn test_known_length() {
		assert_eq!(RequestBody::Empty.known_length(), Some(0));
		assert_eq!(RequestBody::from("hello").known_length(), Some(5));
		assert_eq!(RequestBody::from_chunks(vec!["a", "b"]).known_length(), None);
	}

	/// Tests that headers keep their order and duplicates.
	#[test]
	fn test_header_order() {
		let request = Request::new("GET", url())
			.header("Accept", "text/html")
			.header("X-Dup", "1")
			.header("x-dup", "2");
		let names: Vec<&str> = request.headers().iter().map(|(n, _)| n.as_str()).collect();
		assert_eq!(names, ["Accept", "X-Dup", "x-dup"]);
	}
}
