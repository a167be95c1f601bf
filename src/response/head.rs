use crate::error::{BadContentLength, ProtocolError};
use crate::request::Metadata;
use crate::response::HttpVersion;
use futures_io::AsyncBufRead;
use std::io::Result;

/// An HTTP status line and response headers, copied out of the receive buffer.
#[derive(Debug, Eq, PartialEq)]
pub struct Head {
	/// The HTTP version.
	pub version: HttpVersion,

	/// The status code.
	pub status: u16,

	/// The reason phrase.
	pub reason: String,

	/// The response headers.
	pub headers: Vec<(String, Vec<u8>)>,
}

/// How the length of a response body is determined.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Length {
	/// Exactly this many bytes follow the head.
	Fixed(u64),

	/// The body uses chunked transfer coding.
	Chunked,

	/// The body runs until the server closes the connection.
	Eof,
}

/// The framing of a response body, decided from the response head and the request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Framing {
	/// How the body ends.
	pub length: Length,

	/// Whether the connection may carry another request once the body has been fully read.
	pub persistent: bool,
}

/// Receives an HTTP status line and response headers.
///
/// The `socket` parameter is the connection over which the response arrives. The head may occupy
/// at most `max_bytes` bytes and contain at most `max_headers` headers. The `metadata` parameter
/// is the value produced when the request body was finished.
///
/// Informational (1xx) responses are skipped. On return, `socket` is positioned at the first byte
/// of the body.
///
/// # Errors
/// This function returns an error if reading from `socket` fails, or of kind
/// [`UnexpectedEof`](std::io::ErrorKind::UnexpectedEof) if the socket closes before the head is
/// complete.
///
/// This function returns an error of kind [`InvalidData`](std::io::ErrorKind::InvalidData)
/// carrying a [`ProtocolError`] under the following conditions:
/// * if the response status line or headers are malformed
/// * if the head is longer than `max_bytes` or has more than `max_headers` headers
/// * if the server sent a status code 101 Switching Protocols
/// * if the body framing headers are invalid (see [`framing`])
pub async fn receive<Socket: AsyncBufRead + Unpin + ?Sized>(
	socket: &mut Socket,
	max_bytes: usize,
	max_headers: usize,
	metadata: Metadata,
) -> Result<(Head, Framing)> {
	use crate::util::io::AsyncBufReadExt as _;

	let mut buffer: Vec<u8> = Vec::new();
	loop {
		buffer.clear();

		// Copy bytes out of the socket until the buffer ends with two consecutive [CR]LFs. Only
		// the head is consumed, so any body bytes stay buffered in the socket.
		loop {
			let headers_done = socket
				.read_buf(|bytes: &[u8]| -> (usize, Result<bool>) {
					if bytes.is_empty() {
						return (0, Err(std::io::ErrorKind::UnexpectedEof.into()));
					}
					let already = buffer.len();
					let to_copy = std::cmp::min(max_bytes - already, bytes.len());
					buffer.extend_from_slice(&bytes[..to_copy]);
					if let Some(n) = headers_length(&buffer) {
						buffer.truncate(n);
						(n - already, Ok(true))
					} else {
						(to_copy, Ok(false))
					}
				})
				.await??;
			if headers_done {
				break;
			}
			if buffer.len() >= max_bytes {
				return Err(ProtocolError::ResponseHeadersTooLong.into());
			}
		}

		let status_code = parse_status_code(&buffer)?;
		if status_code == 101 {
			return Err(ProtocolError::SwitchingProtocols.into());
		}
		if !(100..=199).contains(&status_code) {
			break;
		}
		tracing::trace!(status = status_code, "skipping informational response");
	}

	let head = parse_head(&buffer, max_headers)?;
	let framing = framing(&head, metadata)?;
	Ok((head, framing))
}

/// Parses a complete head into owned form.
fn parse_head(buffer: &[u8], max_headers: usize) -> Result<Head> {
	let mut storage = vec![httparse::EMPTY_HEADER; max_headers];
	let mut resp = httparse::Response::new(&mut storage);
	match resp.parse(buffer).map_err(ProtocolError::from)? {
		// We thought the head was complete but httparse disagrees on where it ends, which means
		// the newlines are malformed.
		httparse::Status::Complete(n) if n == buffer.len() => (),
		httparse::Status::Complete(_) | httparse::Status::Partial => {
			return Err(ProtocolError::from(httparse::Error::NewLine).into());
		}
	}
	let version = match resp.version {
		Some(0) => HttpVersion::Http10,
		Some(1) => HttpVersion::Http11,
		_ => return Err(ProtocolError::from(httparse::Error::Version).into()),
	};
	let status = resp
		.code
		.ok_or(ProtocolError::ParseHeaders(httparse::Error::Status))?;
	Ok(Head {
		version,
		status,
		reason: resp.reason.unwrap_or_default().to_owned(),
		headers: resp
			.headers
			.iter()
			.map(|h| (h.name.to_owned(), h.value.to_vec()))
			.collect(),
	})
}

/// Decides how the body of a response is framed and whether the connection can persist.
///
/// # Errors
/// This function returns an error of kind [`InvalidData`](std::io::ErrorKind::InvalidData) under
/// the following conditions:
/// * if multiple `Content-Length` headers are present, or one is not a valid `u64`
/// * if the `Content-Length` and `Transfer-Encoding` headers are both present
/// * if multiple `Transfer-Encoding` headers are present, or one names anything but `chunked`
pub fn framing(head: &Head, metadata: Metadata) -> Result<Framing> {
	let content_length = get_content_length(&head.headers)?;
	let chunked = is_chunked(&head.headers)?;

	// A server MUST NOT send a Content-Length header field in any message that contains a
	// Transfer-Encoding header field.
	if content_length.is_some() && chunked {
		return Err(ProtocolError::ContentLengthAndTransferEncoding.into());
	}

	let mut persistent = head.version == HttpVersion::Http11
		&& !metadata.connection_close
		&& !crate::util::is_connection_close(crate::util::borrowed(&head.headers));

	// A 204 is never followed by a body. If the server nevertheless announced one, whatever it
	// sends next cannot be trusted to be the start of another response.
	if head.status == 204 && (chunked || content_length.unwrap_or(0) != 0) {
		persistent = false;
	}

	let length = if metadata.head
		|| (100..=199).contains(&head.status)
		|| head.status == 204
		|| head.status == 304
	{
		// Any response to a HEAD request and any response with a 1xx, 204, or 304 status code
		// ends at the blank line after the headers.
		Length::Fixed(0)
	} else if chunked {
		Length::Chunked
	} else if let Some(n) = content_length {
		Length::Fixed(n)
	} else {
		// No declared length: the body runs until the server closes the connection.
		persistent = false;
		Length::Eof
	};
	Ok(Framing { length, persistent })
}

/// Scans the headers and decodes the `Content-Length` header, if any.
fn get_content_length(headers: &[(String, Vec<u8>)]) -> Result<Option<u64>> {
	let mut ret = None;
	for (_, value) in headers
		.iter()
		.filter(|(name, _)| name.eq_ignore_ascii_case("content-length"))
	{
		if ret.is_some() {
			return Err(ProtocolError::MultipleContentLengths.into());
		}
		let value = std::str::from_utf8(value).map_err(BadContentLength::NotUtf8)?;
		let value = value.trim().parse::<u64>().map_err(BadContentLength::NotU64)?;
		ret = Some(value);
	}
	Ok(ret)
}

/// Scans the buffer and determines the length of the HTTP head.
///
/// If the whole head has been received, returns `Some(n)` where `n` is its length in bytes,
/// including the final [CR]LF[CR]LF.
fn headers_length(buffer: &[u8]) -> Option<usize> {
	// position() returns the distance from where that particular call started, so the offsets
	// are accumulated by hand.
	let mut start_pos = 0;
	let mut iter = buffer.iter();
	while let Some(dist) = iter.position(|&b| b == b'\n' || b == b'\r') {
		let eol_pos = start_pos + dist;
		for candidate in [&b"\r\n\r\n"[..], &b"\r\n\n"[..], &b"\n\r\n"[..], &b"\n\n"[..]] {
			if buffer[eol_pos..].starts_with(candidate) {
				return Some(eol_pos + candidate.len());
			}
		}
		start_pos = eol_pos + 1;
	}
	None
}

/// Scans the headers and determines whether the body uses chunked transfer coding.
fn is_chunked(headers: &[(String, Vec<u8>)]) -> Result<bool> {
	let mut ret = false;
	for (_, value) in headers
		.iter()
		.filter(|(name, _)| name.eq_ignore_ascii_case("transfer-encoding"))
	{
		if ret {
			return Err(ProtocolError::MultipleTransferEncodings.into());
		}
		if crate::util::trim_ows(value).eq_ignore_ascii_case(b"chunked") {
			ret = true;
		} else {
			return Err(ProtocolError::NotChunked.into());
		}
	}
	Ok(ret)
}

/// Extracts the HTTP status code from a complete head.
fn parse_status_code(buf: &[u8]) -> Result<u16> {
	// A zero-length headers array makes httparse stop with TooManyHeaders right after the status
	// line, which is all that is needed here.
	let mut headers = [];
	let mut resp = httparse::Response::new(&mut headers);
	match resp.parse(buf) {
		Ok(httparse::Status::Partial) => Err(ProtocolError::from(httparse::Error::NewLine).into()),
		Ok(httparse::Status::Complete(_)) | Err(httparse::Error::TooManyHeaders) => Ok(resp
			.code
			.ok_or(ProtocolError::ParseHeaders(httparse::Error::Status))?),
		Err(e) => Err(ProtocolError::from(e).into()),
	}
}
