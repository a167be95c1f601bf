use crate::request::body::Send;
use crate::request::Metadata;
use futures_io::AsyncWrite;

/// Sends an HTTP request line and request headers.
///
/// The `method` parameter holds the method for the request (e.g. `GET`, `POST`, or `DELETE`). The
/// `request_target` parameter holds the “request target”, which is the path and query string of
/// the URL. The `headers` parameter holds the request headers to send, in order. The `socket`
/// parameter is the connection over which the request will be sent; it should provide write
/// buffering for good performance.
///
/// The framing of the body that follows is decided from `headers`: a `Transfer-Encoding` header
/// selects chunked encoding, otherwise a `Content-Length` header gives the length, and otherwise
/// the body is empty. The returned [`Send`] writes the body in that framing.
///
/// This function does not flush the socket.
///
/// # Errors
/// This function returns an error if writing to `socket` fails.
///
/// # Panics
/// This function panics under any of the following conditions, in a debug build:
/// * if the request method is `CONNECT` (this method is not supported) or not a valid token
/// * if the request target contains bytes outside the range 0x21 to 0x7E
/// * if the `Transfer-Encoding` header is present and is set to any value other than `chunked`
/// * if the `Content-Length` header is present and is not a non-negative 64-bit integer
/// * if more than one of `Transfer-Encoding` and `Content-Length` headers is present
/// * if any header name is not a valid token or any header value is not a valid field value
///
/// The word “token” refers to the `token` production in the HTTP RFC, namely a string that
/// comprises only digits, letters, and the characters ```!#$%&'*+-.^_`|~```, and is at least one
/// character long.
pub async fn send<'socket, Socket: AsyncWrite + Unpin + ?Sized>(
	method: &str,
	request_target: &str,
	headers: &[(String, Vec<u8>)],
	socket: &'socket mut Socket,
) -> std::io::Result<Send<'socket, Socket>> {
	use crate::util::io::AsyncWriteExt as _;
	use crate::util::is_token;

	debug_assert!(is_token(method), "Request method {method} is not a token");
	debug_assert!(
		method != "CONNECT",
		"Request method CONNECT is not supported"
	);
	debug_assert!(
		crate::util::is_request_target(request_target),
		"Request target contains invalid characters"
	);
	for (name, value) in headers {
		debug_assert!(is_token(name), "Request header {name} is not a token");
		debug_assert!(
			crate::util::is_field_value(value),
			"Request header value {value:?} is not a valid field value"
		);
		if name.eq_ignore_ascii_case("Transfer-Encoding") {
			debug_assert!(
				value == b"chunked",
				"Request Transfer-Encoding is {value:?}, but only chunked is supported"
			);
		} else if name.eq_ignore_ascii_case("Content-Length") {
			debug_assert!(
				parse_length(value).is_some(),
				"Request Content-Length {value:?} is not a non-negative integer"
			);
		}
	}
	debug_assert!(
		headers
			.iter()
			.filter(|(n, _)| n.eq_ignore_ascii_case("content-length")
				|| n.eq_ignore_ascii_case("transfer-encoding"))
			.count() <= 1,
		"Request must contain at most one of Content-Length and Transfer-Encoding"
	);

	// Request line.
	socket.write_all(method.as_bytes()).await?;
	socket.write_all(b" ").await?;
	socket.write_all(request_target.as_bytes()).await?;
	socket.write_all(b" HTTP/1.1\r\n").await?;

	for (name, value) in headers {
		socket.write_all(name.as_bytes()).await?;
		socket.write_all(b": ").await?;
		socket.write_all(value).await?;
		socket.write_all(b"\r\n").await?;
	}
	socket.write_all(b"\r\n").await?;

	let metadata = Metadata {
		head: method == "HEAD",
		connection_close: crate::util::is_connection_close(crate::util::borrowed(headers)),
	};
	if crate::util::find_header(headers, "Transfer-Encoding").is_some() {
		Ok(Send::new_chunked(socket, metadata))
	} else {
		let length = crate::util::find_header(headers, "Content-Length")
			.and_then(parse_length)
			.unwrap_or(0);
		Ok(Send::new_fixed(socket, metadata, length))
	}
}

/// Parses a request `Content-Length` value.
pub fn parse_length(value: &[u8]) -> Option<u64> {
	std::str::from_utf8(value).ok()?.parse().ok()
}

#[cfg(test)]
mod test {
	use super::*;
	use futures_executor::block_on;

	fn headers(pairs: &[(&str, &str)]) -> Vec<(String, Vec<u8>)> {
		pairs
			.iter()
			.map(|(n, v)| ((*n).to_owned(), v.as_bytes().to_vec()))
			.collect()
	}

	/// Tests sending some basic headers, with neither Content-Length nor Transfer-Encoding.
	#[test]
	fn test_basic() {
		let headers = headers(&[
			("User-Agent", "Thingy/1.0 OtherThing/2.0"),
			("Host", "someplace.example.com"),
		]);
		let mut sink: Vec<u8> = Vec::new();
		let body = block_on(send("GET", "/abcd/efgh?x=1", &headers, &mut sink)).unwrap();
		assert_eq!(
			block_on(body.finish()).unwrap(),
			Metadata {
				head: false,
				connection_close: false
			}
		);
		assert_eq!(
			sink,
			&b"GET /abcd/efgh?x=1 HTTP/1.1\r\n\
				User-Agent: Thingy/1.0 OtherThing/2.0\r\n\
				Host: someplace.example.com\r\n\r\n"[..]
		);
	}

	/// Tests that a Content-Length header selects a fixed-length body.
	#[test]
	fn test_content_length() {
		use crate::util::io::AsyncWriteExt as _;
		let headers = headers(&[("Host", "h"), ("Content-Length", "5")]);
		let mut sink: Vec<u8> = Vec::new();
		block_on(async {
			let mut body = send("POST", "/", &headers, &mut sink).await.unwrap();
			body.write_all(b"hello").await.unwrap();
			body.finish().await.unwrap();
		});
		assert_eq!(sink, &b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello"[..]);
	}

	/// Tests that a Transfer-Encoding header selects a chunked body.
	#[test]
	fn test_transfer_encoding() {
		use crate::util::io::AsyncWriteExt as _;
		let headers = headers(&[("Transfer-Encoding", "chunked")]);
		let mut sink: Vec<u8> = Vec::new();
		block_on(async {
			let mut body = send("PUT", "/x", &headers, &mut sink).await.unwrap();
			body.write_all(b"abc").await.unwrap();
			body.finish().await.unwrap();
		});
		assert_eq!(
			sink,
			&b"PUT /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n"[..]
		);
	}

	/// Tests the metadata captured for HEAD requests and for `Connection: close`.
	#[test]
	fn test_metadata() {
		let headers = headers(&[("Connection", "close")]);
		let mut sink: Vec<u8> = Vec::new();
		let metadata = block_on(async {
			send("HEAD", "/", &headers, &mut sink)
				.await
				.unwrap()
				.finish()
				.await
				.unwrap()
		});
		assert!(metadata.head);
		assert!(metadata.connection_close);
	}
}
