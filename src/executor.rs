//! Carrying one request over one connection.
//!
//! The executor writes the request line, headers, and body, flushes, and reads the response head.
//! It never reads the body; that is left to the body handle, which owns the connection afterward.

use crate::connection::{Connection, PoolKey};
use crate::error::{Phase, TransportError};
use crate::request::{head, RequestBody};
use crate::response::head::{Framing, Head};
use crate::transport::Engine;
use crate::util::find_header;
use crate::util::io::AsyncWriteExt as _;
use futures_util::StreamExt as _;
use std::time::Duration;

/// Methods that get an explicit `Content-Length: 0` when sent without a body.
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// A request ready to go on the wire.
#[derive(Debug)]
pub(crate) struct Outgoing {
	pub method: String,
	pub target: String,
	pub headers: Vec<(String, Vec<u8>)>,
	pub body: RequestBody,
}

impl Outgoing {
	/// Builds the header list actually sent: the caller’s headers minus any framing headers that
	/// disagree with the body, plus `Host`, `User-Agent`, and the body framing header.
	pub(crate) fn new(
		method: String,
		url: &url::Url,
		mut headers: Vec<(String, Vec<u8>)>,
		body: RequestBody,
		key: &PoolKey,
		user_agent: Option<&str>,
	) -> Self {
		let caller_length = find_header(&headers, "Content-Length").and_then(head::parse_length);
		headers.retain(|(name, _)| {
			!name.eq_ignore_ascii_case("Content-Length")
				&& !name.eq_ignore_ascii_case("Transfer-Encoding")
		});
		match &body {
			RequestBody::Empty => {
				if BODY_METHODS.contains(&method.as_str()) {
					headers.push(("Content-Length".to_owned(), b"0".to_vec()));
				}
			}
			RequestBody::Full(bytes) => {
				headers.push(("Content-Length".to_owned(), bytes.len().to_string().into_bytes()));
			}
			RequestBody::Stream(_) => match caller_length {
				Some(length) => {
					headers.push(("Content-Length".to_owned(), length.to_string().into_bytes()));
				}
				None => headers.push(("Transfer-Encoding".to_owned(), b"chunked".to_vec())),
			},
		}
		if find_header(&headers, "Host").is_none() {
			headers.insert(0, ("Host".to_owned(), key.authority().into_bytes()));
		}
		if let Some(user_agent) = user_agent {
			if find_header(&headers, "User-Agent").is_none() {
				headers.push(("User-Agent".to_owned(), user_agent.as_bytes().to_vec()));
			}
		}
		let target = url[url::Position::BeforePath..url::Position::AfterQuery].to_owned();
		Self {
			method,
			target,
			headers,
			body,
		}
	}
}

/// Sends `request` on `connection` and reads the response head.
///
/// Every network operation is bounded by `stall`. On error the connection is in an unknown state
/// and must be evicted by the caller.
pub(crate) async fn execute(
	engine: &Engine,
	connection: &mut Connection,
	request: Outgoing,
	stall: Option<Duration>,
) -> Result<(Head, Framing), TransportError> {
	let Outgoing {
		method,
		target,
		headers,
		body,
	} = request;

	let mut send = engine
		.run_io(
			Phase::Write,
			stall,
			head::send(&method, &target, &headers, &mut *connection),
		)
		.await?;
	match body {
		RequestBody::Empty => (),
		RequestBody::Full(bytes) => {
			engine.run_io(Phase::Write, stall, send.write_all(&bytes)).await?;
		}
		RequestBody::Stream(mut stream) => {
			// The producer is not the network, so only the forced abort bounds it.
			while let Some(chunk) = engine.abortable(async { Ok(stream.next().await) }).await? {
				let chunk = chunk?;
				if chunk.is_empty() {
					continue;
				}
				send.hint_length(chunk.len() as u64);
				engine.run_io(Phase::Write, stall, send.write_all(&chunk)).await?;
			}
		}
	}
	let metadata = engine.run_io(Phase::Write, stall, send.finish()).await?;
	engine.run_io(Phase::Write, stall, connection.flush()).await?;
	tracing::trace!(id = connection.id(), %method, %target, "request sent");

	let config = engine.config();
	let (head, framing) = engine
		.run_io(
			Phase::Read,
			stall,
			crate::response::head::receive(
				&mut *connection,
				config.max_response_header_bytes,
				config.max_response_headers,
				metadata,
			),
		)
		.await?;
	tracing::trace!(id = connection.id(), status = head.status, ?framing, "response head received");
	Ok((head, framing))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::connection::Scheme;

	fn outgoing(method: &str, url: &str, headers: &[(&str, &str)], body: RequestBody) -> Outgoing {
		let url: url::Url = url.parse().unwrap();
		let key = PoolKey::from_url(&url).unwrap();
		let headers = headers
			.iter()
			.map(|(n, v)| ((*n).to_owned(), v.as_bytes().to_vec()))
			.collect();
		Outgoing::new(method.to_owned(), &url, headers, body, &key, Some("test-agent"))
	}

	fn names(outgoing: &Outgoing) -> Vec<&str> {
		outgoing.headers.iter().map(|(n, _)| n.as_str()).collect()
	}

	/// Tests the headers added to a plain GET.
	#[test]
	fn test_get_defaults() {
		let o = outgoing(
			"GET",
			"http://Example.com:8080/a/b?c=d#frag",
			&[("Accept", "*/*")],
			RequestBody::Empty,
		);
		assert_eq!(o.target, "/a/b?c=d");
		assert_eq!(names(&o), ["Host", "Accept", "User-Agent"]);
		assert_eq!(find_header(&o.headers, "host"), Some(&b"example.com:8080"[..]));
	}

	/// Tests that caller-supplied Host and User-Agent are kept.
	#[test]
	fn test_caller_host_kept() {
		let o = outgoing(
			"GET",
			"http://example.com/",
			&[("host", "other"), ("user-agent", "mine")],
			RequestBody::Empty,
		);
		assert_eq!(names(&o), ["host", "user-agent"]);
		let key = PoolKey::new(Scheme::Http, "example.com", 80);
		let o = Outgoing::new(
			"GET".to_owned(),
			&"http://example.com/".parse().unwrap(),
			Vec::new(),
			RequestBody::Empty,
			&key,
			None,
		);
		assert_eq!(names(&o), ["Host"]);
	}

	/// Tests framing headers for the different body kinds.
	#[test]
	fn test_framing_headers() {
		let o = outgoing("POST", "http://h/", &[], RequestBody::Empty);
		assert_eq!(find_header(&o.headers, "content-length"), Some(&b"0"[..]));

		let o = outgoing("DELETE", "http://h/", &[], RequestBody::Empty);
		assert_eq!(find_header(&o.headers, "content-length"), None);

		let o = outgoing(
			"PUT",
			"http://h/",
			&[("Content-Length", "99"), ("Transfer-Encoding", "chunked")],
			"hello".into(),
		);
		assert_eq!(find_header(&o.headers, "content-length"), Some(&b"5"[..]));
		assert_eq!(find_header(&o.headers, "transfer-encoding"), None);

		let o = outgoing("POST", "http://h/", &[], RequestBody::from_chunks(vec!["a"]));
		assert_eq!(find_header(&o.headers, "transfer-encoding"), Some(&b"chunked"[..]));
		assert_eq!(find_header(&o.headers, "content-length"), None);

		let abc = RequestBody::from_chunks(vec!["abc"]);
		let o = outgoing("POST", "http://h/", &[("content-length", " 3 ")], abc);
		assert_eq!(find_header(&o.headers, "content-length"), None);
		assert_eq!(find_header(&o.headers, "transfer-encoding"), Some(&b"chunked"[..]));

		let abc = RequestBody::from_chunks(vec!["abc"]);
		let o = outgoing("POST", "http://h/", &[("content-length", "3")], abc);
		assert_eq!(find_header(&o.headers, "content-length"), Some(&b"3"[..]));
		assert_eq!(find_header(&o.headers, "transfer-encoding"), None);
	}
}
