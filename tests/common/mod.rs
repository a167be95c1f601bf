//! A scripted HTTP/1.1 server on plain threads.

#![allow(dead_code)]

use std::io::{BufRead as _, BufReader, Read as _, Write as _};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request as the server saw it.
#[derive(Clone, Debug)]
pub struct Recorded {
	/// The request line.
	pub line: String,

	/// The headers, names lowercased.
	pub headers: Vec<(String, String)>,

	/// The decoded body.
	pub body: Vec<u8>,

	/// Which accepted connection carried it, counting from zero.
	pub connection: usize,
}

impl Recorded {
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(n, _)| n == name)
			.map(|(_, v)| v.as_str())
	}
}

/// What the server does after writing a reply.
#[derive(Clone, Copy, Debug)]
pub enum After {
	/// Wait for the next request on the same connection.
	Keep,

	/// Close the connection.
	Close,

	/// Wait this long, then close the connection.
	Stall(Duration),
}

/// One step of a reply: bytes to write, then a pause.
pub type Part = (Vec<u8>, Duration);

/// A running server.
pub struct Server {
	pub port: u16,
	pub accepted: Arc<AtomicUsize>,
	pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Server {
	pub fn url(&self, path: &str) -> url::Url {
		format!("http://127.0.0.1:{}{path}", self.port).parse().unwrap()
	}

	pub fn accepted(&self) -> usize {
		self.accepted.load(Ordering::SeqCst)
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.requests.lock().unwrap().clone()
	}
}

/// Starts a server that answers every request with the parts `handler` returns.
pub fn serve<H>(handler: H) -> Server
where
	H: Fn(&Recorded) -> (Vec<Part>, After) + Send + Sync + 'static,
{
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let port = listener.local_addr().unwrap().port();
	let accepted = Arc::new(AtomicUsize::new(0));
	let requests = Arc::new(Mutex::new(Vec::new()));
	let handler = Arc::new(handler);
	{
		let accepted = Arc::clone(&accepted);
		let requests = Arc::clone(&requests);
		let _ = std::thread::spawn(move || {
			for stream in listener.incoming() {
				let Ok(stream) = stream else { break };
				let index = accepted.fetch_add(1, Ordering::SeqCst);
				let handler = Arc::clone(&handler);
				let requests = Arc::clone(&requests);
				let _ = std::thread::spawn(move || handle(stream, index, &*handler, &requests));
			}
		});
	}
	Server {
		port,
		accepted,
		requests,
	}
}

/// Starts a server that always answers with the same bytes and keeps connections open.
pub fn serve_fixed(reply: &'static [u8]) -> Server {
	serve(move |_| (vec![(reply.to_vec(), Duration::ZERO)], After::Keep))
}

/// Builds a `200 OK` response with a `Content-Length` body.
pub fn ok(body: &str) -> Vec<u8> {
	format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
}

fn handle<H>(stream: TcpStream, index: usize, handler: &H, requests: &Mutex<Vec<Recorded>>)
where
	H: Fn(&Recorded) -> (Vec<Part>, After),
{
	let mut writer = stream.try_clone().unwrap();
	let mut reader = BufReader::new(stream);
	while let Some(request) = read_request(&mut reader, index) {
		requests.lock().unwrap().push(request.clone());
		let (parts, after) = handler(&request);
		for (bytes, pause) in parts {
			if writer.write_all(&bytes).and_then(|()| writer.flush()).is_err() {
				return;
			}
			if !pause.is_zero() {
				std::thread::sleep(pause);
			}
		}
		match after {
			After::Keep => (),
			After::Close => return,
			After::Stall(pause) => {
				std::thread::sleep(pause);
				return;
			}
		}
	}
}

fn read_line(reader: &mut BufReader<TcpStream>) -> Option<String> {
	let mut line = String::new();
	match reader.read_line(&mut line) {
		Ok(0) | Err(_) => None,
		Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_owned()),
	}
}

fn read_request(reader: &mut BufReader<TcpStream>, connection: usize) -> Option<Recorded> {
	let line = read_line(reader)?;
	let mut headers = Vec::new();
	loop {
		let header = read_line(reader)?;
		if header.is_empty() {
			break;
		}
		let (name, value) = header.split_once(':')?;
		headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
	}
	let mut recorded = Recorded {
		line,
		headers,
		body: Vec::new(),
		connection,
	};
	if recorded.header("transfer-encoding") == Some("chunked") {
		loop {
			let size = usize::from_str_radix(read_line(reader)?.trim(), 16).ok()?;
			if size == 0 {
				while !read_line(reader)?.is_empty() {}
				break;
			}
			let mut chunk = vec![0; size + 2];
			reader.read_exact(&mut chunk).ok()?;
			chunk.truncate(size);
			recorded.body.extend_from_slice(&chunk);
		}
	} else if let Some(length) = recorded.header("content-length") {
		let mut body = vec![0; length.parse().ok()?];
		reader.read_exact(&mut body).ok()?;
		recorded.body = body;
	}
	Some(recorded)
}
