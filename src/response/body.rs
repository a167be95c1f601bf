mod chunked;
mod eof;
mod fixed;

use crate::response::head::{Framing, Length};
use futures_io::AsyncRead;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The decoder matching the body’s framing.
#[derive(Debug)]
enum Impl<Socket: AsyncRead + Unpin> {
	Chunked(chunked::Receive<Socket>),
	Eof(eof::Receive<Socket>),
	Fixed(fixed::Receive<Socket>),
}

/// An in-progress HTTP response which is currently receiving a response body.
///
/// It owns the connection for as long as the body is being read, and implements
/// [`AsyncRead`](futures_io::AsyncRead) over the decoded body bytes. Once reading is over,
/// [`finish`](Self::finish) hands the connection back together with whether it can be reused.
#[derive(Debug)]
pub struct Receive<Socket: AsyncRead + Unpin> {
	/// The body receiving implementation.
	body_impl: Impl<Socket>,

	/// Whether the exchange permitted the socket to persist after the body has been received.
	persistent: bool,
}

impl<Socket: AsyncRead + Unpin> Receive<Socket> {
	/// Constructs a new `Receive` reading a body framed as `framing` from `socket`.
	pub fn new(socket: Socket, framing: Framing) -> Self {
		let body_impl = match framing.length {
			Length::Fixed(n) => Impl::Fixed(fixed::Receive::new(socket, n)),
			Length::Chunked => Impl::Chunked(chunked::Receive::new(socket)),
			Length::Eof => Impl::Eof(eof::Receive::new(socket)),
		};
		Self {
			body_impl,
			persistent: framing.persistent && framing.length != Length::Eof,
		}
	}

	/// Returns whether the whole body has been received.
	pub fn is_complete(&self) -> bool {
		match &self.body_impl {
			Impl::Chunked(chunked) => chunked.is_complete(),
			Impl::Eof(eof) => eof.is_complete(),
			Impl::Fixed(fixed) => fixed.is_complete(),
		}
	}

	/// Destroys a `Receive`, returning the socket.
	///
	/// The flag is `true` if the socket can be reused for another request to the same host, which
	/// requires the body to have been read to its end.
	pub fn finish(self) -> (Socket, bool) {
		let complete = self.is_complete();
		let socket = match self.body_impl {
			Impl::Chunked(chunked) => chunked.into_inner(),
			Impl::Eof(eof) => eof.into_inner(),
			Impl::Fixed(fixed) => fixed.into_inner(),
		};
		(socket, self.persistent && complete)
	}
}

impl<Socket: AsyncRead + Unpin> AsyncRead for Receive<Socket> {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		match self.body_impl {
			Impl::Chunked(ref mut chunked) => Pin::new(chunked).poll_read(cx, buf),
			Impl::Eof(ref mut eof) => Pin::new(eof).poll_read(cx, buf),
			Impl::Fixed(ref mut fixed) => Pin::new(fixed).poll_read(cx, buf),
		}
	}
}
