use futures_core::ready;
use futures_io::AsyncRead;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A response body that ends when the underlying socket is closed by the server.
#[derive(Debug)]
pub(super) struct Receive<Socket: AsyncRead + Unpin> {
	/// The underlying socket.
	socket: Socket,

	/// Whether the server has closed the socket.
	done: bool,
}

impl<Socket: AsyncRead + Unpin> Receive<Socket> {
	pub(super) fn new(socket: Socket) -> Self {
		Self {
			socket,
			done: false,
		}
	}

	pub(super) fn is_complete(&self) -> bool {
		self.done
	}

	pub(super) fn into_inner(self) -> Socket {
		self.socket
	}
}

impl<Socket: AsyncRead + Unpin> AsyncRead for Receive<Socket> {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		if self.done || buf.is_empty() {
			return Ok(0).into();
		}
		let bytes_read = ready!(Pin::new(&mut self.socket).poll_read(cx, buf))?;
		if bytes_read == 0 {
			self.done = true;
		}
		Ok(bytes_read).into()
	}
}
