use futures_core::ready;
use futures_io::AsyncRead;
use std::io::{ErrorKind, Result};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A response body that is a fixed length known a priori from a `Content-Length` header.
#[derive(Debug)]
pub(super) struct Receive<Socket: AsyncRead + Unpin> {
	/// The underlying socket.
	socket: Socket,

	/// The amount of body left for the caller to receive.
	remaining: u64,
}

impl<Socket: AsyncRead + Unpin> Receive<Socket> {
	/// Constructs a new `Receive` for a body of `length` bytes.
	pub(super) fn new(socket: Socket, length: u64) -> Self {
		Self {
			socket,
			remaining: length,
		}
	}

	/// Returns `true` once the entire response body has been received.
	pub(super) fn is_complete(&self) -> bool {
		self.remaining == 0
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
		if self.remaining == 0 || buf.is_empty() {
			Ok(0).into()
		} else {
			// Never read past the declared length; anything beyond it belongs to the next
			// response, or is garbage.
			let to_read = std::cmp::min(buf.len() as u64, self.remaining) as usize;
			let bytes_read = ready!(Pin::new(&mut self.socket).poll_read(cx, &mut buf[..to_read]))?;
			if bytes_read == 0 {
				Err(ErrorKind::UnexpectedEof.into()).into()
			} else {
				self.remaining -= bytes_read as u64;
				Ok(bytes_read).into()
			}
		}
	}
}
