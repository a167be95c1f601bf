use futures_core::ready;
use futures_io::AsyncWrite;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// An in-progress HTTP request which is currently sending a fixed-length request body.
#[derive(Debug, Eq, PartialEq)]
pub struct Send<'socket, Socket: AsyncWrite + Unpin + ?Sized> {
	/// The underlying socket.
	socket: &'socket mut Socket,

	/// How many bytes of body are left to send.
	remaining: u64,
}

impl<'socket, Socket: AsyncWrite + Unpin + ?Sized> Send<'socket, Socket> {
	/// Constructs a new `Send` that will send exactly `length` bytes.
	pub fn new(socket: &'socket mut Socket, length: u64) -> Self {
		Self {
			socket,
			remaining: length,
		}
	}

	/// Finishes the request.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](std::io::ErrorKind::InvalidInput)
	/// if fewer bytes were written than the declared length.
	pub fn finish(self) -> Result<()> {
		if self.remaining == 0 {
			Ok(())
		} else {
			Err(super::mismatch(format!(
				"request body ended {} bytes short of its Content-Length",
				self.remaining
			)))
		}
	}
}

impl<Socket: AsyncWrite + Unpin + ?Sized> AsyncWrite for Send<'_, Socket> {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<Result<usize>> {
		if buf.len() as u64 > self.remaining {
			return Err(super::mismatch(format!(
				"attempted to write {} bytes, but Content-Length allows only {} more",
				buf.len(),
				self.remaining
			)))
			.into();
		}
		let bytes_written = ready!(Pin::new(&mut *self.socket).poll_write(cx, buf))?;
		self.remaining -= bytes_written as u64;
		Ok(bytes_written).into()
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		Pin::new(&mut *self.socket).poll_flush(cx)
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		Pin::new(&mut *self.socket).poll_close(cx)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::AsyncWriteExt as _;
	use futures_executor::block_on;
	use std::io::ErrorKind;

	/// Tests sending a request body of the proper length in two parts.
	#[test]
	fn test_two_parts() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink, 12);
			body.write_all(b"Hello ").await.unwrap();
			body.write_all(b"World!").await.unwrap();
			body.finish().unwrap();
		});
		assert_eq!(sink, b"Hello World!");
	}

	/// Tests sending not enough data before finishing.
	#[test]
	fn test_truncated() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink, 13);
			body.write_all(b"Hello World!").await.unwrap();
			assert_eq!(body.finish().unwrap_err().kind(), ErrorKind::InvalidInput);
		});
	}

	/// Tests sending too much data.
	#[test]
	fn test_overflow() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink, 11);
			let err = body.write_all(b"Hello World!").await.unwrap_err();
			assert_eq!(err.kind(), ErrorKind::InvalidInput);
		});
		assert!(sink.is_empty());
	}
}
