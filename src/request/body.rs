mod chunked;
mod fixed;

use crate::request::Metadata;
use futures_io::AsyncWrite;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The framing in use for the request body.
#[derive(Debug, Eq, PartialEq)]
enum Mode<'socket, Socket: AsyncWrite + Unpin + ?Sized> {
	/// The request body has a fixed size given by a `Content-Length` header, or is absent.
	Fixed(fixed::Send<'socket, Socket>),

	/// The request body is encoded using chunked transfer encoding.
	Chunked(chunked::Send<'socket, Socket>),
}

/// An in-progress HTTP request which is currently sending a request body.
///
/// After the head is sent, an instance of this type is obtained. It implements
/// [`AsyncWrite`](futures_io::AsyncWrite), which allows the body to be written. When the body is
/// finished (or immediately, if there is no body to send), `finish` must be called.
///
/// The `'socket` lifetime parameter is the lifetime of the borrowed connection. The `Socket` type
/// parameter is the type of the connection.
#[derive(Debug, Eq, PartialEq)]
pub struct Send<'socket, Socket: AsyncWrite + Unpin + ?Sized> {
	/// The underlying representation.
	inner: Mode<'socket, Socket>,

	/// The request metadata.
	metadata: Metadata,
}

impl<'socket, Socket: AsyncWrite + Unpin + ?Sized> Send<'socket, Socket> {
	/// Constructs a new `Send` to send a request body of a fixed length.
	pub(crate) fn new_fixed(socket: &'socket mut Socket, metadata: Metadata, length: u64) -> Self {
		Self {
			inner: Mode::Fixed(fixed::Send::new(socket, length)),
			metadata,
		}
	}

	/// Constructs a new `Send` to send a request body using chunked encoding.
	pub(crate) fn new_chunked(socket: &'socket mut Socket, metadata: Metadata) -> Self {
		Self {
			inner: Mode::Chunked(chunked::Send::new(socket)),
			metadata,
		}
	}

	/// Gives a hint about how many bytes of body remain to be sent.
	///
	/// The `length` parameter is the minimum number of bytes of body that will be sent from this
	/// point forward. For a fixed-length body this does nothing. For a chunked body it sets the
	/// size of the next chunk, so that a chunk can be written in several smaller pieces without
	/// each piece becoming a chunk of its own.
	pub fn hint_length(&mut self, length: u64) {
		match &mut self.inner {
			Mode::Fixed(_) => (),
			Mode::Chunked(inner) => inner.hint_length(length),
		}
	}

	/// Finishes the request body, returning the metadata needed to read the response.
	///
	/// This function does not flush the socket.
	///
	/// # Errors
	/// This function returns an error if writing to the underlying socket fails. It returns an
	/// error of kind [`InvalidInput`](std::io::ErrorKind::InvalidInput) if a fixed-length body was
	/// not fully sent or a hinted chunk was left unfinished.
	pub async fn finish(self) -> Result<Metadata> {
		match self.inner {
			Mode::Fixed(inner) => inner.finish()?,
			Mode::Chunked(inner) => inner.finish().await?,
		}
		Ok(self.metadata)
	}
}

impl<Socket: AsyncWrite + Unpin + ?Sized> AsyncWrite for Send<'_, Socket> {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<Result<usize>> {
		match self.inner {
			Mode::Fixed(ref mut inner) => Pin::new(inner).poll_write(cx, buf),
			Mode::Chunked(ref mut inner) => Pin::new(inner).poll_write(cx, buf),
		}
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		match self.inner {
			Mode::Fixed(ref mut inner) => Pin::new(inner).poll_flush(cx),
			Mode::Chunked(ref mut inner) => Pin::new(inner).poll_flush(cx),
		}
	}

	fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
		match self.inner {
			Mode::Fixed(ref mut inner) => Pin::new(inner).poll_close(cx),
			Mode::Chunked(ref mut inner) => Pin::new(inner).poll_close(cx),
		}
	}
}

/// Builds the error returned when the body written does not match its declared framing.
fn mismatch(message: String) -> std::io::Error {
	std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
}
