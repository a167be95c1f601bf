use futures_core::ready;
use futures_io::AsyncWrite;
use std::cmp::{max, min};
use std::io::Result;
use std::num::{NonZeroU64, NonZeroUsize};
use std::pin::Pin;
use std::task::{Context, Poll};

/// The largest chunk header: sixteen hex digits plus CRLF.
const HEADER_CAPACITY: usize = 18;

/// Writes `size` as uppercase hex followed by CRLF, returning the number of bytes used.
fn encode_chunk_header(size: NonZeroU64, buffer: &mut [u8; HEADER_CAPACITY]) -> usize {
	const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
	let size = size.get();
	let digits = (64 - size.leading_zeros() as usize + 3) / 4;
	for (i, slot) in buffer[..digits].iter_mut().enumerate() {
		let shift = 4 * (digits - 1 - i);
		*slot = DIGITS[((size >> shift) & 0xF) as usize];
	}
	buffer[digits..digits + 2].copy_from_slice(b"\r\n");
	digits + 2
}

/// An in-progress HTTP request which is currently sending a chunk-encoded request body.
#[derive(Debug, Eq, PartialEq)]
pub struct Send<'socket, Socket: AsyncWrite + Unpin + ?Sized> {
	/// The underlying socket.
	socket: &'socket mut Socket,

	/// A buffer to hold a chunk header (size plus CRLF) or the CRLF after a chunk’s data.
	header_footer_buffer: [u8; HEADER_CAPACITY],

	/// The number of bytes of `header_footer_buffer` that are filled.
	header_footer_buffer_used: usize,

	/// The number of bytes of `header_footer_buffer` that have been sent over the socket.
	header_footer_buffer_sent: usize,

	/// The number of bytes left to send in the current chunk.
	chunk_bytes_left: u64,

	/// The length of the next chunk after the current one, if known.
	next_chunk_size: Option<NonZeroU64>,
}

impl<'socket, Socket: AsyncWrite + Unpin + ?Sized> Send<'socket, Socket> {
	/// Constructs a new `Send`.
	pub fn new(socket: &'socket mut Socket) -> Self {
		Self {
			socket,
			header_footer_buffer: [0; HEADER_CAPACITY],
			header_footer_buffer_used: 0,
			header_footer_buffer_sent: 0,
			chunk_bytes_left: 0,
			next_chunk_size: None,
		}
	}

	/// Gives a hint about how many bytes of body remain to be sent.
	///
	/// If the current chunk is unfinished, the hint covers the rest of it first, so the next chunk
	/// will be the hint minus whatever is left. The largest hint seen so far wins.
	pub fn hint_length(&mut self, length: u64) {
		if let Some(new_hint) = NonZeroU64::new(length.saturating_sub(self.chunk_bytes_left)) {
			self.next_chunk_size =
				Some(self.next_chunk_size.map_or(new_hint, |v| max(v, new_hint)));
		}
	}

	/// Polls sending whatever is left in the header/footer buffer.
	fn poll_send_header_footer(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
		while self.header_footer_buffer_sent != self.header_footer_buffer_used {
			let bytes_written = ready!(Pin::new(&mut *self.socket).poll_write(
				cx,
				&self.header_footer_buffer
					[self.header_footer_buffer_sent..self.header_footer_buffer_used],
			))?;
			if bytes_written == 0 {
				return Err(std::io::ErrorKind::WriteZero.into()).into();
			}
			self.header_footer_buffer_sent += bytes_written;
		}
		Ok(()).into()
	}

	/// Prepares for a write of `length` data bytes.
	///
	/// Returns the number of bytes that may be written into the current chunk, which is at most
	/// `length`.
	fn pre_write(&mut self, cx: &mut Context<'_>, length: NonZeroUsize) -> Poll<Result<usize>> {
		if self.chunk_bytes_left == 0 {
			// Drain the previous chunk's footer so the buffer is free for the new header.
			ready!(self.poll_send_header_footer(cx))?;

			// The hint only applies to this chunk.
			let length64 = NonZeroU64::try_from(length).unwrap_or(NonZeroU64::MAX);
			let chunk_size = self
				.next_chunk_size
				.take()
				.map_or(length64, |v| max(v, length64));
			self.header_footer_buffer_used =
				encode_chunk_header(chunk_size, &mut self.header_footer_buffer);
			self.header_footer_buffer_sent = 0;
			self.chunk_bytes_left = chunk_size.get();
		}

		ready!(self.poll_send_header_footer(cx))?;

		// Inside a chunk with at least one byte left and an empty header buffer.
		Ok(min(length.get() as u64, self.chunk_bytes_left) as usize).into()
	}

	/// Accounts for `bytes_written` data bytes and queues the chunk footer at the end of a chunk.
	fn post_write(&mut self, bytes_written: usize) {
		self.chunk_bytes_left -= bytes_written as u64;
		if self.chunk_bytes_left == 0 {
			self.header_footer_buffer[0..2].copy_from_slice(b"\r\n");
			self.header_footer_buffer_sent = 0;
			self.header_footer_buffer_used = 2;
		}
	}

	/// Finishes the request by sending the terminating zero-length chunk.
	///
	/// # Errors
	/// This function returns an error if writing to the underlying socket fails, or an error of
	/// kind [`InvalidInput`](std::io::ErrorKind::InvalidInput) if the current chunk is unfinished.
	pub async fn finish(mut self) -> Result<()> {
		use crate::util::io::AsyncWriteExt as _;

		if self.chunk_bytes_left != 0 {
			return Err(super::mismatch(format!(
				"request body ended {} bytes into an unfinished chunk",
				self.chunk_bytes_left
			)));
		}

		// The most recent chunk’s footer may still be in the buffer.
		futures_util::future::poll_fn(|cx| self.poll_send_header_footer(cx)).await?;
		self.socket.write_all(b"0\r\n\r\n").await
	}
}

impl<Socket: AsyncWrite + Unpin + ?Sized> AsyncWrite for Send<'_, Socket> {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
		let Some(buf_len) = NonZeroUsize::new(buf.len()) else {
			// Never emit an empty chunk; that would end the body.
			return Ok(0).into();
		};
		let this = Pin::into_inner(self);
		let to_write = ready!(this.pre_write(cx, buf_len))?;
		let bytes_written = ready!(Pin::new(&mut *this.socket).poll_write(cx, &buf[..to_write]))?;
		this.post_write(bytes_written);
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

	/// Tests the hex chunk header encoding.
	#[test]
	fn test_encode_chunk_header() {
		let mut buffer = [0_u8; HEADER_CAPACITY];
		let n = encode_chunk_header(NonZeroU64::new(12).unwrap(), &mut buffer);
		assert_eq!(&buffer[..n], b"C\r\n");
		let n = encode_chunk_header(NonZeroU64::new(0x1F0).unwrap(), &mut buffer);
		assert_eq!(&buffer[..n], b"1F0\r\n");
		let n = encode_chunk_header(NonZeroU64::MAX, &mut buffer);
		assert_eq!(&buffer[..n], b"FFFFFFFFFFFFFFFF\r\n");
	}

	/// Tests sending a body as two chunks, one after another.
	#[test]
	fn test_two_chunks() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink);
			body.write_all(b"Hello ").await.unwrap();
			body.write_all(b"World!").await.unwrap();
			body.finish().await.unwrap();
		});
		assert_eq!(sink, b"6\r\nHello \r\n6\r\nWorld!\r\n0\r\n\r\n");
	}

	/// Tests sending a body as one chunk, using a size hint to write it in two blocks.
	#[test]
	fn test_hint() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink);
			body.hint_length(12);
			body.write_all(b"Hello ").await.unwrap();
			body.write_all(b"World!").await.unwrap();
			body.finish().await.unwrap();
		});
		assert_eq!(sink, b"C\r\nHello World!\r\n0\r\n\r\n");
	}

	/// Tests use of a size hint where a single write overlaps the end of the hinted chunk.
	#[test]
	fn test_hint_overlap() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink);
			body.hint_length(10);
			body.write_all(b"Hello ").await.unwrap();
			body.write_all(b"World!").await.unwrap();
			body.finish().await.unwrap();
		});
		assert_eq!(sink, b"A\r\nHello Worl\r\n2\r\nd!\r\n0\r\n\r\n");
	}

	/// Tests that trying to finish while inside a chunk fails.
	#[test]
	fn test_truncate() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink);
			body.hint_length(12);
			body.write_all(b"Hello ").await.unwrap();
			let err = body.finish().await.unwrap_err();
			assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
		});
	}

	/// Tests that writing zero-byte blocks doesn’t create spurious empty chunks.
	#[test]
	fn test_zero_bytes() {
		let mut sink = Vec::new();
		block_on(async {
			let mut body = Send::new(&mut sink);
			body.write_all(b"").await.unwrap();
			body.hint_length(12);
			body.write_all(b"Hello ").await.unwrap();
			body.write_all(b"").await.unwrap();
			body.write_all(b"World!").await.unwrap();
			body.finish().await.unwrap();
		});
		assert_eq!(sink, b"C\r\nHello World!\r\n0\r\n\r\n");
	}
}
