use futures_core::ready;
use futures_io::{AsyncBufRead, AsyncRead, AsyncWrite};
use std::future::Future;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Buffered-read helpers for the response parser.
pub trait AsyncBufReadExt: AsyncBufRead + Unpin {
	/// Fills the internal buffer, then invokes a callback which can consume some bytes from that
	/// buffer.
	///
	/// The callback is passed the buffered bytes (an empty slice means EOF) and returns how many
	/// of them to consume, along with an arbitrary value to pass back to the caller. It is called
	/// at most once, and not at all if filling the buffer fails.
	fn read_buf<CallbackReturn, Callback: FnOnce(&'_ [u8]) -> (usize, CallbackReturn) + Unpin>(
		&mut self,
		callback: Callback,
	) -> ReadBufFuture<'_, Self, CallbackReturn, Callback> {
		ReadBufFuture {
			source: self,
			callback: Some(callback),
		}
	}
}

impl<R: AsyncBufRead + Unpin + ?Sized> AsyncBufReadExt for R {}

/// Read helpers for body handles.
pub trait AsyncReadExt: AsyncRead + Unpin {
	/// Reads once into `buffer`, returning how many bytes arrived. Zero means end of stream.
	fn read<'buffer>(&mut self, buffer: &'buffer mut [u8]) -> ReadFuture<'_, 'buffer, Self> {
		ReadFuture {
			source: self,
			buffer,
		}
	}
}

impl<R: AsyncRead + Unpin + ?Sized> AsyncReadExt for R {}

/// Write helpers for the request writer.
pub trait AsyncWriteExt: AsyncWrite + Unpin {
	/// Writes all of `data`, however many writes that takes.
	///
	/// A write that accepts zero bytes is reported as [`WriteZero`](std::io::ErrorKind::WriteZero).
	fn write_all<'a>(&'a mut self, data: &'a [u8]) -> WriteAllFuture<'a, Self> {
		WriteAllFuture { sink: self, data }
	}

	/// Flushes any buffered data to the underlying transport.
	fn flush(&mut self) -> FlushFuture<'_, Self> {
		FlushFuture { sink: self }
	}
}

impl<W: AsyncWrite + Unpin + ?Sized> AsyncWriteExt for W {}

/// The future returned by [`AsyncBufReadExt::read_buf`].
#[derive(Debug)]
pub struct ReadBufFuture<
	'source,
	Source: AsyncBufRead + Unpin + ?Sized,
	CallbackReturn,
	Callback: FnOnce(&[u8]) -> (usize, CallbackReturn) + Unpin,
> {
	source: &'source mut Source,
	callback: Option<Callback>,
}

impl<
		Source: AsyncBufRead + Unpin + ?Sized,
		CallbackReturn,
		Callback: FnOnce(&[u8]) -> (usize, CallbackReturn) + Unpin,
	> Future for ReadBufFuture<'_, Source, CallbackReturn, Callback>
{
	type Output = Result<CallbackReturn>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let data = ready!(Pin::new(&mut *this.source).poll_fill_buf(cx))?;
		let Some(callback) = this.callback.take() else {
			return Err(std::io::Error::new(
				std::io::ErrorKind::Other,
				"buffered read polled after completion",
			))
			.into();
		};
		let (consumed, ret) = callback(data);
		Pin::new(&mut *this.source).consume(consumed);
		Ok(ret).into()
	}
}

/// The future returned by [`AsyncReadExt::read`].
#[derive(Debug)]
pub struct ReadFuture<'source, 'buffer, Source: AsyncRead + Unpin + ?Sized> {
	source: &'source mut Source,
	buffer: &'buffer mut [u8],
}

impl<Source: AsyncRead + Unpin + ?Sized> Future for ReadFuture<'_, '_, Source> {
	type Output = Result<usize>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		Pin::new(&mut *this.source).poll_read(cx, this.buffer)
	}
}

/// The future returned by [`AsyncWriteExt::write_all`].
#[derive(Debug)]
pub struct WriteAllFuture<'a, T: AsyncWrite + Unpin + ?Sized> {
	sink: &'a mut T,
	data: &'a [u8],
}

impl<T: AsyncWrite + Unpin + ?Sized> Future for WriteAllFuture<'_, T> {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		while !self.data.is_empty() {
			let data = self.data;
			let bytes_written = ready!(Pin::new(&mut *self.sink).poll_write(cx, data))?;
			if bytes_written == 0 {
				return Err(std::io::ErrorKind::WriteZero.into()).into();
			}
			self.data = &self.data[bytes_written..];
		}
		Ok(()).into()
	}
}

/// The future returned by [`AsyncWriteExt::flush`].
#[derive(Debug)]
pub struct FlushFuture<'a, T: AsyncWrite + Unpin + ?Sized> {
	sink: &'a mut T,
}

impl<T: AsyncWrite + Unpin + ?Sized> Future for FlushFuture<'_, T> {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut *self.sink).poll_flush(cx)
	}
}

/// Issues repeated reads until the source reports EOF, returning everything read.
#[cfg(test)]
pub async fn read_to_end<Source: AsyncRead + Unpin + ?Sized>(src: &mut Source) -> Result<Vec<u8>> {
	let mut out = Vec::new();
	let mut buffer = [0_u8; 5];
	loop {
		let bytes_read = src.read(&mut buffer).await?;
		if bytes_read == 0 {
			return Ok(out);
		}
		out.extend_from_slice(&buffer[..bytes_read]);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use futures_executor::block_on;

	/// A sink that takes at most `per_write` bytes per call and fails once `fail_after` bytes
	/// have been taken.
	struct Trickle {
		taken: Vec<u8>,
		per_write: usize,
		fail_after: usize,
		flushed: bool,
	}

	impl AsyncWrite for Trickle {
		fn poll_write(
			mut self: Pin<&mut Self>,
			_cx: &mut Context<'_>,
			data: &[u8],
		) -> Poll<Result<usize>> {
			if self.taken.len() >= self.fail_after {
				let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away");
				return Err(err).into();
			}
			let n = data.len().min(self.per_write);
			self.taken.extend_from_slice(&data[..n]);
			Ok(n).into()
		}

		fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
			self.flushed = true;
			Ok(()).into()
		}

		fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
			unreachable!("the request writer never closes the connection");
		}
	}

	fn trickle(per_write: usize, fail_after: usize) -> Trickle {
		Trickle {
			taken: Vec::new(),
			per_write,
			fail_after,
			flushed: false,
		}
	}

	/// Tests a single `read` into a smaller buffer.
	#[test]
	fn test_read() {
		let mut src: &[u8] = b"GET / HTTP/1.1";
		let mut buffer = [0_u8; 3];
		assert_eq!(block_on(src.read(&mut buffer)).unwrap(), 3);
		assert_eq!(&buffer, b"GET");
		assert_eq!(src, b" / HTTP/1.1");
	}

	/// Tests that `read_buf` consumes only what the callback asks for.
	#[test]
	fn test_read_buf_partial_consume() {
		let mut src: &[u8] = b"HTTP/1.1 200";
		let seen = block_on(src.read_buf(|bytes| (5, bytes.len()))).unwrap();
		assert_eq!(seen, 12);
		assert_eq!(src, b"1.1 200");
	}

	/// Tests that `write_all` keeps writing through short writes, and `flush` reaches the sink.
	#[test]
	fn test_write_all_short_writes() {
		let mut sink = trickle(3, usize::MAX);
		block_on(async {
			sink.write_all(b"Host: example.com\r\n").await?;
			sink.flush().await
		})
		.unwrap();
		assert_eq!(sink.taken, b"Host: example.com\r\n");
		assert!(sink.flushed);
	}

	/// Tests that a failing sink stops `write_all` with its error.
	#[test]
	fn test_write_all_error() {
		let mut sink = trickle(4, 8);
		let e = block_on(sink.write_all(b"0123456789abcdef")).unwrap_err();
		assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe);
		assert_eq!(sink.taken, b"01234567");
	}

	/// Tests that a sink accepting nothing is reported instead of spinning.
	#[test]
	fn test_write_all_zero() {
		let mut sink = trickle(0, usize::MAX);
		let e = block_on(sink.write_all(b"x")).unwrap_err();
		assert_eq!(e.kind(), std::io::ErrorKind::WriteZero);
	}
}
