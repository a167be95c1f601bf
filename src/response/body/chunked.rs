use crate::error::BadChunkHeader;
use futures_core::ready;
use futures_io::AsyncRead;
use std::io::Result;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The most trailer-section bytes accepted after the last chunk.
const MAX_TRAILER_BYTES: usize = 16 * 1024;

/// Checks whether a character can legally appear in the chunk extensions section.
fn is_chunk_ext_char(b: u8) -> bool {
	b == b'\t' || !b.is_ascii_control()
}

/// Decodes one hex digit.
fn hex_value(b: u8) -> Option<u64> {
	char::from(b).to_digit(16).map(u64::from)
}

/// The different states that the decoder can be in.
#[derive(Debug, Eq, PartialEq)]
enum State {
	/// The size part of a chunk header is being read, and no characters have been seen yet.
	SizeFirst,

	/// The size part of a chunk header is being read, and at least one hex digit has been seen.
	///
	/// The contained value is the decoded chunk size read so far.
	SizeRest(u64),

	/// The chunk extensions are being read and ignored.
	Ext(u64),

	/// The LF at the end of a chunk header is being read.
	HeaderLF(u64),

	/// The chunk data is being read.
	///
	/// The contained value is the remaining chunk size.
	Data(NonZeroU64),

	/// The CR following the chunk data is being read.
	DataCR,

	/// The LF following the chunk data is being read.
	DataLF,

	/// The start of a trailer field, or the CR of the blank line ending the body, is being read.
	///
	/// The contained value is the number of trailer bytes seen so far.
	TrailerStart(usize),

	/// A trailer field is being read and discarded.
	TrailerLine(usize),

	/// The LF at the end of a trailer field is being read.
	TrailerLF(usize),

	/// The LF of the blank line ending the body is being read.
	FinalLF,

	/// Everything has been read.
	Done,
}

/// A response body that is encoded using chunked transfer coding.
#[derive(Debug)]
pub struct Receive<Socket: AsyncRead + Unpin> {
	/// The underlying socket.
	socket: Socket,

	/// The current state.
	state: State,
}

impl<Socket: AsyncRead + Unpin> Receive<Socket> {
	/// Constructs a new `Receive`.
	pub fn new(socket: Socket) -> Self {
		Self {
			socket,
			state: State::SizeFirst,
		}
	}

	/// Returns `true` once the terminating chunk and trailer section have been received.
	pub fn is_complete(&self) -> bool {
		self.state == State::Done
	}

	pub fn into_inner(self) -> Socket {
		self.socket
	}

	/// Reads and returns one byte from the socket.
	fn poll_read_byte(&mut self, cx: &mut Context<'_>) -> Poll<Result<u8>> {
		let mut byte = [0_u8; 1];
		if ready!(Pin::new(&mut self.socket).poll_read(cx, &mut byte))? == 1 {
			Ok(byte[0]).into()
		} else {
			Err(std::io::ErrorKind::UnexpectedEof.into()).into()
		}
	}

	/// Advances the state to either [`State::Data`] or [`State::Done`].
	///
	/// This function returns `Some(n)` in the case of [`State::Data`], where `n` is the number of
	/// bytes of body data that can be fetched, or `None` in the case of [`State::Done`].
	fn poll_advance_to_data(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<NonZeroU64>>> {
		loop {
			self.state = match self.state {
				State::SizeFirst => {
					let b = ready!(self.poll_read_byte(cx))?;
					match hex_value(b) {
						Some(nybble) => State::SizeRest(nybble),
						None => break Err(BadChunkHeader::SizeNotHex.into()).into(),
					}
				}

				State::SizeRest(size_so_far) => match ready!(self.poll_read_byte(cx))? {
					b';' | b' ' | b'\t' => State::Ext(size_so_far),
					b'\r' => State::HeaderLF(size_so_far),
					b => match hex_value(b) {
						Some(_) if size_so_far >= 0x1000_0000_0000_0000_u64 => {
							// Adding another digit would overflow.
							break Err(BadChunkHeader::SizeNotU64.into()).into();
						}
						Some(nybble) => State::SizeRest((size_so_far << 4) | nybble),
						None => break Err(BadChunkHeader::SizeNotHex.into()).into(),
					},
				},

				State::Ext(chunk_size) => match ready!(self.poll_read_byte(cx))? {
					b'\r' => State::HeaderLF(chunk_size),
					b if is_chunk_ext_char(b) => State::Ext(chunk_size),
					_ => break Err(BadChunkHeader::ExtChar.into()).into(),
				},

				State::HeaderLF(chunk_size) => {
					if ready!(self.poll_read_byte(cx))? != b'\n' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					match NonZeroU64::new(chunk_size) {
						Some(n) => State::Data(n),
						None => State::TrailerStart(0),
					}
				}

				State::Data(chunk_remaining) => break Ok(Some(chunk_remaining)).into(),

				State::DataCR => {
					if ready!(self.poll_read_byte(cx))? != b'\r' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					State::DataLF
				}

				State::DataLF => {
					if ready!(self.poll_read_byte(cx))? != b'\n' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					State::SizeFirst
				}

				State::TrailerStart(seen) => match ready!(self.poll_read_byte(cx))? {
					b'\r' => State::FinalLF,
					b'\n' => break Err(BadChunkHeader::Newline.into()).into(),
					_ => State::TrailerLine(seen + 1),
				},

				State::TrailerLine(seen) => {
					if seen > MAX_TRAILER_BYTES {
						break Err(BadChunkHeader::TrailerTooLong.into()).into();
					}
					match ready!(self.poll_read_byte(cx))? {
						b'\r' => State::TrailerLF(seen + 1),
						_ => State::TrailerLine(seen + 1),
					}
				}

				State::TrailerLF(seen) => {
					if ready!(self.poll_read_byte(cx))? != b'\n' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					State::TrailerStart(seen + 1)
				}

				State::FinalLF => {
					if ready!(self.poll_read_byte(cx))? != b'\n' {
						break Err(BadChunkHeader::Newline.into()).into();
					}
					State::Done
				}

				State::Done => break Ok(None).into(),
			};
		}
	}
}

impl<Socket: AsyncRead + Unpin> AsyncRead for Receive<Socket> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let this = self.get_mut();
		if buf.is_empty() {
			return Ok(0).into();
		}
		match ready!(this.poll_advance_to_data(cx))? {
			None => Ok(0).into(),
			Some(bytes_available) => {
				let to_read = std::cmp::min(buf.len() as u64, bytes_available.get()) as usize;
				let socket = Pin::new(&mut this.socket);
				let bytes_read = ready!(socket.poll_read(cx, &mut buf[..to_read]))?;
				if bytes_read == 0 {
					return Err(std::io::ErrorKind::UnexpectedEof.into()).into();
				}
				let bytes_remaining = bytes_available.get() - bytes_read as u64;
				this.state = match NonZeroU64::new(bytes_remaining) {
					Some(bytes_remaining) => State::Data(bytes_remaining),
					None => State::DataCR,
				};
				Ok(bytes_read).into()
			}
		}
	}
}
