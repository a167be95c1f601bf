//! Response body handles for the two front doors.
//!
//! A body that is still streaming owns its connection. When the body reaches its end the
//! connection goes back to the pool if the exchange allows it; if the body is closed, dropped, or
//! fails first, the connection is evicted.

use crate::connection::Connection;
use crate::error::{Phase, TransportError};
use crate::lifecycle::{Abort, InFlight};
use crate::response::body::Receive;
use crate::transport::Engine;
use crate::util::io::AsyncReadExt as _;
use bytes::{Buf as _, Bytes, BytesMut};
use futures_core::Stream;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A body still attached to its connection.
#[derive(Debug)]
struct Streaming {
	receive: Receive<Connection>,
	engine: Arc<Engine>,
	stall: Option<Duration>,
	_in_flight: InFlight,
}

/// Where a streaming body keeps its connection between reads.
///
/// A read takes the connection out and puts it back when it returns, so a read that is cancelled
/// partway drops the connection along with its future and leaves the slot empty. A forced close
/// empties the slot too.
#[derive(Debug, Default)]
struct Slot(Mutex<Option<Box<Streaming>>>);

impl Slot {
	fn take(&self) -> Option<Box<Streaming>> {
		self.0.lock().take()
	}

	fn is_empty(&self) -> bool {
		self.0.lock().is_none()
	}

	/// Puts the connection back after a read, unless the transport has been force-closed
	/// meanwhile.
	fn put(&self, streaming: Box<Streaming>) {
		let mut slot = self.0.lock();
		if streaming.engine.lifecycle().is_forced() {
			drop(slot);
			evict(*streaming, &TransportError::Closed);
		} else {
			*slot = Some(streaming);
		}
	}
}

impl Abort for Slot {
	fn abort(&self) {
		if let Some(streaming) = self.take() {
			evict(*streaming, &TransportError::Closed);
		}
	}
}

/// The body of a response obtained through the cooperative front door.
///
/// Reading is a suspension point; the calling task yields while waiting for the network.
#[derive(Debug)]
pub struct Body {
	slot: Arc<Slot>,
	engine: Arc<Engine>,

	/// Set once the body has ended, been closed, or failed.
	done: bool,

	chunk_size: usize,
}

impl Body {
	/// Wraps a response body that is about to be read.
	///
	/// A body that is already complete, such as the empty body of a `HEAD` response, gives its
	/// connection back at once.
	pub(crate) fn new(
		receive: Receive<Connection>,
		engine: Arc<Engine>,
		stall: Option<Duration>,
		in_flight: InFlight,
	) -> Self {
		let streaming = Box::new(Streaming {
			receive,
			engine: Arc::clone(&engine),
			stall,
			_in_flight: in_flight,
		});
		let mut body = Self {
			slot: Arc::new(Slot::default()),
			chunk_size: engine.config().read_chunk_size.max(1),
			engine,
			done: false,
		};
		if streaming.receive.is_complete() {
			body.finish(streaming);
		} else {
			*body.slot.0.lock() = Some(streaming);
			let holder: Arc<dyn Abort> = body.slot.clone();
			body.engine.lifecycle().register(&holder);
		}
		body
	}

	/// Returns whether the body has ended, been closed, or failed.
	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.done || self.slot.is_empty()
	}

	/// Reads the next piece of the body, at most the configured chunk size.
	///
	/// Returns `None` at the end of the body, and on every call after that.
	///
	/// # Errors
	/// Returns [`TransportError::Timeout`] if the server stalls for longer than the read timeout,
	/// [`TransportError::Closed`] if the transport was closed and its grace period ran out,
	/// [`TransportError::Protocol`] if the body framing is malformed, or [`TransportError::Io`] if
	/// the connection fails, including when the server closes it early or an earlier read was
	/// cancelled. After an error the body is finished and its connection evicted.
	pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
		if self.done {
			return Ok(None);
		}
		let Some(mut streaming) = self.slot.take() else {
			self.done = true;
			return Err(if self.engine.lifecycle().is_forced() {
				TransportError::Closed
			} else {
				TransportError::Io(std::io::Error::new(
					std::io::ErrorKind::Interrupted,
					"an earlier body read was cancelled",
				))
			});
		};
		if self.engine.lifecycle().is_forced() {
			return Err(self.abandon(*streaming, TransportError::Closed));
		}

		let mut buffer = BytesMut::zeroed(self.chunk_size);
		let stall = streaming.stall;
		let outcome = self
			.engine
			.run_io(Phase::Read, stall, streaming.receive.read(&mut buffer))
			.await;
		match outcome {
			Ok(0) => {
				self.finish(streaming);
				Ok(None)
			}
			Ok(n) => {
				buffer.truncate(n);
				if streaming.receive.is_complete() {
					self.finish(streaming);
				} else {
					self.slot.put(streaming);
				}
				Ok(Some(buffer.freeze()))
			}
			Err(e) => Err(self.abandon(*streaming, e)),
		}
	}

	/// Reads the rest of the body into one buffer.
	///
	/// # Errors
	/// As for [`read_chunk`](Self::read_chunk).
	pub async fn read_to_end(&mut self) -> Result<Bytes, TransportError> {
		let mut all = BytesMut::new();
		while let Some(chunk) = self.read_chunk().await? {
			all.extend_from_slice(&chunk);
		}
		Ok(all.freeze())
	}

	/// Stops reading. If the body has not ended, its connection is evicted.
	pub fn close(&mut self) {
		self.done = true;
		if let Some(streaming) = self.slot.take() {
			settle(*streaming, "body closed before its end");
		}
	}

	/// Turns the body into a stream of chunks.
	pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, TransportError>> + Send + 'static {
		futures_util::stream::unfold(self, |mut body| async move {
			match body.read_chunk().await {
				Ok(Some(chunk)) => Some((Ok(chunk), body)),
				Ok(None) => None,
				Err(e) => Some((Err(e), body)),
			}
		})
	}

	/// Ends a body that was read to its end.
	fn finish(&mut self, streaming: Box<Streaming>) {
		self.done = true;
		settle(*streaming, "connection not reusable");
	}

	/// Ends a body after a failure, evicting its connection.
	fn abandon(&mut self, streaming: Streaming, err: TransportError) -> TransportError {
		self.done = true;
		evict(streaming, &err);
		err
	}
}

impl Drop for Body {
	fn drop(&mut self) {
		if let Some(streaming) = self.slot.take() {
			settle(*streaming, "body dropped before its end");
		}
	}
}

/// Hands the connection back to the pool if the exchange completed cleanly, otherwise evicts it
/// giving `reason`.
fn settle(streaming: Streaming, reason: &'static str) {
	let Streaming { receive, engine, .. } = streaming;
	let (connection, reusable) = receive.finish();
	if reusable && connection.buffered_len() == 0 {
		engine.pool().release(connection);
	} else {
		engine.pool().evict(connection, &reason);
	}
}

fn evict(streaming: Streaming, reason: &dyn std::fmt::Display) {
	let Streaming { receive, engine, .. } = streaming;
	let (connection, _) = receive.finish();
	engine.pool().evict(connection, reason);
}

/// The body of a response obtained through the blocking front door.
///
/// Every read parks the calling thread until data arrives. Besides the explicit methods it can be
/// used as an [`Iterator`] of chunks or as a [`std::io::Read`].
#[derive(Debug)]
pub struct SyncBody {
	body: Body,
	engine: Arc<Engine>,

	/// Bytes of the last chunk not yet handed out through `std::io::Read`.
	leftover: Bytes,
}

impl SyncBody {
	pub(crate) fn new(body: Body, engine: Arc<Engine>) -> Self {
		Self {
			body,
			engine,
			leftover: Bytes::new(),
		}
	}

	/// Returns whether the body has ended, been closed, or failed.
	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.body.is_finished() && self.leftover.is_empty()
	}

	/// Reads the next piece of the body.
	///
	/// # Errors
	/// As for [`Body::read_chunk`].
	///
	/// # Panics
	/// Panics if called from within an asynchronous execution context.
	pub fn read_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
		if !self.leftover.is_empty() {
			return Ok(Some(std::mem::take(&mut self.leftover)));
		}
		self.engine.driver().block_on(self.body.read_chunk())
	}

	/// Reads the rest of the body into one buffer.
	///
	/// # Errors
	/// As for [`Body::read_chunk`].
	///
	/// # Panics
	/// Panics if called from within an asynchronous execution context.
	pub fn read_to_end(&mut self) -> Result<Bytes, TransportError> {
		let leftover = std::mem::take(&mut self.leftover);
		let rest = self.engine.driver().block_on(self.body.read_to_end())?;
		if leftover.is_empty() {
			Ok(rest)
		} else {
			let mut all = BytesMut::from(&leftover[..]);
			all.extend_from_slice(&rest);
			Ok(all.freeze())
		}
	}

	/// Stops reading. If the body has not ended, its connection is evicted.
	pub fn close(&mut self) {
		self.leftover.clear();
		self.body.close();
	}
}

impl Iterator for SyncBody {
	type Item = Result<Bytes, TransportError>;

	fn next(&mut self) -> Option<Self::Item> {
		self.read_chunk().transpose()
	}
}

impl std::io::Read for SyncBody {
	fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		if buf.is_empty() {
			return Ok(0);
		}
		if self.leftover.is_empty() {
			match self.engine.driver().block_on(self.body.read_chunk())? {
				Some(chunk) => self.leftover = chunk,
				None => return Ok(0),
			}
		}
		let n = buf.len().min(self.leftover.len());
		buf[..n].copy_from_slice(&self.leftover[..n]);
		self.leftover.advance(n);
		Ok(n)
	}
}
