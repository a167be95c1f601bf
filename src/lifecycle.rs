//! Shutdown coordination: the accepting flag, the in-flight count, and the forced-abort signal.

use crate::driver::Driver;
use crate::error::TransportError;
use crate::pool::Pool;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

/// How long a forced close waits for aborted work to let go of its connections.
const ABORT_SETTLE: Duration = Duration::from_secs(1);

/// Something holding a connection outside any pending network wait, which a forced close must
/// be able to tear down directly.
pub(crate) trait Abort: Send + Sync {
	/// Closes the held connection, if there still is one.
	fn abort(&self);
}

/// Tracks whether a transport is open and what it is still doing.
#[derive(Debug)]
pub(crate) struct Lifecycle {
	accepting: AtomicBool,
	in_flight: watch::Sender<usize>,
	forced: watch::Sender<bool>,
	closed: OnceCell<()>,
	reaper: Mutex<Option<JoinHandle<()>>>,

	/// Response bodies that may still own a connection.
	holders: Mutex<Vec<Weak<dyn Abort>>>,
}

/// Marks one request as in flight, from dispatch until its response body is finished.
#[derive(Debug)]
pub(crate) struct InFlight(watch::Sender<usize>);

impl Drop for InFlight {
	fn drop(&mut self) {
		self.0.send_modify(|n| *n = n.saturating_sub(1));
	}
}

impl Lifecycle {
	pub(crate) fn new() -> Self {
		Self {
			accepting: AtomicBool::new(true),
			in_flight: watch::Sender::new(0),
			forced: watch::Sender::new(false),
			closed: OnceCell::new(),
			reaper: Mutex::new(None),
			holders: Mutex::new(Vec::new()),
		}
	}

	pub(crate) fn set_reaper(&self, reaper: Option<JoinHandle<()>>) {
		*self.reaper.lock() = reaper;
	}

	/// Registers a new request.
	///
	/// # Errors
	/// Returns [`TransportError::Closed`] once closing has begun.
	pub(crate) fn begin(&self) -> Result<InFlight, TransportError> {
		// Counted before the check, so a close that has seen the count reach zero cannot be
		// followed by a request slipping through.
		self.in_flight.send_modify(|n| *n += 1);
		let guard = InFlight(self.in_flight.clone());
		if self.accepting.load(Ordering::SeqCst) {
			Ok(guard)
		} else {
			Err(TransportError::Closed)
		}
	}

	pub(crate) fn is_accepting(&self) -> bool {
		self.accepting.load(Ordering::SeqCst)
	}

	pub(crate) fn in_flight(&self) -> usize {
		*self.in_flight.borrow()
	}

	/// Whether in-flight work has been told to abort.
	pub(crate) fn is_forced(&self) -> bool {
		*self.forced.borrow()
	}

	/// Registers `holder` to be torn down by a forced close. If the close has already been
	/// forced, `holder` is torn down at once.
	pub(crate) fn register(&self, holder: &Arc<dyn Abort>) {
		{
			let mut holders = self.holders.lock();
			// Checked under the lock: force() raises the flag before draining the list.
			if !self.is_forced() {
				holders.retain(|h| h.strong_count() > 0);
				holders.push(Arc::downgrade(holder));
				return;
			}
		}
		holder.abort();
	}

	/// Tells in-flight work to abort and closes every connection held by an unread body.
	fn force(&self) {
		let _ = self.forced.send_replace(true);
		let holders = std::mem::take(&mut *self.holders.lock());
		for holder in holders.iter().filter_map(Weak::upgrade) {
			holder.abort();
		}
	}

	/// Waits up to `limit` for the in-flight count to reach zero. Returns whether it did.
	async fn drain(&self, limit: Duration, driver: &Driver) -> bool {
		let mut rx = self.in_flight.subscribe();
		driver
			.timeout(Some(limit), async {
				loop {
					let n = *rx.borrow_and_update();
					if n == 0 || rx.changed().await.is_err() {
						return;
					}
				}
			})
			.await
			.is_some()
	}

	/// Completes once in-flight work has been told to abort.
	pub(crate) async fn forced(&self) {
		let mut rx = self.forced.subscribe();
		loop {
			let forced = *rx.borrow_and_update();
			if forced {
				return;
			}
			if rx.changed().await.is_err() {
				// The sender lives as long as `self`.
				std::future::pending::<()>().await;
			}
		}
	}

	/// Closes the transport: stops accepting, empties the pool, waits up to `grace` for in-flight
	/// requests, then aborts whatever is left and closes its connections. Every call after the
	/// first waits for the first one to finish and does nothing else.
	pub(crate) async fn close(&self, grace: Duration, pool: &Pool, driver: &Driver) {
		let _ = self
			.closed
			.get_or_init(|| async {
				self.accepting.store(false, Ordering::SeqCst);
				tracing::debug!("transport closing");
				pool.close();
				if let Some(reaper) = self.reaper.lock().take() {
					reaper.abort();
				}

				if !self.drain(grace, driver).await {
					let remaining = self.in_flight();
					tracing::warn!(
						remaining,
						?grace,
						"grace period expired, aborting in-flight requests"
					);
					self.force();
					// Requests caught mid-wait give up their connections as soon as they wake.
					if !self.drain(ABORT_SETTLE, driver).await {
						let remaining = self.in_flight();
						tracing::warn!(remaining, "aborted requests still running");
					}
				}
				tracing::debug!("transport closed");
			})
			.await;
	}
}
