//! The background runtime that owns every socket and timer of a transport.
//!
//! Sockets are registered with this runtime no matter which front door opened them, so a
//! connection pooled by a blocking caller can be picked up by a cooperative one and the other way
//! around. Cooperative callers may run on any executor; they only poll the futures while this
//! runtime’s threads do the waiting.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

/// An owned multi-threaded Tokio runtime.
#[derive(Debug)]
pub(crate) struct Driver {
	/// The runtime. Only `None` while being dropped.
	runtime: Option<Runtime>,

	/// A handle to the runtime, usable while `runtime` is alive.
	handle: Handle,
}

impl Driver {
	/// Starts a runtime with `worker_threads` threads.
	pub(crate) fn new(worker_threads: usize) -> std::io::Result<Self> {
		let runtime = Builder::new_multi_thread()
			.worker_threads(worker_threads.max(1))
			.thread_name("httpx-transport-io")
			.enable_io()
			.enable_time()
			.build()?;
		let handle = runtime.handle().clone();
		Ok(Self {
			runtime: Some(runtime),
			handle,
		})
	}

	pub(crate) fn handle(&self) -> &Handle {
		&self.handle
	}

	/// Runs `future` to completion, parking the calling thread.
	///
	/// # Panics
	/// Panics if called from within an asynchronous execution context.
	pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
		self.handle.block_on(future)
	}

	/// Awaits `future`, giving up after `limit` if one is set.
	///
	/// Returns `None` if the limit expired first. The timer belongs to this runtime, so the caller
	/// may be polled by any executor.
	pub(crate) async fn timeout<F: Future>(
		&self,
		limit: Option<Duration>,
		future: F,
	) -> Option<F::Output> {
		match limit {
			None => Some(future.await),
			Some(limit) => {
				let timed = {
					let _guard = self.handle.enter();
					tokio::time::timeout(limit, future)
				};
				timed.await.ok()
			}
		}
	}
}

impl Drop for Driver {
	fn drop(&mut self) {
		// The last handle can be dropped from inside an async context, where a blocking
		// shutdown would panic.
		if let Some(runtime) = self.runtime.take() {
			runtime.shutdown_background();
		}
	}
}
