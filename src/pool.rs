//! The connection pool.
//!
//! Idle connections are kept per [`PoolKey`] in release order, so the warmest connection is at the
//! back and the oldest at the front. The lock protects only the idle sets; connecting, closing
//! sockets, and logging all happen outside it.

use crate::connect::Connector;
use crate::connection::{Connection, OpenGuard, PoolKey, State};
use crate::driver::Driver;
use crate::error::{Phase, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinHandle};

/// The shortest period of the background idle sweep.
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Connection identifiers, unique across every pool in the process.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Aborts a connect task that is given up on, whether by timeout or by the caller going away.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// A snapshot of the pool’s size.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
	/// Connections sitting idle in the pool.
	pub idle: usize,

	/// Connections currently open, idle or in use.
	pub open: usize,
}

/// A set of reusable connections, bucketed by destination.
#[derive(Debug)]
pub(crate) struct Pool {
	idle: Mutex<HashMap<PoolKey, VecDeque<Connection>>>,
	closed: AtomicBool,
	max_idle_per_host: usize,
	idle_timeout: Option<Duration>,
	connect_timeout: Option<Duration>,
	open: Arc<AtomicUsize>,
	connector: Connector,
}

impl Pool {
	pub(crate) fn new(
		connector: Connector,
		max_idle_per_host: usize,
		idle_timeout: Option<Duration>,
		connect_timeout: Option<Duration>,
	) -> Self {
		Self {
			idle: Mutex::new(HashMap::new()),
			closed: AtomicBool::new(false),
			max_idle_per_host,
			idle_timeout,
			connect_timeout,
			open: Arc::new(AtomicUsize::new(0)),
			connector,
		}
	}

	fn is_expired(&self, connection: &Connection, now: Instant) -> bool {
		self.idle_timeout
			.is_some_and(|limit| connection.idle_for(now) >= limit)
	}

	/// Hands out a connection for `key`: the most recently released idle one if there is one,
	/// otherwise a newly opened one.
	///
	/// Opening a connection holds no lock, so concurrent acquisitions for any keys each connect
	/// independently.
	///
	/// # Errors
	/// Returns [`TransportError::Closed`] once the pool is closed, [`TransportError::Timeout`] if
	/// connecting exceeds the connect timeout, or [`TransportError::Connect`] if connecting fails.
	pub(crate) async fn acquire(
		&self,
		key: &PoolKey,
		driver: &Driver,
	) -> Result<Connection, TransportError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(TransportError::Closed);
		}
		if let Some(mut connection) = self.take_idle(key) {
			connection.set_state(State::InUse);
			tracing::debug!(id = connection.id(), key = %key, "reusing idle connection");
			return Ok(connection);
		}

		// The connect runs as a task on the driver so the socket is registered with it.
		let connector = self.connector.clone();
		let target = key.clone();
		let task = driver
			.handle()
			.spawn(async move { connector.connect(&target).await });
		let _abort = AbortOnDrop(task.abort_handle());
		let stream = match driver.timeout(self.connect_timeout, task).await {
			None => return Err(TransportError::Timeout(Phase::Connect)),
			Some(Err(join)) => {
				return Err(TransportError::Connect {
					target: key.to_string(),
					source: std::io::Error::new(std::io::ErrorKind::Other, join),
				})
			}
			Some(Ok(Err(source))) => {
				return Err(TransportError::Connect {
					target: key.to_string(),
					source,
				})
			}
			Some(Ok(Ok(stream))) => stream,
		};
		let connection = Connection::new(
			NEXT_ID.fetch_add(1, Ordering::Relaxed),
			key.clone(),
			stream,
			OpenGuard::new(&self.open),
		);
		tracing::debug!(id = connection.id(), key = %key, "connection established");
		if self.closed.load(Ordering::Acquire) {
			return Err(TransportError::Closed);
		}
		Ok(connection)
	}

	/// Pops the warmest usable idle connection for `key`, discarding expired ones on the way.
	fn take_idle(&self, key: &PoolKey) -> Option<Connection> {
		let now = Instant::now();
		let mut expired = Vec::new();
		let found = {
			let mut idle = self.idle.lock();
			let bucket = idle.get_mut(key)?;
			while bucket.front().is_some_and(|c| self.is_expired(c, now)) {
				expired.extend(bucket.pop_front());
			}
			let found = bucket.pop_back();
			if bucket.is_empty() {
				let _ = idle.remove(key);
			}
			found
		};
		for connection in expired {
			self.discard(connection, "idle timeout");
		}
		found
	}

	/// Returns a connection that finished a full exchange cleanly.
	///
	/// If the key’s idle set is full, its oldest connection is closed to make room.
	pub(crate) fn release(&self, mut connection: Connection) {
		if self.max_idle_per_host == 0 {
			self.discard(connection, "pooling disabled");
			return;
		}
		connection.set_state(State::Idle);
		let id = connection.id();
		let displaced = {
			let mut idle = self.idle.lock();
			// Checked under the lock so that close() cannot miss this connection.
			if self.closed.load(Ordering::Acquire) {
				Err(connection)
			} else {
				let bucket = idle.entry(connection.key().clone()).or_default();
				bucket.push_back(connection);
				let mut displaced = Vec::new();
				while bucket.len() > self.max_idle_per_host {
					displaced.extend(bucket.pop_front());
				}
				Ok(displaced)
			}
		};
		match displaced {
			Err(connection) => self.discard(connection, "pool closed"),
			Ok(displaced) => {
				tracing::trace!(id, "connection released to pool");
				for connection in displaced {
					self.discard(connection, "idle capacity exceeded");
				}
			}
		}
	}

	/// Permanently removes a connection that can no longer be used.
	pub(crate) fn evict(&self, mut connection: Connection, reason: &dyn std::fmt::Display) {
		connection.set_state(State::Broken);
		tracing::debug!(
			id = connection.id(),
			key = %connection.key(),
			%reason,
			"connection evicted"
		);
	}

	/// Closes a healthy connection that is not going back into the pool.
	fn discard(&self, mut connection: Connection, reason: &'static str) {
		connection.set_state(State::Closed);
		tracing::debug!(
			id = connection.id(),
			key = %connection.key(),
			reason,
			"connection discarded"
		);
	}

	/// Discards every idle connection older than the idle timeout.
	pub(crate) fn sweep(&self) {
		if self.idle_timeout.is_none() {
			return;
		}
		let now = Instant::now();
		let mut expired = Vec::new();
		{
			let mut idle = self.idle.lock();
			idle.retain(|_, bucket| {
				while bucket.front().is_some_and(|c| self.is_expired(c, now)) {
					expired.extend(bucket.pop_front());
				}
				!bucket.is_empty()
			});
		}
		for connection in expired {
			self.discard(connection, "idle timeout");
		}
	}

	/// Stops handing out connections and closes every idle one.
	pub(crate) fn close(&self) {
		let drained = {
			let mut idle = self.idle.lock();
			self.closed.store(true, Ordering::Release);
			std::mem::take(&mut *idle)
		};
		for connection in drained.into_values().flatten() {
			self.discard(connection, "pool closed");
		}
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub(crate) fn stats(&self) -> PoolStats {
		let idle = self.idle.lock().values().map(VecDeque::len).sum();
		PoolStats {
			idle,
			open: self.open.load(Ordering::Relaxed),
		}
	}

	/// The ids of the idle connections for `key`, oldest first.
	#[cfg(test)]
	pub(crate) fn idle_ids(&self, key: &PoolKey) -> Vec<u64> {
		self.idle
			.lock()
			.get(key)
			.map(|bucket| bucket.iter().map(Connection::id).collect())
			.unwrap_or_default()
	}
}

/// Starts the background sweep of expired idle connections on `driver`.
///
/// The task holds only a weak reference and stops by itself once the pool is gone or closed.
pub(crate) fn spawn_reaper(pool: &Arc<Pool>, driver: &Driver) -> Option<JoinHandle<()>> {
	let period = (pool.idle_timeout? / 2).max(MIN_SWEEP_PERIOD);
	let weak: Weak<Pool> = Arc::downgrade(pool);
	Some(driver.handle().spawn(async move {
		let mut ticker = tokio::time::interval(period);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		let _ = ticker.tick().await;
		loop {
			let _ = ticker.tick().await;
			match weak.upgrade() {
				Some(pool) if !pool.is_closed() => pool.sweep(),
				_ => break,
			}
		}
	}))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::connection::Scheme;

	#[cfg(feature = "tls")]
	fn connector() -> Connector {
		Connector::new(true, None)
	}

	#[cfg(not(feature = "tls"))]
	fn connector() -> Connector {
		Connector::new(true)
	}

	/// A listener on the driver that accepts and holds connections open, counting them.
	fn listen_counted(driver: &Driver) -> (PoolKey, Arc<AtomicUsize>) {
		let listener = driver
			.block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
			.unwrap();
		let port = listener.local_addr().unwrap().port();
		let accepted = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&accepted);
		let _ = driver.handle().spawn(async move {
			let mut held = Vec::new();
			while let Ok((socket, _)) = listener.accept().await {
				let _ = counter.fetch_add(1, Ordering::SeqCst);
				held.push(socket);
			}
		});
		(PoolKey::new(Scheme::Http, "127.0.0.1", port), accepted)
	}

	fn listen(driver: &Driver) -> PoolKey {
		listen_counted(driver).0
	}

	fn pool(max_idle: usize, idle_timeout: Option<Duration>) -> Pool {
		Pool::new(connector(), max_idle, idle_timeout, Some(Duration::from_secs(5)))
	}

	/// Tests that a released connection is the next one handed out.
	#[test]
	fn test_warm_reuse() {
		let driver = Driver::new(1).unwrap();
		let key = listen(&driver);
		let pool = pool(4, None);
		let first = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let first_id = first.id();
		pool.release(first);
		assert_eq!(pool.stats(), PoolStats { idle: 1, open: 1 });
		let second = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		assert_eq!(second.id(), first_id);
		assert_eq!(second.state(), State::InUse);
		assert_eq!(pool.stats(), PoolStats { idle: 0, open: 1 });
	}

	/// Tests that the most recently released connection is preferred.
	#[test]
	fn test_most_recent_first() {
		let driver = Driver::new(1).unwrap();
		let key = listen(&driver);
		let pool = pool(4, None);
		let a = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let b = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		assert_ne!(a.id(), b.id());
		let b_id = b.id();
		pool.release(a);
		pool.release(b);
		let next = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		assert_eq!(next.id(), b_id);
	}

	/// Tests the per-key idle bound: the older connection is closed.
	#[test]
	fn test_bound() {
		let driver = Driver::new(1).unwrap();
		let key = listen(&driver);
		let pool = pool(1, None);
		let a = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let b = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let b_id = b.id();
		pool.release(a);
		pool.release(b);
		assert_eq!(pool.idle_ids(&key), vec![b_id]);
		assert_eq!(pool.stats(), PoolStats { idle: 1, open: 1 });
	}

	/// Tests that evicted connections never come back.
	#[test]
	fn test_evict() {
		let driver = Driver::new(1).unwrap();
		let key = listen(&driver);
		let pool = pool(4, None);
		let a = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let a_id = a.id();
		pool.evict(a, &"test");
		assert_eq!(pool.stats(), PoolStats { idle: 0, open: 0 });
		let b = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		assert_ne!(b.id(), a_id);
	}

	/// Tests that expired idle connections are skipped by acquire and removed by sweep.
	#[test]
	fn test_idle_expiry() {
		let driver = Driver::new(1).unwrap();
		let key = listen(&driver);
		let pool = pool(4, Some(Duration::from_millis(30)));
		let a = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let b = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let a_id = a.id();
		pool.release(a);
		std::thread::sleep(Duration::from_millis(60));
		pool.release(b);
		pool.sweep();
		assert_eq!(pool.stats().idle, 1);
		std::thread::sleep(Duration::from_millis(60));
		let c = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		assert_ne!(c.id(), a_id);
		assert_eq!(pool.stats(), PoolStats { idle: 0, open: 1 });
	}

	/// Tests that idle connections are kept apart by key.
	#[test]
	fn test_no_cross_key_reuse() {
		let driver = Driver::new(1).unwrap();
		let key_a = listen(&driver);
		let key_b = listen(&driver);
		let pool = pool(4, None);
		let a = driver.block_on(pool.acquire(&key_a, &driver)).unwrap();
		let a_id = a.id();
		pool.release(a);
		let b = driver.block_on(pool.acquire(&key_b, &driver)).unwrap();
		assert_ne!(b.id(), a_id);
		assert_eq!(b.key(), &key_b);
	}

	/// Tests closing the pool.
	#[test]
	fn test_close() {
		let driver = Driver::new(1).unwrap();
		let key = listen(&driver);
		let pool = pool(4, None);
		let a = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		let b = driver.block_on(pool.acquire(&key, &driver)).unwrap();
		pool.release(a);
		pool.close();
		assert_eq!(pool.stats(), PoolStats { idle: 0, open: 1 });
		pool.release(b);
		assert_eq!(pool.stats(), PoolStats { idle: 0, open: 0 });
		assert!(matches!(
			driver.block_on(pool.acquire(&key, &driver)),
			Err(TransportError::Closed)
		));
	}

	/// Tests that acquisitions for one key with nothing idle each open their own connection.
	#[test]
	fn test_concurrent_acquire() {
		let driver = Driver::new(2).unwrap();
		let (key, accepted) = listen_counted(&driver);
		let pool = pool(4, None);
		let (a, b) = futures_executor::block_on(futures_util::future::join(
			pool.acquire(&key, &driver),
			pool.acquire(&key, &driver),
		));
		let (a, b) = (a.unwrap(), b.unwrap());
		assert_ne!(a.id(), b.id());
		assert_eq!(pool.stats(), PoolStats { idle: 0, open: 2 });
		let deadline = Instant::now() + Duration::from_secs(5);
		while accepted.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(5));
		}
		assert_eq!(accepted.load(Ordering::SeqCst), 2);
	}

	/// Tests that a connect stalled past the connect timeout fails with a timeout, and that the
	/// abandoned connect attempt does not linger on the driver.
	#[test]
	fn test_connect_timeout() {
		let driver = Driver::new(1).unwrap();
		let listener = {
			let _guard = driver.handle().enter();
			let socket = tokio::net::TcpSocket::new_v4().unwrap();
			socket.bind(([127, 0, 0, 1], 0).into()).unwrap();
			socket.listen(1).unwrap()
		};
		let addr = listener.local_addr().unwrap();

		// Nothing accepts, so once the accept queue is full further handshakes go unanswered.
		let mut held = Vec::new();
		for _ in 0..16 {
			match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
				Ok(stream) => held.push(stream),
				Err(_) => break,
			}
		}

		let key = PoolKey::new(Scheme::Http, "127.0.0.1", addr.port());
		let pool = Pool::new(connector(), 4, None, Some(Duration::from_millis(100)));
		let err = futures_executor::block_on(pool.acquire(&key, &driver)).unwrap_err();
		assert!(matches!(err, TransportError::Timeout(Phase::Connect)), "unexpected {err:?}");
		assert_eq!(pool.stats().open, 0);

		let deadline = Instant::now() + Duration::from_secs(5);
		while driver.handle().metrics().num_alive_tasks() > 0 && Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(5));
		}
		assert_eq!(driver.handle().metrics().num_alive_tasks(), 0);
		drop(held);
	}

	/// Tests that a failed connect is reported with its target.
	#[test]
	fn test_connect_error() {
		let driver = Driver::new(1).unwrap();
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);
		let key = PoolKey::new(Scheme::Http, "127.0.0.1", port);
		let err = driver.block_on(pool(4, None).acquire(&key, &driver)).unwrap_err();
		assert!(err.is_connect(), "unexpected {err:?}");
		assert!(err.to_string().contains(&key.to_string()));
	}
}
