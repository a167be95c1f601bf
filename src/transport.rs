//! The transport handle and its two front doors.

use crate::body::{Body, SyncBody};
use crate::config::Config;
use crate::connection::PoolKey;
use crate::driver::Driver;
use crate::error::{Phase, TransportError};
use crate::executor::{self, Outgoing};
use crate::lifecycle::Lifecycle;
use crate::pool::{self, Pool, PoolStats};
use crate::request::Request;
use crate::response::body::Receive;
use crate::response::{ConnectionInfo, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Returns the version of this crate.
#[must_use]
pub fn version() -> &'static str {
	env!("CARGO_PKG_VERSION")
}

/// What a transport reports about itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostics {
	/// The crate version.
	pub version: &'static str,

	/// Whether `https` URLs can be used.
	pub tls: bool,

	/// Why initialization failed, if it did.
	pub init_error: Option<String>,

	/// Whether the transport has been closed.
	pub closed: bool,
}

/// State shared by every handle onto one transport.
#[derive(Debug)]
pub(crate) struct Engine {
	config: Config,
	lifecycle: Lifecycle,
	pool: Arc<Pool>,
	tls: bool,
	init_error: Option<String>,

	/// Dropped last so that sockets are released while the runtime is still up.
	driver: Driver,
}

impl Engine {
	fn new(config: Config) -> std::io::Result<Self> {
		let driver = Driver::new(config.worker_threads)?;

		#[cfg(feature = "tls")]
		let (connector, tls, init_error) = {
			let (tls, init_error) = if config.tls {
				match crate::connect::tls_config() {
					Ok(tls) => (Some(tls), None),
					Err(e) => {
						tracing::warn!(error = %e, "TLS unavailable");
						(None, Some(format!("TLS initialization failed: {e}")))
					}
				}
			} else {
				(None, None)
			};
			let enabled = tls.is_some();
			(crate::connect::Connector::new(config.tcp_nodelay, tls), enabled, init_error)
		};
		#[cfg(not(feature = "tls"))]
		let (connector, tls, init_error) =
			(crate::connect::Connector::new(config.tcp_nodelay), false, None);

		let pool = Arc::new(Pool::new(
			connector,
			config.pool_max_idle_per_host,
			config.pool_idle_timeout,
			config.connect_timeout,
		));
		let lifecycle = Lifecycle::new();
		lifecycle.set_reaper(pool::spawn_reaper(&pool, &driver));
		tracing::debug!(version = version(), tls, "transport started");
		Ok(Self {
			config,
			lifecycle,
			pool,
			tls,
			init_error,
			driver,
		})
	}

	pub(crate) fn config(&self) -> &Config {
		&self.config
	}

	pub(crate) fn driver(&self) -> &Driver {
		&self.driver
	}

	pub(crate) fn pool(&self) -> &Pool {
		&self.pool
	}

	pub(crate) fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	/// Runs `future`, giving up with [`TransportError::Closed`] if the transport is force-closed
	/// first.
	pub(crate) async fn abortable<T>(
		&self,
		future: impl Future<Output = Result<T, TransportError>>,
	) -> Result<T, TransportError> {
		tokio::select! {
			biased;
			() = self.lifecycle.forced() => Err(TransportError::Closed),
			outcome = future => outcome,
		}
	}

	/// Runs one network operation under the stall limit and the forced abort.
	pub(crate) async fn run_io<T>(
		&self,
		phase: Phase,
		limit: Option<Duration>,
		future: impl Future<Output = std::io::Result<T>>,
	) -> Result<T, TransportError> {
		self.abortable(async {
			match self.driver.timeout(limit, future).await {
				None => Err(TransportError::Timeout(phase)),
				Some(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
					Err(TransportError::Timeout(phase))
				}
				Some(outcome) => outcome.map_err(TransportError::from),
			}
		})
		.await
	}

	/// Carries `request` from acquiring a connection to the response head.
	async fn dispatch(
		self: &Arc<Self>,
		request: Request,
	) -> Result<Response<Body>, TransportError> {
		let in_flight = self.lifecycle.begin()?;
		let stall = request.timeout().or(self.config.read_timeout);
		let parts = request.into_parts();
		let key = PoolKey::from_url(&parts.url)?;
		let outgoing = Outgoing::new(
			parts.method,
			&parts.url,
			parts.headers,
			parts.body,
			&key,
			self.config.user_agent.as_deref(),
		);

		let mut connection = self.abortable(self.pool.acquire(&key, &self.driver)).await?;
		let info = ConnectionInfo {
			id: connection.id(),
			reused: connection.begin_request(),
		};
		let sent = executor::execute(self, &mut connection, outgoing, stall).await;
		let (head, framing) = match sent {
			Ok(received) => received,
			Err(e) => {
				self.pool.evict(connection, &e);
				return Err(e);
			}
		};

		let receive = Receive::new(connection, framing);
		let body = Body::new(receive, Arc::clone(self), stall, in_flight);
		Ok(Response {
			status: head.status,
			version: head.version,
			reason: head.reason,
			headers: head.headers,
			extensions: parts.extensions,
			connection: info,
			body,
		})
	}

	async fn close(&self) {
		self.lifecycle
			.close(self.config.close_grace_period, &self.pool, &self.driver)
			.await;
	}

	fn diagnostics(&self) -> Diagnostics {
		Diagnostics {
			version: version(),
			tls: self.tls,
			init_error: self.init_error.clone(),
			closed: !self.lifecycle.is_accepting(),
		}
	}
}

/// A handle onto one transport engine: a connection pool and the runtime driving its sockets.
///
/// Cloning the handle is cheap and every clone shares the same pool. The blocking and cooperative
/// front doors obtained from it also share that pool, so a connection released by one can be
/// reused by the other.
///
/// ```no_run
/// use httpx_transport::{Config, Request, Transport};
///
/// let transport = Transport::new(Config::default()).unwrap();
/// let client = transport.blocking();
/// let url = "http://example.com/".parse().unwrap();
/// let mut response = client.handle_request(Request::new("GET", url)).unwrap();
/// assert_eq!(response.status, 200);
/// let body = response.body.read_to_end().unwrap();
/// println!("{} bytes", body.len());
/// client.close();
/// ```
#[derive(Clone, Debug)]
pub struct Transport {
	engine: Arc<Engine>,
}

impl Transport {
	/// Starts a transport.
	///
	/// A failure to prepare TLS does not fail construction; it is reported by
	/// [`is_available`](Self::is_available) and [`diagnostics`](Self::diagnostics) instead, and
	/// `https` requests then fail to connect.
	///
	/// # Errors
	/// Returns an error if the I/O runtime cannot be started.
	pub fn new(config: Config) -> std::io::Result<Self> {
		Ok(Self {
			engine: Arc::new(Engine::new(config)?),
		})
	}

	/// Returns the cooperative front door.
	#[must_use]
	pub fn cooperative(&self) -> AsyncTransport {
		AsyncTransport {
			engine: Arc::clone(&self.engine),
		}
	}

	/// Returns the blocking front door.
	#[must_use]
	pub fn blocking(&self) -> SyncTransport {
		SyncTransport {
			engine: Arc::clone(&self.engine),
		}
	}

	/// Returns whether the engine initialized without errors.
	#[must_use]
	pub fn is_available(&self) -> bool {
		self.engine.init_error.is_none()
	}

	/// Returns the engine version and initialization outcome.
	#[must_use]
	pub fn diagnostics(&self) -> Diagnostics {
		self.engine.diagnostics()
	}

	/// Returns how many connections are idle and open.
	#[must_use]
	pub fn pool_stats(&self) -> PoolStats {
		self.engine.pool.stats()
	}

	/// Returns the configuration.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.engine.config
	}
}

/// The cooperative front door: every network wait is a suspension point.
///
/// The futures may be polled by any executor. Socket readiness and timers are handled by the
/// transport’s own I/O threads.
#[derive(Clone, Debug)]
pub struct AsyncTransport {
	engine: Arc<Engine>,
}

impl AsyncTransport {
	/// Starts a transport and returns its cooperative front door.
	///
	/// # Errors
	/// Returns an error if the I/O runtime cannot be started.
	pub fn new(config: Config) -> std::io::Result<Self> {
		Ok(Transport::new(config)?.cooperative())
	}

	/// Sends `request` and returns the response once its head has arrived.
	///
	/// # Errors
	/// Returns [`TransportError::Closed`] without any I/O if the transport is closed,
	/// [`TransportError::UnsupportedUrl`] for URLs that are not `http` or `https`, and otherwise
	/// any error from connecting, sending, or receiving the head. A connection involved in an
	/// error is never reused.
	pub async fn handle_async_request(
		&self,
		request: Request,
	) -> Result<Response<Body>, TransportError> {
		self.engine.dispatch(request).await
	}

	/// Closes the transport. See [`SyncTransport::close`].
	pub async fn close(&self) {
		self.engine.close().await;
	}

	/// Returns the shared transport handle.
	#[must_use]
	pub fn transport(&self) -> Transport {
		Transport {
			engine: Arc::clone(&self.engine),
		}
	}
}

/// The blocking front door: every network wait parks the calling thread.
///
/// Its methods must not be called from within an asynchronous execution context.
#[derive(Clone, Debug)]
pub struct SyncTransport {
	engine: Arc<Engine>,
}

impl SyncTransport {
	/// Starts a transport and returns its blocking front door.
	///
	/// # Errors
	/// Returns an error if the I/O runtime cannot be started.
	pub fn new(config: Config) -> std::io::Result<Self> {
		Ok(Transport::new(config)?.blocking())
	}

	/// Sends `request` and returns the response once its head has arrived.
	///
	/// # Errors
	/// As for [`AsyncTransport::handle_async_request`].
	///
	/// # Panics
	/// Panics if called from within an asynchronous execution context.
	pub fn handle_request(&self, request: Request) -> Result<Response<SyncBody>, TransportError> {
		let response = self.engine.driver.block_on(self.engine.dispatch(request))?;
		Ok(response.map_body(|body| SyncBody::new(body, Arc::clone(&self.engine))))
	}

	/// Closes the transport.
	///
	/// New requests fail with [`TransportError::Closed`] from the moment this is called. Idle
	/// connections are closed at once. Requests and bodies still in flight get the configured
	/// grace period to finish; after that their next or pending network operation fails with
	/// [`TransportError::Closed`]. Calling this again, from either front door, waits for the first
	/// call and does nothing else.
	///
	/// # Panics
	/// Panics if called from within an asynchronous execution context.
	pub fn close(&self) {
		self.engine.driver.block_on(self.engine.close());
	}

	/// Returns the shared transport handle.
	#[must_use]
	pub fn transport(&self) -> Transport {
		Transport {
			engine: Arc::clone(&self.engine),
		}
	}
}
