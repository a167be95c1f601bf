//! Transport configuration.

use std::time::Duration;

/// Settings for a [`Transport`](crate::Transport).
///
/// Every field has a default suited to a general-purpose client, and each can be changed with the
/// matching `with_*` method:
///
/// ```
/// use std::time::Duration;
/// use httpx_transport::Config;
///
/// let config = Config::default()
/// 	.with_pool_max_idle_per_host(8)
/// 	.with_read_timeout(Some(Duration::from_secs(5)));
/// assert_eq!(config.pool_max_idle_per_host, 8);
/// ```
#[derive(Clone, Debug)]
pub struct Config {
	/// Bound on name resolution, the TCP connect, and the TLS handshake together.
	pub connect_timeout: Option<Duration>,

	/// Bound on each individual write of the request and each read of the response.
	///
	/// This is a stall timeout: it limits how long any one operation may wait for the network,
	/// not the length of the whole exchange. A request can override it with the `"timeout"`
	/// extension.
	pub read_timeout: Option<Duration>,

	/// How many idle connections to keep per destination. Zero disables reuse.
	pub pool_max_idle_per_host: usize,

	/// How long a connection may sit idle before it is discarded. `None` keeps idle connections
	/// until the server closes them or the transport is closed.
	pub pool_idle_timeout: Option<Duration>,

	/// How long closing the transport waits for in-flight requests before aborting them.
	pub close_grace_period: Duration,

	/// Value of the `User-Agent` header added to requests that do not carry one.
	pub user_agent: Option<String>,

	/// Largest response head (status line and headers) accepted, in bytes.
	pub max_response_header_bytes: usize,

	/// Largest number of response headers accepted.
	pub max_response_headers: usize,

	/// Largest number of bytes returned by a single body read.
	pub read_chunk_size: usize,

	/// Whether to set `TCP_NODELAY` on new sockets.
	pub tcp_nodelay: bool,

	/// Number of threads driving socket I/O and timers.
	pub worker_threads: usize,

	/// Whether to prepare TLS for `https` URLs. Without it, `https` requests fail to connect.
	pub tls: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			connect_timeout: Some(Duration::from_secs(10)),
			read_timeout: Some(Duration::from_secs(30)),
			pool_max_idle_per_host: 64,
			pool_idle_timeout: Some(Duration::from_secs(90)),
			close_grace_period: Duration::from_secs(5),
			user_agent: Some(
				concat!("rust-httpx-transport/", env!("CARGO_PKG_VERSION")).to_owned(),
			),
			max_response_header_bytes: 64 * 1024,
			max_response_headers: 128,
			read_chunk_size: 16 * 1024,
			tcp_nodelay: true,
			worker_threads: 2,
			tls: true,
		}
	}
}

impl Config {
	/// Sets the connect timeout.
	#[must_use]
	pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.connect_timeout = timeout;
		self
	}

	/// Sets the per-operation read and write stall timeout.
	#[must_use]
	pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.read_timeout = timeout;
		self
	}

	/// Sets the number of idle connections kept per destination.
	#[must_use]
	pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
		self.pool_max_idle_per_host = max;
		self
	}

	/// Sets the maximum idle age of pooled connections.
	#[must_use]
	pub fn with_pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.pool_idle_timeout = timeout;
		self
	}

	/// Sets how long closing waits for in-flight requests.
	#[must_use]
	pub fn with_close_grace_period(mut self, grace: Duration) -> Self {
		self.close_grace_period = grace;
		self
	}

	/// Sets the default `User-Agent`, or disables it with `None`.
	#[must_use]
	pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
		self.user_agent = user_agent;
		self
	}

	/// Sets the response head size limits.
	#[must_use]
	pub fn with_response_header_limits(mut self, max_bytes: usize, max_headers: usize) -> Self {
		self.max_response_header_bytes = max_bytes;
		self.max_response_headers = max_headers;
		self
	}

	/// Sets the largest number of bytes returned by a single body read.
	#[must_use]
	pub fn with_read_chunk_size(mut self, size: usize) -> Self {
		self.read_chunk_size = size.max(1);
		self
	}

	/// Sets whether `TCP_NODELAY` is enabled.
	#[must_use]
	pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
		self.tcp_nodelay = nodelay;
		self
	}

	/// Sets the number of I/O threads.
	#[must_use]
	pub fn with_worker_threads(mut self, threads: usize) -> Self {
		self.worker_threads = threads.max(1);
		self
	}

	/// Sets whether TLS is prepared.
	#[must_use]
	pub fn with_tls(mut self, tls: bool) -> Self {
		self.tls = tls;
		self
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = Config::default();
		assert_eq!(config.pool_max_idle_per_host, 64);
		assert_eq!(config.pool_idle_timeout, Some(Duration::from_secs(90)));
		assert_eq!(config.read_timeout, Some(Duration::from_secs(30)));
		assert!(config
			.user_agent
			.as_deref()
			.is_some_and(|ua| ua.starts_with("rust-httpx-transport/")));
	}

	#[test]
	fn test_builders_clamp() {
		let config = Config::default().with_read_chunk_size(0).with_worker_threads(0);
		assert_eq!(config.read_chunk_size, 1);
		assert_eq!(config.worker_threads, 1);
	}
}
