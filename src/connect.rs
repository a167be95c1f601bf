//! Opening new connections: name resolution, TCP connect, and the optional TLS handshake.

use crate::connection::{PoolKey, Scheme, Stream};
use tokio::net::TcpStream;

/// Establishes transport-level streams to pool destinations.
#[derive(Clone)]
pub(crate) struct Connector {
	nodelay: bool,
	#[cfg(feature = "tls")]
	tls: Option<tokio_rustls::TlsConnector>,
}

impl std::fmt::Debug for Connector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut s = f.debug_struct("Connector");
		let _ = s.field("nodelay", &self.nodelay);
		#[cfg(feature = "tls")]
		let _ = s.field("tls", &self.tls.is_some());
		s.finish()
	}
}

impl Connector {
	/// Builds a connector. `tls` is the prepared client configuration, if TLS is available.
	#[cfg(feature = "tls")]
	pub(crate) fn new(nodelay: bool, tls: Option<std::sync::Arc<rustls::ClientConfig>>) -> Self {
		Self {
			nodelay,
			tls: tls.map(tokio_rustls::TlsConnector::from),
		}
	}

	/// Builds a connector without TLS support.
	#[cfg(not(feature = "tls"))]
	pub(crate) fn new(nodelay: bool) -> Self {
		Self { nodelay }
	}

	/// Opens a stream to `key`.
	///
	/// Must run inside the I/O driver, so that the socket is registered with it.
	pub(crate) async fn connect(&self, key: &PoolKey) -> std::io::Result<Stream> {
		let tcp = TcpStream::connect((key.bare_host(), key.port())).await?;
		tcp.set_nodelay(self.nodelay)?;
		match key.scheme() {
			Scheme::Http => Ok(Stream::Plain(tcp)),
			Scheme::Https => self.handshake(key, tcp).await,
		}
	}

	#[cfg(feature = "tls")]
	async fn handshake(&self, key: &PoolKey, tcp: TcpStream) -> std::io::Result<Stream> {
		let Some(tls) = &self.tls else {
			return Err(tls_unavailable());
		};
		let server_name = rustls::pki_types::ServerName::try_from(key.bare_host().to_owned())
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
		let stream = tls.connect(server_name, tcp).await?;
		Ok(Stream::Tls(Box::new(stream)))
	}

	#[cfg(not(feature = "tls"))]
	#[allow(clippy::unused_async)]
	async fn handshake(&self, _key: &PoolKey, _tcp: TcpStream) -> std::io::Result<Stream> {
		Err(tls_unavailable())
	}
}

fn tls_unavailable() -> std::io::Error {
	std::io::Error::new(
		std::io::ErrorKind::Unsupported,
		"TLS is not available in this transport",
	)
}

/// Builds the rustls client configuration: webpki roots, safe protocol versions, and ALPN
/// restricted to HTTP/1.1.
#[cfg(feature = "tls")]
pub(crate) fn tls_config() -> Result<std::sync::Arc<rustls::ClientConfig>, rustls::Error> {
	let mut roots = rustls::RootCertStore::empty();
	roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
	let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
	let mut config = rustls::ClientConfig::builder_with_provider(provider)
		.with_safe_default_protocol_versions()?
		.with_root_certificates(roots)
		.with_no_client_auth();
	config.alpn_protocols = vec![b"http/1.1".to_vec()];
	Ok(std::sync::Arc::new(config))
}
