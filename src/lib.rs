#![forbid(unsafe_code)]
#![warn(
	future_incompatible,
	nonstandard_style,
	rust_2018_idioms,
	rustdoc,
	unused
)]
#![warn(
	deprecated_in_future,
	missing_crate_level_docs,
	missing_debug_implementations,
	missing_docs,
	trivial_casts,
	trivial_numeric_casts,
	unused_crate_dependencies,
	unused_import_braces,
	unused_qualifications,
	unused_results
)]
#![warn(clippy::pedantic, clippy::cargo)]
// Disabled because we frequently mix u64 and usize, where the former is used for message body
// lengths and the latter for in-memory buffer sizes.
#![allow(clippy::cast_possible_truncation)]

//! Pooled HTTP/1.1 Transport
//!
//! This crate is the low-level engine underneath an HTTP client: it takes a request (method, URL,
//! headers, body, and extension metadata), carries it over a pooled connection, and hands back the
//! status, headers, and a live handle onto the response body. Redirects, retries, cookies, and
//! proxies are left to the client library on top.
//!
//! Connections are pooled per scheme, host, and port. A connection goes back to the pool only
//! once its response body has been read to the end without error; anything else closes it.
//!
//! The same engine is reachable through two front doors that share one pool:
//! * [`SyncTransport`] parks the calling thread on every network wait.
//! * [`AsyncTransport`] suspends the calling task instead, on any executor.
//!
//! # Example
//! ```no_run
//! use httpx_transport::{AsyncTransport, Config, Request};
//!
//! # futures_executor::block_on(async {
//! let transport = AsyncTransport::new(Config::default()).unwrap();
//! let url = "http://example.com/".parse().unwrap();
//! let request = Request::new("GET", url).header("Accept", "text/html");
//! let mut response = transport.handle_async_request(request).await.unwrap();
//! println!("{} {}", response.status, response.reason);
//! while let Some(chunk) = response.body.read_chunk().await.unwrap() {
//! 	println!("{} bytes", chunk.len());
//! }
//! transport.close().await;
//! # });
//! ```

mod body;
mod config;
mod connect;
mod connection;
mod driver;
pub mod error;
mod executor;
mod lifecycle;
mod pool;
mod request;
mod response;
mod telemetry;
mod transport;
mod util;

pub use body::{Body, SyncBody};
pub use config::Config;
pub use connection::{PoolKey, Scheme};
pub use error::TransportError;
pub use pool::PoolStats;
pub use request::{BodyStream, Extensions, Request, RequestBody};
pub use response::{ConnectionInfo, HttpVersion, Response};
pub use telemetry::init_tracing;
pub use transport::{version, AsyncTransport, Diagnostics, SyncTransport, Transport};
