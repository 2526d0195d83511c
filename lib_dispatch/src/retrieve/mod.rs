//! # Data Retrieval Module
//!
//! HTTP plumbing for talking to the remote coordinator.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff and Bearer authentication from a shared `TokenStore`.
//!
//! - **`gateway`**: `HttpGateway`, the REST implementation of
//!   `ResourceGateway`, layering login, token refresh and payload
//!   re-fetching on top of `ky_http`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// REST implementation of the resource gateway.
pub mod gateway;
/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use gateway::{HttpGateway, HttpGatewayConfig};
pub use ky_http::{ApiClient, ApiRequest, ApiResponse, ClientSettings, TokenStore};
