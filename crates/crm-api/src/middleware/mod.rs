//! HTTP middleware
//!
//! Authentication guards live in [`crate::auth::middleware`]; this module
//! holds the layers applied to every response.

pub mod security_headers;

pub use security_headers::security_headers_middleware;
