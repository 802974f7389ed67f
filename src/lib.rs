//! Zentinel Mock Server
//!
//! An HTTP mock server driven by JSON mapping files. Each mapping binds a
//! URI and method to an ordered list of policies; the first policy whose
//! conditions hold decides whether the request is answered with a canned
//! response, redirected, or forwarded.
//!
//! # Features
//!
//! - **Directives**: `@file`, `@regexp`, `@json`, `@template`, `@vars` and
//!   `@comment` inside mapping documents
//! - **Request Matching**: URI with path variables, method, headers, query
//!   and form params, body (literal, regex or partial JSON)
//! - **Forwarding**: to remote URLs or to other mappings of the same server
//! - **Latency Simulation**: fixed or uniformly random delays
//! - **Hot Reload**: edits to any contributing file are compiled and swapped
//!   in atomically; a broken edit keeps the previous set live
//!
//! # Example Mapping File
//!
//! ```json
//! [
//!   {
//!     "uri": "/hello",
//!     "method": "POST",
//!     "policies": [
//!       {
//!         "when": { "headers": { "Content-Type": { "@regexp": "json" } } },
//!         "returns": { "statusCode": 201, "body": { "greeting": "hi" } }
//!       },
//!       { "returns": { "body": "OK" } }
//!     ]
//!   }
//! ]
//! ```

pub mod config;
pub mod directive;
pub mod error;
pub mod executor;
pub mod json;
pub mod mapping;
pub mod matcher;
pub mod reload;
pub mod server;
pub mod source;

pub use config::ServerConfig;
pub use error::{CompileError, ForwardError};
pub use executor::{Executor, Forwarder, HttpForwarder, MockResponse};
pub use mapping::{Loader, MappingSet};
pub use matcher::{MockRequest, RequestMatcher};
pub use reload::{ReloadHandle, ReloadOutcome, Reloader};
pub use server::{serve, shutdown_signal, MockServer};
