//! HTTP data path.
//!
//! # Data Flow
//! ```text
//! Client → server.rs (router, request ID, trace)
//!     → dispatch.rs (acquire node, rewrite, forward, complete transaction)
//!     → response.rs (hop-by-hop stripping, buffered body)
//!     → Client
//! ```

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;

pub use dispatch::{DispatchError, Dispatched, Dispatcher, Transaction};
pub use request::{propagate_request_id, set_request_id, RequestId, RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
