//! Network layer.
//!
//! # Data Flow
//! ```text
//! bind_address → listener.rs bind → TcpListener
//!     → tls.rs (optional RustlsConfig)
//!     → listener.rs serve (axum / axum-server, graceful shutdown)
//! ```

pub mod listener;
pub mod tls;
