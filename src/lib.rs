//! A RADIUS (RFC 2865) client: PAP, CHAP-MD5, MS-CHAP v1, and the
//! four-message EAP/MS-CHAP v2 exchange (RFC 2759), including the
//! change-password sub-flow.
//!
//! ```no_run
//! use radclient::Client;
//!
//! let mut client = Client::new("radius.example.com", "shared-secret");
//! if client.authenticate_pap("alice", "hunter2", None) {
//!     println!("accepted");
//! } else {
//!     eprintln!("rejected: {}", client.last_error_message());
//! }
//! ```
//!
//! This crate never installs a `tracing` subscriber; wire one up in the
//! consuming application to see the `debug!`/`info!`/`warn!` events it emits.

pub mod builder;
pub mod client;
pub mod codec;
pub mod crypto;
pub mod eap;
pub mod error;
pub mod transport;

pub use client::Client;
pub use error::{ErrorCode, RadiusError, Result};
