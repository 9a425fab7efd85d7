//! Network signing endpoint for pkpassmake.
//!
//! Adapts one [`pkpassmake::Signer`] into an HTTP service: clients POST a
//! manifest to `/` and receive the detached signature. This lets pass
//! bundles be assembled on hosts that never hold the signing key; see
//! [`pkpassmake::RemoteSigner`] for the client side.
//!
//! The endpoint only accepts bounded `Content-Length` bodies, optionally
//! requires a shared `Authorization` token, and never exposes signer errors
//! to clients.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::{start, ServerHandle};
