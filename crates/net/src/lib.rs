//! HTTP networking layer for hrw.
//!
//! Provides:
//! - `HttpStorageClient`: implements `StorageClient` over reqwest
//! - `serve` / `serve_listener`: the client-facing hyper server that
//!   routes PUT/GET/HEAD/DELETE to a `Coordinator`

pub mod client;
pub mod server;

pub use client::HttpStorageClient;
pub use server::{serve, serve_listener};
