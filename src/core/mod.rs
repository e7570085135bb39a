//! Shared infrastructure.

pub mod http_client;
