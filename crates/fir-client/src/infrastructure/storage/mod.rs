//! Persistent storage for the discovery client.

pub mod config;
