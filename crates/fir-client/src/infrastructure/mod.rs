//! Infrastructure layer for the discovery client.
//!
//! Contains OS-facing adapters: TCP sockets, host name resolution, and the
//! config file on disk.
//!
//! **Dependency rule**: this layer may depend on `fir_core`, but MUST NOT
//! import the `application` layer.

pub mod network;
pub mod storage;
