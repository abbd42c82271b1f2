//! Application layer use cases for the discovery client.
//!
//! # Sub-modules
//!
//! - **`client`** – The orchestrator.  Resolves the local address once,
//!   runs scans, and owns the registry of paired devices.  This is the only
//!   entry point external callers (the CLI, a shell, a UI) need.

pub mod client;
