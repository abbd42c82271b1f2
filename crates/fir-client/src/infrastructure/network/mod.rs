//! Network infrastructure for the discovery client.
//!
//! # Sub-modules
//!
//! - **`connector`** – The seams to the operating system: opening a stream to
//!   a remote address and resolving this host's own IPv4 address.
//!
//! - **`scanner`** – Probes every host address of the local /24 on one port
//!   with bounded parallelism and reports which ones accepted a connection.
//!
//! - **`device`** – One remote endpoint and its pairing state machine.  A
//!   paired device exclusively owns its connection.

pub mod connector;
pub mod device;
pub mod scanner;
