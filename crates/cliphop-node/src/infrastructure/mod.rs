//! Infrastructure layer for a Cliphop node.
//!
//! Contains OS-facing adapters: network sockets and mDNS discovery, the
//! system clipboard, desktop notifications, and file-system configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `cliphop_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod clipboard;
pub mod network;
pub mod notify;
pub mod storage;
