//! Domain entities for Cliphop.
//!
//! This module contains pure data types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The innermost layer of the codebase is the **domain**.  Domain code has no
//! imports from socket libraries, the clipboard, or the discovery daemon, so it
//! can be compiled and tested anywhere without setup.  The node crate builds
//! its use cases and adapters on top of these types.

/// Host-derived device identity.
pub mod identity;

/// Trusted subnet predicate: the only admission gate for peers and sends.
pub mod subnet;

/// A peer admitted into the registry.
pub mod peer;

/// Record of one accepted inbound message.
pub mod history;
