//! Application layer use cases for a Cliphop node.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The *application* layer sits between the domain types in `cliphop_core`
//! and the infrastructure adapters (sockets, mDNS, the system clipboard).
//!
//! Code in this layer:
//!
//! - **Orchestrates** domain values to fulfil a user goal ("the text I just
//!   copied appears on my other machines").
//! - **Depends on traits** ([`sync_controller::MessageSender`],
//!   [`sync_controller::Clipboard`], [`sync_controller::Notifier`]) rather
//!   than concrete adapters, so tests run without a network or desktop.
//! - **Performs no I/O of its own**.
//!
//! # Sub-modules
//!
//! - **`peer_registry`**   – The table of known peers, with admission rules
//!   and change notifications.
//!
//! - **`sync_controller`** – Decides what to send, fans it out, and handles
//!   inbound messages and history.

pub mod peer_registry;
pub mod sync_controller;
