//! Network infrastructure for a Cliphop node.
//!
//! # Sub-modules
//!
//! - **`address`**   – Picks the local IPv4 address the node advertises,
//!   listens on, and sends from.  Prefers an interface inside the trusted
//!   subnet.
//!
//! - **`discovery`** – Advertises this node over mDNS and browses for peers,
//!   feeding resolved and removed services into the peer registry.
//!
//! - **`listener`**  – Accepts one-message TCP connections from peers and
//!   forwards decoded messages to the sync controller.
//!
//! - **`sender`**    – Opens a short-lived TCP connection per outbound
//!   message, bound to the local interface address.

pub mod address;
pub mod discovery;
pub mod listener;
pub mod sender;
