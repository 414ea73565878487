//! # cliphop-core
//!
//! Shared library for Cliphop containing the wire protocol and the domain
//! entities every node agrees on.
//!
//! This crate is used by the node binary and by the integration tests.
//! It has zero dependencies on OS APIs, network sockets, or the clipboard.
//!
//! # Architecture overview (for beginners)
//!
//! Cliphop keeps the clipboards of several machines on a private network in
//! step.  Each machine runs a *node*.  Nodes find each other by advertising a
//! multicast-DNS service record, and when the local clipboard changes the node
//! opens one short TCP connection per peer and writes a single message.
//!
//! This crate (`cliphop-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How a clipboard payload travels over the network: one
//!   JSON document per TCP connection, capped at 1 MiB.
//!
//! - **`domain`** – Pure types with no OS dependencies: the device identity
//!   derived from the host name, the trusted subnet used as the only access
//!   gate, peer entries, and received-history entries.

pub mod domain;
pub mod protocol;

pub use domain::history::HistoryEntry;
pub use domain::identity::DeviceId;
pub use domain::peer::PeerEntry;
pub use domain::subnet::{SubnetParseError, TrustedSubnet};
pub use protocol::codec::{
    decode_message, decode_message_with_limit, encode_message, encode_message_with_limit,
    ProtocolError,
};
pub use protocol::message::{Message, MAX_PAYLOAD_BYTES};
