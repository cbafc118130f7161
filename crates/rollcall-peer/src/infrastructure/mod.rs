//! Infrastructure layer for the peer application.
//!
//! Contains the network-facing adapters and the stand-in confirmation
//! prompt that back the application layer's seams.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `rollcall_core`, but MUST NOT be imported by the `application` or
//! domain layers.
//!
//! # Sub-modules
//!
//! - **`scanner`** – UDP listener that collects session announcements
//!   from nearby hosts and resolves each into a dialable TCP endpoint.
//!
//! - **`link`** – TCP implementation of `PeerLink` / `PeerChannel`:
//!   connects to a host's session port and moves framed protocol
//!   messages in both directions.
//!
//! - **`local_auth`** – A scriptable `LocalAuthenticator` used by tests
//!   and the demo binary in place of a real on-device prompt.

pub mod link;
pub mod local_auth;
pub mod scanner;
