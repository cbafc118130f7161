//! Application layer use cases for the peer application.
//!
//! # What use cases does the peer have?
//!
//! - **`check_in`** – Drives the whole check-in conversation with a host:
//!   join (or queue), receive and confirm the session code, run the local
//!   confirmation prompt, and commit the attendance record.  The network
//!   transport and the confirmation prompt are injected at construction
//!   time behind the `PeerLink` and `LocalAuthenticator` traits, so the
//!   flow itself can be tested against scripted fakes.

pub mod check_in;
