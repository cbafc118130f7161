//! rollcall-peer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does rollcall-peer do? (for beginners)
//!
//! The *peer* is the participant's device.  While a host is running a
//! session it repeats a small announcement datagram over UDP; the peer
//! listens for those announcements, picks a host, and then runs the
//! check-in conversation over TCP.
//!
//! The peer application:
//!
//! 1. Scans the local network for session announcements and resolves the
//!    host's TCP endpoint from the strongest candidate.
//! 2. Connects and sends a `JoinRequest`; if the host's single check-in
//!    slot is busy the peer waits in the queue, surfacing position and
//!    estimated-wait updates as they arrive.
//! 3. Once granted the slot, receives the session code in a `CodeOffer`
//!    and echoes acceptance back (or disputes a code that does not match
//!    what the participant expects).
//! 4. Runs the local confirmation step (in production a screen prompt;
//!    in tests and the demo binary a mock) within the window the host
//!    granted.
//! 5. Commits the attendance record and waits for the host's ack,
//!    re-sending the commit if the ack goes missing.  Commits are
//!    idempotent on the host, so a re-send can never double-count.

/// Application layer: the check-in use case.
pub mod application;

/// Infrastructure layer: UDP scanner, TCP link, and local confirmation.
pub mod infrastructure;
