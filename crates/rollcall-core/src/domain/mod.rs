//! Domain entities for Rollcall.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no sockets, no timers, no storage. Everything here can be
//! unit-tested without any external setup.
//!
//! The three concepts that make the system what it is:
//!
//! - [`session`] – the `Session` being attended and the rotating
//!   `SessionCode` that proves a peer is talking to the right host.
//! - [`handshake`] – the phase machine every connection attempt walks
//!   through, mirrored on the host and peer sides.
//! - [`attendance`] – the `AttendanceRecord` a completed handshake commits,
//!   at most once per (session, participant).

pub mod attendance;
pub mod handshake;
pub mod session;
