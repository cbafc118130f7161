//! Infrastructure layer: sockets, disk, and the outward event surface.
//!
//! Dependency rule: this layer may depend on `application` and
//! `rollcall_core`, but MUST NOT be imported by the `application` layer.
//! The application layer sees infrastructure only through the traits it
//! defines itself ([`HostLink`](crate::application::session::HostLink),
//! [`AttendanceStore`](crate::application::ledger::AttendanceStore)).

pub mod event_bridge;
pub mod link;
pub mod storage;
