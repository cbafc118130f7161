//! Network plumbing for the host: session advertising and the TCP session
//! service.
//!
//! - [`advertiser`] broadcasts ADVERTISE datagrams so nearby peers can find
//!   the host without typing anything.
//! - [`service`] accepts peer TCP connections, decodes their frames and
//!   feeds them to the session actor as commands.

pub mod advertiser;
pub mod service;

pub use advertiser::{start_advertiser, AdvertiseError, AdvertiserConfig};
pub use service::{start_session_listener, ListenerConfig, ServiceError, SessionListener, TcpHostLink};
