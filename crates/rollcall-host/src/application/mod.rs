//! Application layer use cases for the host application.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules) and the infrastructure (OS/network/storage).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "admit the
//!   next waiting participant when the active slot frees up").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the infrastructure can be swapped without changing this code.
//! - **Contain no OS calls and no file system access**.  The one exception
//!   is `session`, which owns the tokio tasks and timers that keep a
//!   running session alive.
//!
//! # Sub-modules
//!
//! - **`admission`** – The FIFO admission queue with its single active slot.
//!   Pure and synchronous; every admission decision in the host goes through
//!   it, one command at a time.
//!
//! - **`ledger`**    – The idempotent attendance ledger.  Guarantees exactly
//!   one record per `(session, participant)` pair no matter how many commit
//!   attempts arrive or on which channel.
//!
//! - **`session`**   – The session actor.  Owns the session lifecycle, drives
//!   handshakes against the admission queue, and publishes typed events to
//!   the embedding application.
//!
//! - **`fallback`**  – The manual check-in path for participants whose device
//!   cannot complete the wireless handshake.  Reuses the same ledger so both
//!   paths give identical guarantees.

pub mod admission;
pub mod fallback;
pub mod ledger;
pub mod session;
