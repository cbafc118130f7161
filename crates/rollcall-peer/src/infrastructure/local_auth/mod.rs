//! Mock local authenticator for tests and the demo binary.
//!
//! # Why a mock authenticator?
//!
//! The real confirmation step is an on-device prompt (a dialog box, a
//! biometric check) that:
//!
//! - Requires a user interface to render.
//! - Blocks on a human answering.
//! - Cannot be driven from test code.
//!
//! `MockLocalAuthenticator` replaces the prompt with a scripted answer and
//! an optional artificial delay, and counts how often it was consulted so
//! tests can assert the flow asked exactly once.
//!
//! # Usage in tests
//!
//! ```ignore
//! let authenticator = MockLocalAuthenticator::approving();
//! let (flow, events) = CheckInFlow::new(link, authenticator.clone(), config);
//! // ... run the flow ...
//! assert_eq!(authenticator.prompts(), 1);
//! ```
//!
//! # Simulating a slow participant
//!
//! `with_delay` holds the answer back for the given duration, which lets
//! timeout paths (the host-dictated local-auth window) be exercised under
//! Tokio's paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::application::check_in::{AuthResult, LocalAuthenticator};

/// A scripted authenticator: fixed answer, optional delay, prompt counter.
pub struct MockLocalAuthenticator {
    answer: AuthResult,
    delay: Duration,
    prompts: AtomicUsize,
}

impl MockLocalAuthenticator {
    /// An authenticator that confirms immediately.
    pub fn approving() -> Arc<Self> {
        Self::with_delay(AuthResult::Confirmed, Duration::ZERO)
    }

    /// An authenticator that denies immediately.
    pub fn denying() -> Arc<Self> {
        Self::with_delay(AuthResult::Denied, Duration::ZERO)
    }

    /// An authenticator that holds its answer back for `delay`.
    pub fn with_delay(answer: AuthResult, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer,
            delay,
            prompts: AtomicUsize::new(0),
        })
    }

    /// How many times the flow asked for confirmation.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LocalAuthenticator for MockLocalAuthenticator {
    async fn authenticate(&self) -> AuthResult {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
