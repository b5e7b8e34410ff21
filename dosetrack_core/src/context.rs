//! Deadlines and cancellation for store calls.
//!
//! A [`Context`] is created by the caller of a compound operation and handed
//! down to every store call it makes. Cloned contexts share one cancellation
//! flag.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that never expires unless cancelled
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context that expires `timeout` from now. A timeout past the end of
    /// the clock means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Fails with the reason this context is done, if it is
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.is_expired() {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Error describing why an interrupted statement stopped
    pub(crate) fn interruption(&self) -> Error {
        if self.is_cancelled() {
            Error::Cancelled
        } else {
            Error::DeadlineExceeded
        }
    }

    /// Progress callback for the embedded driver; returning true aborts
    /// the running statement.
    pub(crate) fn interrupt_handler(&self) -> impl FnMut() -> bool + Send + 'static {
        let deadline = self.deadline;
        let cancelled = Arc::clone(&self.cancelled);
        move || {
            cancelled.load(Ordering::Relaxed)
                || matches!(deadline, Some(d) if Instant::now() >= d)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_expires() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_huge_timeout_has_no_deadline() {
        let ctx = Context::with_timeout(Duration::MAX);
        assert!(ctx.remaining().is_none());
        assert!(ctx.check().is_ok());

        let parsed = crate::config::parse_duration("9999999999999999999s").unwrap();
        assert!(Context::with_timeout(parsed).check().is_ok());
    }

    #[test]
    fn test_cancel_shared_between_clones() {
        let ctx = Context::with_timeout(Duration::from_secs(60));
        let clone = ctx.clone();
        clone.cancel();
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
        let mut handler = ctx.interrupt_handler();
        assert!(handler());
    }
}
