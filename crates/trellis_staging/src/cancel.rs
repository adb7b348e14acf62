//! The single-shot cancellation signal of a staging run.

use core::fmt;

use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use trellis_system::component::Component;

/// Why a staging run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Code called [`Cancel::cancel`].
    Requested,
    /// The run-level timeout expired.
    Timeout,
    /// The process received a termination signal.
    Signal,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::Timeout => "timeout",
            Self::Signal => "signal",
        })
    }
}

/// Cooperative cancellation for every unit of work in a staging run.
///
/// Available to plugins and work items as `Arc<Cancel>`. Cancelling is
/// idempotent; the first call records the reason.
///
/// # Example
///
/// ```
/// use trellis_staging::cancel::{Cancel, CancelReason};
///
/// let cancel = Cancel::new();
/// cancel.cancel();
/// cancel.cancel_with(CancelReason::Timeout);
///
/// assert!(cancel.is_cancelled());
/// assert_eq!(cancel.reason(), Some(CancelReason::Requested));
/// ```
#[derive(Default)]
pub struct Cancel {
    token: CancellationToken,
    reason: Mutex<Option<CancelReason>>,
}

impl Component for Cancel {}

impl Cancel {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Requested);
    }

    /// Requests cancellation, recording `reason` if this is the first request.
    pub fn cancel_with(&self, reason: CancelReason) {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason);
        }
        tracing::info!(%reason, "cancellation requested");
        self.token.cancel();
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason of the first request, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock()
    }

    /// Completes once cancellation has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A token cancelled together with this signal, for use in `select!`
    /// loops that outlive a borrow.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl fmt::Debug for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancel")
            .field("reason", &self.reason())
            .finish()
    }
}
