//! Settle notifications for toast and log surfaces.

use erp_sync_core::{CacheKey, MutationId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mutation::MutationKind;

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The backend accepted the write.
    Succeeded,
    /// The write failed and the cache was rolled back.
    Failed {
        /// User-visible message.
        message: String,
    },
}

/// Signal emitted once per settled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleNotice {
    /// Mutation identifier.
    pub mutation: MutationId,
    /// Create, update or delete.
    pub kind: MutationKind,
    /// Key the mutation was bound to.
    pub key: CacheKey,
    /// Result.
    pub outcome: SettleOutcome,
}

/// Receiver of settle notices. Must not block.
pub trait SettleNotifier: Send + Sync {
    /// Handle one notice.
    fn notify(&self, notice: &SettleNotice);
}

/// Writes settle notices to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl SettleNotifier for TracingNotifier {
    fn notify(&self, notice: &SettleNotice) {
        let SettleNotice {
            mutation,
            kind,
            key,
            outcome,
        } = notice;
        match outcome {
            SettleOutcome::Succeeded => info!(%mutation, %kind, %key, "Mutation succeeded"),
            SettleOutcome::Failed { message } => {
                warn!(%mutation, %kind, %key, %message, "Mutation failed");
            }
        }
    }
}

/// Forwards settle notices to a channel, e.g. a toast queue.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<SettleNotice>,
}

impl ChannelNotifier {
    /// Notifier plus the receiving end of its feed.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SettleNotice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SettleNotifier for ChannelNotifier {
    fn notify(&self, notice: &SettleNotice) {
        if self.sender.send(notice.clone()).is_err() {
            debug!(mutation = %notice.mutation, "Settle feed closed");
        }
    }
}
