//! Best-effort notifications to interested observers
//!
//! Delivery never blocks and never fails the operation that produced the
//! notification. A full or closed channel simply drops the message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Milestones reported while connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStage {
    AcquiringToken,
    OpeningSession,
    RetryingDegraded,
    Verifying,
    Connected,
    Failed,
    Disconnected,
}

/// A message pushed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Connection {
        stage: ConnectStage,
        message: String,
    },
    CircuitStateChanged {
        old: String,
        new: String,
        at: DateTime<Utc>,
    },
    CircuitNearThreshold {
        failures: usize,
        threshold: usize,
    },
    BatchProgress {
        operation_id: String,
        processed: usize,
        failed: usize,
        total: usize,
    },
    BatchFinished {
        operation_id: String,
        status: String,
        message: String,
    },
}

/// Observer of notifications
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// Forwards notifications into a bounded channel
///
/// # Example
///
/// ```
/// use roster_core_interface::{ChannelNotifier, Notification, Notifier, ConnectStage};
///
/// let (notifier, mut rx) = ChannelNotifier::new(16);
/// notifier.notify(Notification::Connection {
///     stage: ConnectStage::Connected,
///     message: "ok".into(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            trace!(error = %e, "Dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_drops_when_full() {
        let (notifier, mut rx) = ChannelNotifier::new(1);
        for i in 0..3 {
            notifier.notify(Notification::CircuitNearThreshold {
                failures: i,
                threshold: 5,
            });
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_notifier_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::new(4);
        drop(rx);
        // Must not panic
        notifier.notify(Notification::Connection {
            stage: ConnectStage::Failed,
            message: "gone".into(),
        });
    }

    #[test]
    fn test_notification_serializes_with_tag() {
        let json = serde_json::to_value(Notification::BatchProgress {
            operation_id: "op-1".into(),
            processed: 10,
            failed: 2,
            total: 20,
        })
        .unwrap();
        assert_eq!(json["type"], "batch_progress");
        assert_eq!(json["processed"], 10);
    }
}
