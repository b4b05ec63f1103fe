//! Breaker event notifier task
//!
//! Consumes [`BreakerEvent`]s on a dedicated task so the breaker itself never
//! does I/O. Warns one failure before the threshold, audits every opening
//! and forwards state changes to the notifier.

use crate::manager::ConnectionManager;
use roster_core_audit::{AuditTrail, OperationStatus, OperationType};
use roster_core_interface::{Notification, Notifier};
use roster_core_resilience::{BreakerEvent, CircuitBreaker, CircuitState};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

impl ConnectionManager {
    /// Spawn the task that reacts to breaker events
    ///
    /// The task ends when the breaker (and so the manager) is dropped.
    pub fn start_event_notifier(&self) -> JoinHandle<()> {
        spawn_breaker_notifier(
            self.breaker(),
            self.notifier().clone(),
            self.audit().clone(),
        )
    }
}

/// Spawn a notifier task for any breaker
pub fn spawn_breaker_notifier(
    breaker: &CircuitBreaker,
    notifier: Arc<dyn Notifier>,
    audit: AuditTrail,
) -> JoinHandle<()> {
    let mut events = breaker.subscribe();
    let name = breaker.name().to_string();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BreakerEvent::FailureRecorded {
                    current_count,
                    threshold,
                }) => {
                    if threshold > 1 && current_count + 1 == threshold {
                        warn!(
                            breaker = %name,
                            failures = current_count,
                            threshold,
                            "Circuit breaker one failure away from opening"
                        );
                        notifier.notify(Notification::CircuitNearThreshold {
                            failures: current_count,
                            threshold,
                        });
                    }
                }
                Ok(BreakerEvent::StateChanged { old, new, at }) => {
                    notifier.notify(Notification::CircuitStateChanged {
                        old: old.to_string(),
                        new: new.to_string(),
                        at,
                    });
                    match new {
                        CircuitState::Open => {
                            audit
                                .record(
                                    OperationType::CircuitBreaker,
                                    "resource",
                                    &name,
                                    OperationStatus::Failed,
                                    "Circuit breaker opened",
                                    Some(&format!("{} -> {} at {}", old, new, at.to_rfc3339())),
                                )
                                .await;
                        }
                        CircuitState::HalfOpen | CircuitState::Closed => {
                            info!(
                                breaker = %name,
                                from = %old,
                                to = %new,
                                "Circuit breaker state changed"
                            );
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(breaker = %name, skipped, "Breaker notifier lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
