/*!
 * CLI progress renderer for interactive terminal display
 *
 * Consumes notifications from a [`ChannelNotifier`] and renders batch
 * progress, connection milestones and breaker changes on stderr.
 */

use crate::cli_style::{Icons, Theme};
use roster_core_interface::{ChannelNotifier, ConnectStage, Notification};
use std::io::{self, Write};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Per-batch state for rate and ETA
struct BatchState {
    start_time: Instant,
    accounted: usize,
    total: usize,
}

impl BatchState {
    fn progress_pct(&self) -> f64 {
        if self.total > 0 {
            (self.accounted as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }

    fn eta_seconds(&self) -> Option<u64> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 && self.accounted > 0 {
            let rate = self.accounted as f64 / elapsed;
            let remaining = self.total.saturating_sub(self.accounted);
            Some((remaining as f64 / rate) as u64)
        } else {
            None
        }
    }
}

/// CLI progress renderer
pub struct CliProgressRenderer {
    rx: mpsc::Receiver<Notification>,
    batch: Option<BatchState>,
    verbose: bool,
}

impl CliProgressRenderer {
    /// Notifier to hand to the connection manager, and the renderer reading it
    pub fn channel(capacity: usize, verbose: bool) -> (ChannelNotifier, Self) {
        let (notifier, rx) = ChannelNotifier::new(capacity);
        (
            notifier,
            Self {
                rx,
                batch: None,
                verbose,
            },
        )
    }

    /// Render until every notifier is dropped
    pub async fn run(mut self) {
        while let Some(notification) = self.rx.recv().await {
            if let Err(e) = self.handle(notification) {
                tracing::debug!(error = %e, "Progress output failed");
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn handle(&mut self, notification: Notification) -> io::Result<()> {
        let mut err = io::stderr();
        match notification {
            Notification::BatchProgress {
                processed,
                failed,
                total,
                ..
            } => {
                let state = self.batch.get_or_insert_with(|| BatchState {
                    start_time: Instant::now(),
                    accounted: 0,
                    total,
                });
                state.accounted = processed + failed;
                state.total = total;

                write!(
                    err,
                    "\r   {} {:>6.1}%  {}/{}",
                    progress_bar(state.progress_pct(), 30),
                    state.progress_pct(),
                    state.accounted,
                    total
                )?;
                if failed > 0 {
                    write!(err, "  {}", Theme::error(format!("{} failed", failed)))?;
                }
                if let Some(eta) = state.eta_seconds() {
                    write!(err, "  ETA: {}", format_eta(eta))?;
                }
                err.flush()?;
            }
            Notification::BatchFinished { status, message, .. } => {
                self.batch = None;
                writeln!(err, "\r   {} {}: {}", Icons::SUCCESS, status, message)?;
            }
            Notification::Connection { stage, message } => {
                if self.verbose || matches!(stage, ConnectStage::Failed | ConnectStage::Connected) {
                    writeln!(err, "{} {}", Theme::muted(Icons::ARROW_RIGHT), message)?;
                }
            }
            Notification::CircuitStateChanged { old, new, .. } => {
                writeln!(
                    err,
                    "\n{} Circuit {} {} {}",
                    Theme::warning(Icons::WARNING),
                    old,
                    Icons::ARROW_RIGHT,
                    new
                )?;
            }
            Notification::CircuitNearThreshold {
                failures,
                threshold,
            } => {
                if self.verbose {
                    writeln!(
                        err,
                        "\n{} {} of {} failures before the circuit opens",
                        Theme::warning(Icons::WARNING),
                        failures,
                        threshold
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Text progress bar
fn progress_bar(percentage: f64, width: usize) -> String {
    let filled = (((percentage / 100.0) * width as f64) as usize).min(width);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

fn format_eta(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core_interface::Notifier;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(50.0, 4), "[██░░]");
        assert_eq!(progress_bar(150.0, 2), "[██]");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(30), "30s");
        assert_eq!(format_eta(90), "1m 30s");
        assert_eq!(format_eta(3661), "1h 1m");
    }

    #[test]
    fn test_batch_state_progress() {
        let state = BatchState {
            start_time: Instant::now(),
            accounted: 30,
            total: 120,
        };
        assert!((state.progress_pct() - 25.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_renderer_stops_when_notifier_dropped() {
        let (notifier, renderer) = CliProgressRenderer::channel(8, false);
        let handle = renderer.spawn();
        notifier.notify(Notification::BatchProgress {
            operation_id: "op".into(),
            processed: 1,
            failed: 0,
            total: 2,
        });
        drop(notifier);
        handle.await.unwrap();
    }
}
