use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::Result,
    indicator::{GREEN_COMMAND, RED_COMMAND},
    types::SequencerConfig,
};

/// Something the sequencer drives once a link is ready
#[async_trait]
pub trait SequenceTarget: Send + Sync {
    /// Write the target characteristic
    ///
    /// Fails with [`LinkError::PreconditionFailed`](crate::LinkError::PreconditionFailed)
    /// when the link is no longer ready.
    async fn write_value(&self, value: Bytes) -> Result<()>;

    /// Disconnect if the link is still up; returns whether a disconnect was issued
    async fn disconnect_if_connected(&self) -> Result<bool>;
}

/// Action taken by one plan step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Write the payload to the target characteristic
    Write(Bytes),
    /// Disconnect if still connected
    Disconnect,
}

/// One scheduled step, offset from activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    /// Offset from activation
    pub at: Duration,
    /// What to do
    pub action: StepAction,
}

/// What happened to a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Performed
    Executed,
    /// Fired but its precondition failed
    Skipped,
    /// Never fired; the activation was cancelled first
    Cancelled,
}

/// Timed write plan issued after a link becomes ready
#[derive(Debug, Clone)]
pub struct CommandSequencer {
    plan: Vec<SequenceStep>,
}

impl CommandSequencer {
    /// Build the `RED`, `GREEN`, disconnect plan from `config`
    #[must_use]
    pub fn new(config: &SequencerConfig) -> Self {
        let mut plan = vec![
            SequenceStep {
                at: Duration::from_millis(config.red_at_ms),
                action: StepAction::Write(Bytes::from_static(RED_COMMAND.as_bytes())),
            },
            SequenceStep {
                at: Duration::from_millis(config.green_at_ms),
                action: StepAction::Write(Bytes::from_static(GREEN_COMMAND.as_bytes())),
            },
            SequenceStep {
                at: Duration::from_millis(config.disconnect_at_ms),
                action: StepAction::Disconnect,
            },
        ];
        plan.sort_by_key(|step| step.at);
        Self { plan }
    }

    /// Steps in firing order
    #[must_use]
    pub fn plan(&self) -> &[SequenceStep] {
        &self.plan
    }

    /// Start the plan now
    ///
    /// Every step fires at its own offset from this instant. Cancelling
    /// `token` drops every step that has not fired yet.
    pub fn activate<S>(&self, target: S, token: CancellationToken) -> JoinHandle<Vec<StepOutcome>>
    where
        S: SequenceTarget + 'static,
    {
        let plan = self.plan.clone();
        let start = Instant::now();
        info!("Command sequence activated ({} steps)", plan.len());

        tokio::spawn(async move { run_plan(plan, target, token, start).await })
    }
}

impl Default for CommandSequencer {
    fn default() -> Self {
        Self::new(&SequencerConfig::default())
    }
}

async fn run_plan<S: SequenceTarget>(
    plan: Vec<SequenceStep>,
    target: S,
    token: CancellationToken,
    start: Instant,
) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(plan.len());

    for step in &plan {
        let cancelled = tokio::select! {
            biased;
            () = token.cancelled() => true,
            () = sleep_until(start + step.at) => false,
        };

        if cancelled {
            debug!(
                "Command sequence cancelled, dropping {} pending step(s)",
                plan.len() - outcomes.len()
            );
            outcomes.resize(plan.len(), StepOutcome::Cancelled);
            break;
        }

        outcomes.push(run_step(&target, step).await);
    }

    outcomes
}

async fn run_step<S: SequenceTarget>(target: &S, step: &SequenceStep) -> StepOutcome {
    match &step.action {
        StepAction::Write(value) => match target.write_value(value.clone()).await {
            Ok(()) => {
                debug!("Sequenced write {:?} at +{:?}", value, step.at);
                StepOutcome::Executed
            }
            Err(e) if e.is_absorbed() => {
                info!("Skipping sequenced write {:?}: {}", value, e);
                StepOutcome::Skipped
            }
            Err(e) => {
                error!("Sequenced write {:?} failed: {}", value, e);
                StepOutcome::Skipped
            }
        },
        StepAction::Disconnect => match target.disconnect_if_connected().await {
            Ok(true) => StepOutcome::Executed,
            Ok(false) => {
                debug!("Link already down at +{:?}, nothing to disconnect", step.at);
                StepOutcome::Skipped
            }
            Err(e) => {
                error!("Sequenced disconnect failed: {}", e);
                StepOutcome::Skipped
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingTarget {
        calls: Arc<Mutex<Vec<(Duration, String)>>>,
        refuse_writes: Arc<Mutex<Vec<String>>>,
        origin: Arc<Mutex<Option<Instant>>>,
    }

    impl RecordingTarget {
        fn started_now() -> Self {
            let target = Self::default();
            *target.origin.lock().unwrap() = Some(Instant::now());
            target
        }

        fn record(&self, what: String) {
            let origin = self.origin.lock().unwrap().unwrap();
            self.calls.lock().unwrap().push((origin.elapsed(), what));
        }

        fn calls(&self) -> Vec<(Duration, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SequenceTarget for RecordingTarget {
        async fn write_value(&self, value: Bytes) -> Result<()> {
            let text = String::from_utf8_lossy(&value).into_owned();
            if self.refuse_writes.lock().unwrap().contains(&text) {
                return Err(LinkError::precondition("session not ready"));
            }
            self.record(text);
            Ok(())
        }

        async fn disconnect_if_connected(&self) -> Result<bool> {
            self.record("disconnect".to_string());
            Ok(true)
        }
    }

    #[test]
    fn test_default_plan_order() {
        let sequencer = CommandSequencer::default();
        let actions: Vec<_> = sequencer.plan().iter().map(|s| s.action.clone()).collect();

        assert_eq!(
            actions,
            vec![
                StepAction::Write(Bytes::from_static(b"RED")),
                StepAction::Write(Bytes::from_static(b"GREEN")),
                StepAction::Disconnect,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_fire_at_offsets_from_activation() {
        let target = RecordingTarget::started_now();
        let handle = CommandSequencer::default().activate(target.clone(), CancellationToken::new());

        let outcomes = handle.await.unwrap();
        assert_eq!(outcomes, vec![StepOutcome::Executed; 3]);
        assert_eq!(
            target.calls(),
            vec![
                (Duration::from_millis(1000), "RED".to_string()),
                (Duration::from_millis(2000), "GREEN".to_string()),
                (Duration::from_millis(3000), "disconnect".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_write_is_skipped_not_reordered() {
        let target = RecordingTarget::started_now();
        target.refuse_writes.lock().unwrap().push("RED".to_string());

        let outcomes = CommandSequencer::default()
            .activate(target.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Skipped,
                StepOutcome::Executed,
                StepOutcome::Executed
            ]
        );
        assert_eq!(target.calls()[0], (Duration::from_millis(2000), "GREEN".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_pending_steps() {
        let target = RecordingTarget::started_now();
        let token = CancellationToken::new();
        let handle = CommandSequencer::default().activate(target.clone(), token.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        token.cancel();

        let outcomes = handle.await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Executed,
                StepOutcome::Cancelled,
                StepOutcome::Cancelled
            ]
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(target.calls().len(), 1);
    }

    #[test]
    fn test_custom_offsets_are_sorted() {
        let sequencer = CommandSequencer::new(&SequencerConfig {
            red_at_ms: 300,
            green_at_ms: 100,
            disconnect_at_ms: 200,
        });

        let offsets: Vec<_> = sequencer.plan().iter().map(|s| s.at.as_millis()).collect();
        assert_eq!(offsets, vec![100, 200, 300]);
    }
}
