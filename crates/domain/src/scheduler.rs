//! Background task scheduling capability.
//!
//! Services never run background work inline. They hand a [`Task`] to a
//! [`Scheduler`], and a worker runtime executes it later.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::TransactionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// Units of background work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "transaction_id")]
pub enum Task {
    /// Run one processing attempt for a transaction.
    ProcessTransaction(TransactionId),

    /// Hand a failed transaction to manual review.
    HandleDeadLetter(TransactionId),

    /// Deliver a batch of pending outbox messages.
    DeliverOutbox,

    /// Sweep for stuck or forgotten transactions.
    Reconcile,
}

impl Task {
    /// Returns the task name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Task::ProcessTransaction(_) => "process_transaction",
            Task::HandleDeadLetter(_) => "handle_dead_letter",
            Task::DeliverOutbox => "deliver_outbox",
            Task::Reconcile => "reconcile",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::ProcessTransaction(id) | Task::HandleDeadLetter(id) => {
                write!(f, "{}({})", self.name(), id)
            }
            Task::DeliverOutbox | Task::Reconcile => write!(f, "{}", self.name()),
        }
    }
}

/// Errors that can occur when scheduling a task.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The worker side has shut down.
    #[error("Scheduler is closed")]
    Closed,

    /// The recurring schedule could not be parsed.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The scheduler refused the task.
    #[error("Task rejected: {0}")]
    Rejected(String),
}

/// Capability for handing work to background workers.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Enqueues a task for immediate execution.
    async fn enqueue(&self, task: Task) -> Result<(), SchedulerError>;

    /// Enqueues a task to run once after `delay`.
    async fn schedule_after(&self, task: Task, delay: Duration) -> Result<(), SchedulerError>;

    /// Runs a task on a recurring cron schedule (seconds field included).
    async fn schedule_recurring(
        &self,
        task: Task,
        cron_expression: &str,
    ) -> Result<(), SchedulerError>;
}

#[async_trait]
impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        (**self).enqueue(task).await
    }

    async fn schedule_after(&self, task: Task, delay: Duration) -> Result<(), SchedulerError> {
        (**self).schedule_after(task, delay).await
    }

    async fn schedule_recurring(
        &self,
        task: Task,
        cron_expression: &str,
    ) -> Result<(), SchedulerError> {
        (**self).schedule_recurring(task, cron_expression).await
    }
}

fn parse_schedule(expression: &str) -> Result<cron::Schedule, SchedulerError> {
    cron::Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// A task recorded by [`InMemoryScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task: Task,

    /// Delay requested via `schedule_after`.
    pub delay: Option<Duration>,

    /// Cron expression requested via `schedule_recurring`.
    pub recurring: Option<String>,
}

/// Scheduler that records tasks instead of running them.
///
/// For tests: lets callers assert exactly what was scheduled and drive
/// execution by hand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduler {
    scheduled: Arc<Mutex<Vec<ScheduledTask>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryScheduler {
    /// Creates a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Rejected` until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns every task scheduled so far.
    pub async fn scheduled(&self) -> Vec<ScheduledTask> {
        self.scheduled.lock().await.clone()
    }

    /// Removes and returns every task scheduled so far.
    pub async fn take(&self) -> Vec<ScheduledTask> {
        std::mem::take(&mut *self.scheduled.lock().await)
    }

    /// Returns how many scheduled tasks equal `task`.
    pub async fn count(&self, task: &Task) -> usize {
        self.scheduled
            .lock()
            .await
            .iter()
            .filter(|s| &s.task == task)
            .count()
    }

    async fn record(&self, scheduled: ScheduledTask) -> Result<(), SchedulerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::Rejected(format!(
                "in-memory scheduler refused {}",
                scheduled.task
            )));
        }
        self.scheduled.lock().await.push(scheduled);
        Ok(())
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        self.record(ScheduledTask {
            task,
            delay: None,
            recurring: None,
        })
        .await
    }

    async fn schedule_after(&self, task: Task, delay: Duration) -> Result<(), SchedulerError> {
        self.record(ScheduledTask {
            task,
            delay: Some(delay),
            recurring: None,
        })
        .await
    }

    async fn schedule_recurring(
        &self,
        task: Task,
        cron_expression: &str,
    ) -> Result<(), SchedulerError> {
        parse_schedule(cron_expression)?;
        self.record(ScheduledTask {
            task,
            delay: None,
            recurring: Some(cron_expression.to_string()),
        })
        .await
    }
}

/// Scheduler that feeds tasks into an unbounded channel.
///
/// Delayed and recurring tasks are held by spawned timers, so they are lost
/// if the process exits before they fire; the reconciler recovers them.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    sender: mpsc::UnboundedSender<Task>,
}

impl ChannelScheduler {
    /// Creates a scheduler and the receiver a worker should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Scheduler for ChannelScheduler {
    async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        self.sender.send(task).map_err(|_| SchedulerError::Closed)
    }

    async fn schedule_after(&self, task: Task, delay: Duration) -> Result<(), SchedulerError> {
        if self.sender.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = sender.send(task) {
                tracing::warn!(task = %err.0, "Dropping delayed task, scheduler closed");
            }
        });
        Ok(())
    }

    async fn schedule_recurring(
        &self,
        task: Task,
        cron_expression: &str,
    ) -> Result<(), SchedulerError> {
        let schedule = parse_schedule(cron_expression)?;
        let sender = self.sender.clone();
        let expression = cron_expression.to_string();

        tokio::spawn(async move {
            while let Some(next) = schedule.upcoming(Utc).next() {
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                if sender.send(task.clone()).is_err() {
                    break;
                }
            }
            tracing::debug!(task = %task, schedule = %expression, "Recurring task stopped");
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_display() {
        let id = TransactionId::new();
        assert_eq!(
            Task::ProcessTransaction(id).to_string(),
            format!("process_transaction({id})")
        );
        assert_eq!(Task::DeliverOutbox.to_string(), "deliver_outbox");
    }

    #[tokio::test]
    async fn test_in_memory_scheduler_records_tasks() {
        let scheduler = InMemoryScheduler::new();
        let id = TransactionId::new();

        scheduler
            .enqueue(Task::ProcessTransaction(id))
            .await
            .unwrap();
        scheduler
            .schedule_after(Task::ProcessTransaction(id), Duration::from_secs(120))
            .await
            .unwrap();

        let scheduled = scheduler.scheduled().await;
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0].delay, None);
        assert_eq!(scheduled[1].delay, Some(Duration::from_secs(120)));
        assert_eq!(scheduler.count(&Task::ProcessTransaction(id)).await, 2);

        assert_eq!(scheduler.take().await.len(), 2);
        assert!(scheduler.scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_scheduler_can_fail() {
        let scheduler = InMemoryScheduler::new();
        scheduler.set_fail(true);

        let result = scheduler.enqueue(Task::Reconcile).await;
        assert!(matches!(result, Err(SchedulerError::Rejected(_))));
        assert!(scheduler.scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_cron_expression_is_rejected() {
        let scheduler = InMemoryScheduler::new();
        let result = scheduler
            .schedule_recurring(Task::DeliverOutbox, "not a schedule")
            .await;
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidSchedule { .. })
        ));
    }

    #[tokio::test]
    async fn test_channel_scheduler_delivers_immediately() {
        let (scheduler, mut receiver) = ChannelScheduler::new();
        scheduler.enqueue(Task::DeliverOutbox).await.unwrap();

        assert_eq!(receiver.recv().await, Some(Task::DeliverOutbox));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_scheduler_delays_task() {
        let (scheduler, mut receiver) = ChannelScheduler::new();
        let id = TransactionId::new();

        scheduler
            .schedule_after(Task::ProcessTransaction(id), Duration::from_secs(240))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(receiver.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(receiver.recv().await, Some(Task::ProcessTransaction(id)));
    }

    #[tokio::test]
    async fn test_channel_scheduler_reports_closed() {
        let (scheduler, receiver) = ChannelScheduler::new();
        drop(receiver);

        let result = scheduler.enqueue(Task::Reconcile).await;
        assert!(matches!(result, Err(SchedulerError::Closed)));
    }
}
