//! Durable schedule of delayed shipment transitions.
//!
//! The carrier simulation drives shipments forward on a delay. Pending
//! transitions live in a store, not in process-local timers, so a restart
//! resumes the progression instead of losing it.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ShipmentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::shipment::ShipmentStatus;

/// A shipment transition scheduled for a future time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTransition {
    pub task_id: Uuid,
    pub shipment_id: ShipmentId,
    pub to: ShipmentStatus,
    pub due_at: DateTime<Utc>,
}

impl ScheduledTransition {
    /// Creates a transition task due at the given time.
    pub fn new(shipment_id: ShipmentId, to: ShipmentStatus, due_at: DateTime<Utc>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            shipment_id,
            to,
            due_at,
        }
    }
}

/// Trait for the delayed-transition task queue.
#[async_trait]
pub trait TransitionSchedule: Send + Sync {
    /// Enqueues a transition.
    async fn schedule(&self, transition: ScheduledTransition) -> Result<()>;

    /// Claims and returns every transition due at or before `now`, oldest
    /// first. A claimed transition is never returned again.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTransition>>;

    /// Returns the number of transitions still waiting.
    async fn pending_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct InMemoryScheduleState {
    tasks: Vec<ScheduledTransition>,
    fail_on_write: bool,
}

/// In-memory transition schedule.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransitionSchedule {
    state: Arc<RwLock<InMemoryScheduleState>>,
}

impl InMemoryTransitionSchedule {
    /// Creates a new empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures writes to fail, simulating an unreachable backend.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.state.write().unwrap().fail_on_write = fail;
    }
}

#[async_trait]
impl TransitionSchedule for InMemoryTransitionSchedule {
    async fn schedule(&self, transition: ScheduledTransition) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_write {
            return Err(StoreError::Unavailable("transition schedule".to_string()));
        }

        state.tasks.push(transition);
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTransition>> {
        let mut state = self.state.write().unwrap();

        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.tasks.drain(..).partition(|t| t.due_at <= now);
        state.tasks = pending;

        due.sort_by_key(|t| t.due_at);
        Ok(due)
    }

    async fn pending_count(&self) -> usize {
        self.state.read().unwrap().tasks.len()
    }
}
