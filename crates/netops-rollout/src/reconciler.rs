//! Plugs the state machine into the controller runtime.

use std::time::Duration;

use async_trait::async_trait;
use netops_state::{
    Action, Event, ObjectKey, ObjectKind, ReconcileError, Reconciler, StateError, StateStore,
};
use tracing::debug;

use crate::machine;

/// Requeue delay after losing a write race with a device reconciler.
const CONFLICT_RETRY: Duration = Duration::from_millis(100);

pub struct RolloutReconciler {
    store: StateStore,
}

impl RolloutReconciler {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Keys to reconcile for a store event: the rollout itself, or the
    /// rollout a changed device belongs to.
    pub fn keys_for(store: &StateStore, event: &Event) -> Vec<ObjectKey> {
        match event.kind {
            ObjectKind::Rollout => vec![event.key.clone()],
            ObjectKind::Device => match store.get_device(&event.key) {
                Ok(Some(device)) => device.rollout_key().into_iter().collect(),
                _ => Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Reconciler for RolloutReconciler {
    fn name(&self) -> &'static str {
        "rollout"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(current) = self.store.get_rollout(key)? else {
            debug!(rollout = %key, "rollout gone");
            return Ok(Action::Done);
        };

        let mut next = current.clone();
        let transition = machine::reconcile(&mut next);
        if next == current {
            return Ok(Action::Done);
        }

        // Device reconcilers patch the same object; the version check
        // makes a concurrent patch win and this pass run again.
        match self.store.put_rollout(&next) {
            Ok(stored) => {
                debug!(
                    rollout = %key,
                    ?transition,
                    status = ?stored.status.status,
                    version = stored.metadata.resource_version,
                    "rollout status updated"
                );
                // The write raises an event, which brings the rollout back
                // for its next step.
                Ok(Action::Done)
            }
            Err(StateError::Conflict { .. }) => Ok(Action::RequeueAfter(CONFLICT_RETRY)),
            Err(e) => Err(e.into()),
        }
    }
}
