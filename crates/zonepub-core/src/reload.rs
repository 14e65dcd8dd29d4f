//! Reload planning state machine.
//!
//! ```text
//! Idle --decide--> Decided(plan) --apply--> Applied(plan)
//!                                     \---> Failed(plan)
//! ```
//!
//! Rules, in order:
//! 1. config changed            -> `Full` (bindings, keys, ACLs may all differ)
//! 2. zones deleted on target   -> `Full` (the zone list changed)
//! 3. zones changed on target   -> `Selective(zones)`
//! 4. otherwise                 -> `NoOp` (no remote call at all)
//!
//! Config diffs are never inspected to narrow a full reload down.

use tracing::debug;

use crate::collaborators::ControlPlane;
use crate::error::PlannerError;
use crate::model::{ChangeSet, ReloadPlan};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerState {
    Idle,
    Decided(ReloadPlan),
    Applied(ReloadPlan),
    Failed { plan: ReloadPlan, error: String },
}

impl PlannerState {
    fn label(&self) -> &'static str {
        match self {
            PlannerState::Idle => "idle",
            PlannerState::Decided(_) => "decided",
            PlannerState::Applied(_) => "applied",
            PlannerState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct ReloadPlanner {
    state: PlannerState,
}

impl Default for ReloadPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadPlanner {
    pub fn new() -> Self {
        Self {
            state: PlannerState::Idle,
        }
    }

    pub fn state(&self) -> &PlannerState {
        &self.state
    }

    /// The plan a post-transfer change set calls for.
    pub fn plan_for(changes: &ChangeSet) -> ReloadPlan {
        if changes.config_changed || !changes.deleted_zones.is_empty() {
            ReloadPlan::Full
        } else if !changes.changed_zones.is_empty() {
            ReloadPlan::Selective(changes.changed_zones.clone())
        } else {
            ReloadPlan::NoOp
        }
    }

    /// `Idle -> Decided`.
    pub fn decide(&mut self, changes: &ChangeSet) -> Result<ReloadPlan, PlannerError> {
        if self.state != PlannerState::Idle {
            return Err(PlannerError::InvalidTransition {
                action: "decide",
                state: self.state.label(),
            });
        }
        let plan = Self::plan_for(changes);
        debug!(plan = %plan, "reload plan decided");
        self.state = PlannerState::Decided(plan.clone());
        Ok(plan)
    }

    /// `Decided -> Applied | Failed`. `NoOp` never touches the control plane.
    pub async fn apply(&mut self, control: &dyn ControlPlane) -> Result<ReloadPlan, PlannerError> {
        let plan = match &self.state {
            PlannerState::Decided(plan) => plan.clone(),
            other => {
                return Err(PlannerError::InvalidTransition {
                    action: "apply",
                    state: other.label(),
                })
            }
        };

        let outcome = match &plan {
            ReloadPlan::NoOp => Ok(()),
            ReloadPlan::Full => control.reload().await,
            ReloadPlan::Selective(zones) => control.reload_zones(zones).await,
        };

        match outcome {
            Ok(()) => {
                debug!(plan = %plan, "reload applied");
                self.state = PlannerState::Applied(plan.clone());
                Ok(plan)
            }
            Err(source) => {
                self.state = PlannerState::Failed {
                    plan: plan.clone(),
                    error: source.to_string(),
                };
                Err(PlannerError::ControlPlane { plan, source })
            }
        }
    }
}
