use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use outreach_core::config::SequenceConfig;

/// Preconditions evaluated immediately before a step is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    pub check_reply: bool,
    pub check_connection_accepted: bool,
}

impl GateSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.check_reply && !self.check_connection_accepted
    }
}

/// One message in a sequence. The delay range is measured from the previous
/// step's send and is ignored for the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub message_key: String,
    pub delay_min_hours: u32,
    pub delay_max_hours: u32,
    pub gate: GateSpec,
}

impl Step {
    /// The opening step (CR): no delay, no gate.
    pub fn initial(step_id: impl Into<String>, message_key: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            message_key: message_key.into(),
            delay_min_hours: 0,
            delay_max_hours: 0,
            gate: GateSpec::none(),
        }
    }

    /// A follow-up gated on both reply and connection status.
    pub fn follow_up(
        step_id: impl Into<String>,
        message_key: impl Into<String>,
        delay_min_hours: u32,
        delay_max_hours: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            message_key: message_key.into(),
            delay_min_hours,
            delay_max_hours,
            gate: GateSpec {
                check_reply: true,
                check_connection_accepted: true,
            },
        }
    }

    pub fn with_gate(mut self, gate: GateSpec) -> Self {
        self.gate = gate;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("sequence for campaign {0} has no steps")]
    Empty(Uuid),

    #[error("duplicate step id {0}")]
    DuplicateStepId(String),

    #[error("step {step_id} has invalid delay range [{min}, {max}] hours")]
    InvalidDelay { step_id: String, min: u32, max: u32 },

    #[error("first step {0} cannot be gated on an accepted connection")]
    ConnectionGateOnFirstStep(String),

    #[error("campaign {0} already has a different sequence registered")]
    AlreadyRegistered(Uuid),
}

/// Validated, immutable step list for one campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDefinition {
    campaign_id: Uuid,
    steps: Vec<Step>,
}

impl SequenceDefinition {
    pub fn new(campaign_id: Uuid, steps: Vec<Step>) -> Result<Self, DefinitionError> {
        let first = steps.first().ok_or(DefinitionError::Empty(campaign_id))?;
        if first.gate.check_connection_accepted {
            return Err(DefinitionError::ConnectionGateOnFirstStep(first.step_id.clone()));
        }

        let mut seen = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            if !seen.insert(step.step_id.as_str()) {
                return Err(DefinitionError::DuplicateStepId(step.step_id.clone()));
            }
            let positive = index == 0 || step.delay_min_hours > 0;
            if !positive || step.delay_min_hours > step.delay_max_hours {
                return Err(DefinitionError::InvalidDelay {
                    step_id: step.step_id.clone(),
                    min: step.delay_min_hours,
                    max: step.delay_max_hours,
                });
            }
        }

        Ok(Self { campaign_id, steps })
    }

    pub fn campaign_id(&self) -> Uuid {
        self.campaign_id
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a validated definition.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl TryFrom<&SequenceConfig> for SequenceDefinition {
    type Error = DefinitionError;

    fn try_from(config: &SequenceConfig) -> Result<Self, Self::Error> {
        let steps = config
            .steps
            .iter()
            .map(|s| Step {
                step_id: s.step_id.clone(),
                message_key: s.message_key.clone(),
                delay_min_hours: s.delay_min_hours,
                delay_max_hours: s.delay_max_hours,
                gate: GateSpec {
                    check_reply: s.check_reply,
                    check_connection_accepted: s.check_connection_accepted,
                },
            })
            .collect();
        SequenceDefinition::new(config.campaign_id, steps)
    }
}

/// Campaign id -> sequence definition.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    definitions: DashMap<Uuid, Arc<SequenceDefinition>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition. Re-registering the identical definition is a
    /// no-op; replacing a campaign's steps is rejected.
    pub fn register(&self, definition: SequenceDefinition) -> Result<Arc<SequenceDefinition>, DefinitionError> {
        let campaign_id = definition.campaign_id;
        match self.definitions.entry(campaign_id) {
            Entry::Occupied(existing) => {
                if **existing.get() == definition {
                    Ok(existing.get().clone())
                } else {
                    Err(DefinitionError::AlreadyRegistered(campaign_id))
                }
            }
            Entry::Vacant(slot) => {
                info!(campaign_id = %campaign_id, steps = definition.len(), "Registered sequence");
                Ok(slot.insert(Arc::new(definition)).clone())
            }
        }
    }

    pub fn get(&self, campaign_id: &Uuid) -> Option<Arc<SequenceDefinition>> {
        self.definitions.get(campaign_id).map(|d| d.clone())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
