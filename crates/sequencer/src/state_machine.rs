use outreach_core::types::SequenceStatus;

/// A single permitted status change for a prospect sequence.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition {
    pub from: SequenceStatus,
    pub to: SequenceStatus,
    pub trigger: &'static str,
}

const TRANSITIONS: &[StateTransition] = &[
    // Pending ->
    StateTransition {
        from: SequenceStatus::Pending,
        to: SequenceStatus::Sending,
        trigger: "enrollment_due",
    },
    // Waiting ->
    StateTransition {
        from: SequenceStatus::Waiting,
        to: SequenceStatus::GateChecking,
        trigger: "wait_elapsed",
    },
    // GateChecking ->
    StateTransition {
        from: SequenceStatus::GateChecking,
        to: SequenceStatus::Sending,
        trigger: "gate_passed",
    },
    StateTransition {
        from: SequenceStatus::GateChecking,
        to: SequenceStatus::StoppedReplied,
        trigger: "prospect_replied",
    },
    StateTransition {
        from: SequenceStatus::GateChecking,
        to: SequenceStatus::StoppedDisengaged,
        trigger: "prospect_disengaged",
    },
    StateTransition {
        from: SequenceStatus::GateChecking,
        to: SequenceStatus::StoppedNotConnected,
        trigger: "connection_not_accepted",
    },
    // Sending ->
    StateTransition {
        from: SequenceStatus::Sending,
        to: SequenceStatus::Sending,
        trigger: "send_attempt",
    },
    StateTransition {
        from: SequenceStatus::Sending,
        to: SequenceStatus::Waiting,
        trigger: "step_sent",
    },
    StateTransition {
        from: SequenceStatus::Sending,
        to: SequenceStatus::Completed,
        trigger: "final_step_sent",
    },
    StateTransition {
        from: SequenceStatus::Sending,
        to: SequenceStatus::Failed,
        trigger: "send_failed",
    },
];

/// The trigger name for `from -> to`, or `None` when the move is not allowed.
/// Terminal states never move; any live state may be cancelled.
pub fn trigger_for(from: SequenceStatus, to: SequenceStatus) -> Option<&'static str> {
    if from.is_terminal() {
        return None;
    }
    if to == SequenceStatus::StoppedCancelled {
        return Some("cancelled");
    }
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.to == to)
        .map(|t| t.trigger)
}

pub fn can_transition(from: SequenceStatus, to: SequenceStatus) -> bool {
    trigger_for(from, to).is_some()
}

/// Every status reachable from `from` in one move.
pub fn valid_targets(from: SequenceStatus) -> Vec<SequenceStatus> {
    if from.is_terminal() {
        return Vec::new();
    }
    let mut targets: Vec<SequenceStatus> = TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.to)
        .collect();
    targets.push(SequenceStatus::StoppedCancelled);
    targets
}
