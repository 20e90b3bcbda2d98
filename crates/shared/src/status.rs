use serde::{Deserialize, Serialize};

/// Forward-progress milestones in display order. Customs hold is not part of
/// this sequence; it is tracked as a separate flag on the shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    Created,
    Dispatched,
    InTransit,
    Processing,
    OutForDelivery,
    Delivered,
}

pub const MILESTONES: [Milestone; 6] = [
    Milestone::Created,
    Milestone::Dispatched,
    Milestone::InTransit,
    Milestone::Processing,
    Milestone::OutForDelivery,
    Milestone::Delivered,
];

pub const CUSTOMS_HOLD_STATUS: &str = "Customs Hold";
pub const CUSTOMS_CLEARED_STATUS: &str = "Customs Cleared";
pub const CREATED_NOTE: &str = "Shipment created and ready for pickup";
pub const CUSTOMS_HOLD_NOTE: &str = "Package held by customs for inspection";
pub const CUSTOMS_CLEARED_NOTE: &str = "Package cleared customs and ready for delivery";
pub const FALLBACK_DESCRIPTION: &str = "Status will be updated soon.";
pub const CUSTOMS_HOLD_NOTICE: &str =
    "Your goods have been held by customs. Please message customer service for assistance. Thank you.";

impl Milestone {
    pub fn label(self) -> &'static str {
        match self {
            Milestone::Created => "Created",
            Milestone::Dispatched => "Dispatched",
            Milestone::InTransit => "In Transit",
            Milestone::Processing => "Processing",
            Milestone::OutForDelivery => "Out for Delivery",
            Milestone::Delivered => "Delivered",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Milestone::Created => "Your shipment has been created and is awaiting pickup.",
            Milestone::Dispatched => "Your package has left the origin facility.",
            Milestone::InTransit => "Your package is on its way to the destination.",
            Milestone::Processing => "Your package is being processed at a sorting facility.",
            Milestone::OutForDelivery => "Your package is out for delivery and will arrive soon.",
            Milestone::Delivered => "Your package has been delivered.",
        }
    }

    pub fn index(self) -> usize {
        MILESTONES
            .iter()
            .position(|milestone| *milestone == self)
            .unwrap_or_default()
    }

    /// Exact match against the milestone labels, ignoring ASCII case only.
    pub fn match_status(status: &str) -> Option<Self> {
        MILESTONES
            .into_iter()
            .find(|milestone| milestone.label().eq_ignore_ascii_case(status))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Completed,
    Current,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub milestone: Milestone,
    pub label: String,
    pub state: StepState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusProgress {
    /// Position of the current status in [`MILESTONES`]; `None` when the
    /// status is not a milestone.
    pub current_index: Option<usize>,
    pub steps: Vec<ProgressStep>,
    pub percent: f64,
    pub description: String,
}

impl StatusProgress {
    pub fn count(&self, state: StepState) -> usize {
        self.steps.iter().filter(|step| step.state == state).count()
    }
}

pub fn describe_status(status: &str) -> &'static str {
    if let Some(milestone) = Milestone::match_status(status) {
        return milestone.description();
    }
    if status.eq_ignore_ascii_case(CUSTOMS_HOLD_STATUS) {
        return "Your package is being held by customs for inspection.";
    }
    if status.eq_ignore_ascii_case(CUSTOMS_CLEARED_STATUS) {
        return "Your package has cleared customs and is ready for delivery.";
    }
    FALLBACK_DESCRIPTION
}

/// Derives the progress bar from the shipment's current status alone. The
/// event log is never consulted here.
pub fn derive_progress(current_status: &str) -> StatusProgress {
    let current_index = Milestone::match_status(current_status).map(Milestone::index);
    let steps = MILESTONES
        .iter()
        .enumerate()
        .map(|(i, milestone)| {
            let state = match current_index {
                Some(current) if i < current => StepState::Completed,
                Some(current) if i == current => StepState::Current,
                _ => StepState::Pending,
            };
            ProgressStep {
                milestone: *milestone,
                label: milestone.label().to_string(),
                state,
            }
        })
        .collect();
    let percent = current_index
        .map(|index| (index + 1) as f64 / MILESTONES.len() as f64 * 100.0)
        .unwrap_or(0.0);

    StatusProgress {
        current_index,
        steps,
        percent,
        description: describe_status(current_status).to_string(),
    }
}

#[cfg(test)]
#[path = "tests/status_tests.rs"]
mod tests;
