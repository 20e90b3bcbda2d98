use serde::{Deserialize, Serialize};

use crate::{
    badge::{classify_status, status_icon, StatusIcon, StatusTone},
    protocol::{PublicShipment, PublicShipmentEvent, TrackingSnapshot},
    status::{derive_progress, StatusProgress, CUSTOMS_HOLD_NOTICE},
};

/// Everything the tracking page renders, recomputed from scratch on every
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingView {
    pub shipment: PublicShipment,
    /// Audit history, most recent first.
    pub events: Vec<PublicShipmentEvent>,
    pub progress: StatusProgress,
    pub tone: StatusTone,
    pub icon: StatusIcon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customs_notice: Option<String>,
    pub share_path: String,
}

impl TrackingView {
    pub fn derive(snapshot: TrackingSnapshot) -> Self {
        let TrackingSnapshot { shipment, mut events } = snapshot;
        sort_for_display(&mut events);

        let status = shipment.current_status.as_str();
        let progress = derive_progress(status);
        let tone = classify_status(status);
        let icon = status_icon(status);
        let customs_notice = shipment
            .is_customs_held
            .then(|| CUSTOMS_HOLD_NOTICE.to_string());
        let share_path = shipment.tracking_code.share_path();

        Self {
            shipment,
            events,
            progress,
            tone,
            icon,
            customs_notice,
            share_path,
        }
    }

    pub fn latest_event(&self) -> Option<&PublicShipmentEvent> {
        self.events.first()
    }
}

pub fn sort_for_display(events: &mut [PublicShipmentEvent]) {
    events.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
