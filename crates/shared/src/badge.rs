use serde::{Deserialize, Serialize};

/// Cosmetic grouping for status badges. Looser than milestone matching so that
/// label variants such as "Delivered to recipient" still pick the right look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Delivered,
    OutForDelivery,
    InTransit,
    Customs,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIcon {
    CheckCircle,
    AlertTriangle,
    Package,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminBadge {
    Success,
    Destructive,
    Primary,
}

// First match wins.
const TONE_KEYWORDS: [(&str, StatusTone); 4] = [
    ("delivered", StatusTone::Delivered),
    ("out for delivery", StatusTone::OutForDelivery),
    ("in transit", StatusTone::InTransit),
    ("customs", StatusTone::Customs),
];

impl StatusTone {
    pub fn color_token(self) -> &'static str {
        match self {
            StatusTone::Delivered => "success",
            StatusTone::OutForDelivery => "warning",
            StatusTone::InTransit => "logistics-cyan",
            StatusTone::Customs => "logistics-purple",
            StatusTone::Default => "primary",
        }
    }
}

pub fn classify_status(status: &str) -> StatusTone {
    let lower = status.to_lowercase();
    TONE_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, tone)| *tone)
        .unwrap_or(StatusTone::Default)
}

pub fn status_icon(status: &str) -> StatusIcon {
    match classify_status(status) {
        StatusTone::Delivered => StatusIcon::CheckCircle,
        StatusTone::Customs => StatusIcon::AlertTriangle,
        _ => StatusIcon::Package,
    }
}

/// Badge used in the admin shipment list, where the customs flag outranks
/// everything except delivery.
pub fn admin_badge(status: &str, is_customs_held: bool) -> AdminBadge {
    if status.to_lowercase().contains("delivered") {
        AdminBadge::Success
    } else if is_customs_held {
        AdminBadge::Destructive
    } else {
        AdminBadge::Primary
    }
}
