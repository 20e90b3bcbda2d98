use chrono::Utc;
use rand::Rng;
use shared::domain::TrackingCode;

/// Bound on generate-check-insert rounds before creation gives up.
pub const MAX_TRACKING_CODE_ATTEMPTS: usize = 8;

/// `SPD` + last six digits of the current unix-millis timestamp + three
/// random digits. Uniqueness is checked by the caller.
pub fn generate_tracking_code() -> TrackingCode {
    let random = rand::thread_rng().gen_range(0..1000);
    TrackingCode::compose(Utc::now().timestamp_millis(), random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_well_formed() {
        for _ in 0..50 {
            let code = generate_tracking_code();
            assert!(TrackingCode::parse(code.as_str()).is_ok(), "{code}");
            assert_eq!(code.as_str().len(), 12);
        }
    }
}
