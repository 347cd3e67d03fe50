//! Small helpers shared across modules: duration text, timestamps and ids.

mod duration;

pub use duration::parse_duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Timestamp type used on run records.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Generates a time-ordered identifier for runs and run records.
#[must_use]
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_v7() {
        let id = generate_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_now_is_utc() {
        assert_eq!(now().timezone(), Utc);
    }
}
