//! Premium subscription records kept in the premium JSON file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PremiumRecord {
    pub user_id: i64,

    /// When the current subscription period was first granted.
    pub granted_at: DateTime<Utc>,

    /// End of the subscription; the user is premium strictly before this.
    pub expires_at: DateTime<Utc>,
}

impl PremiumRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whole days left, zero once expired.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days().max(0)
    }
}
