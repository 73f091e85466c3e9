use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::{entity::ID, user_info::UserInfo};

/// A completion record for exactly one `(task_version, occurrence_start)`
/// pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: ID,
    pub completion_date: DateTime<Utc>,
    pub occurrence_start: DateTime<Utc>,
    pub task_version_id: ID,
    pub user_info: UserInfo,
}

impl Outcome {
    pub fn new(task_version_id: ID, occurrence_start: DateTime<Utc>, completion_date: DateTime<Utc>) -> Self {
        Self {
            id: ID::new_v4(),
            completion_date,
            occurrence_start,
            task_version_id,
            user_info: UserInfo::new(),
        }
    }
}
