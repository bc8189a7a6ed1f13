use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkresult::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentType {
    User,
    Downtime,
    Flapping,
    Acknowledgement,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub legacy_id: u64,
    pub entry_type: CommentType,
    pub author: String,
    pub text: String,
    pub entry_time: Timestamp,
    pub expire_time: Option<Timestamp>,
}

impl Comment {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expire_time, Some(expire) if now >= expire)
    }
}
