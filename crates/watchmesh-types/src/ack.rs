use serde::{Deserialize, Serialize};

use crate::checkresult::Timestamp;

/// Normal acknowledgements are cleared automatically on recovery; Sticky
/// ones persist until manually cleared, per spec (the one Open Question
/// this repeats verbatim from the source: there is no migration path if
/// the type changes mid-problem).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgementType {
    None,
    Normal,
    Sticky,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub kind: AcknowledgementType,
    pub author: String,
    pub comment: String,
    pub set_time: Timestamp,
    pub expiry: Option<Timestamp>,
}

impl Acknowledgement {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expiry, Some(expiry) if now >= expiry)
    }
}
