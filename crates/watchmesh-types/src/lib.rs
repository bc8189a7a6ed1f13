//! Domain types shared by the watchmesh cluster: checkable identity, state
//! enums, check results, and the annotation types (downtime/comment/ack)
//! attached to a checkable.
//!
//! This crate has no I/O. It exists so that `watchmesh-core` (the engine)
//! and `watchmesh-config` (configuration loading) can agree on the same
//! wire- and storage-representable shapes without depending on each other.

mod ack;
mod checkresult;
mod comment;
mod downtime;
mod hash;
mod identity;
mod notification;
mod privilege;
mod state;

pub use ack::{Acknowledgement, AcknowledgementType};
pub use checkresult::{CheckResult, PerfdataPoint, Timestamp};
pub use comment::{Comment, CommentType};
pub use downtime::Downtime;
pub use hash::sdbm_hash;
pub use identity::{CheckableKind, CheckableRef};
pub use notification::{NotificationFilter, NotificationType, NotificationTypeFilter, StateFilter};
pub use privilege::Privilege;
pub use state::{ObjectState, StateType};
