//! Cluster replication, scheduling, and the checkable state machine.
//!
//! This crate is the hard engineering center of a watchmesh node: the
//! [`checkable`] state machine, the [`scheduler`] that drives it, the
//! [`notification`] engine, the [`authority`] election that decides who
//! owns what, and the cluster mesh itself ([`cluster_listener`],
//! [`endpoint`], [`router`], [`replay_log`], [`wire`], [`config_distributor`]).
//! `watchmesh-node` is the only crate that wires these together into a
//! running process.

pub mod authority;
pub mod checkable;
pub mod cluster_listener;
pub mod config_distributor;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod event_bus;
pub mod expiry;
pub mod metrics;
pub mod notification;
pub mod registry;
pub mod replay_log;
pub mod router;
pub mod scheduler;
pub mod wire;

pub use error::{CheckableError, ClusterError, ReplayLogError, WireError};
