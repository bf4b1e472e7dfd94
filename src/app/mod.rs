//! Application core: run orchestration behind port traits.
//!
//! This module holds the pieces presentation layers talk to: the
//! [`service::AppContext`] that owns the link and the experiment list,
//! the [`events::RunEvent`]s a run emits, and the [`ports`] every outer
//! adapter implements.

pub mod events;
pub mod ports;
pub mod service;
