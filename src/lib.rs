//! signageFlow: core library for the digital signage scheduling engine.
//!
//! Schedules, groups, the play queue and its reconciliation loop live here.
//! The `signageflow` CLI and any display front end consume this crate.

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod media;
pub mod play_log;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod store;
pub mod timers;
