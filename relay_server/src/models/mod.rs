//! Relay data models: commits, build updates, rules and chat notices.

pub mod build;
pub mod commit;
pub mod notice;
pub mod rule;
