//! Relay core: rule matching, per-commit dedup, build lifecycle tracking and
//! the dispatcher that drives them.

pub mod build_tracker;
pub mod dedup;
pub mod dispatcher;
pub mod rule_matcher;
