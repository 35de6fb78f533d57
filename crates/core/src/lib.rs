//! Core domain for the Roundtable panel-interview orchestrator: the
//! curriculum model, conversation memory, interview topic tracker, decision
//! layer contract and logical event surfaces.

pub mod curriculum;
pub mod decision;
pub mod error;
pub mod events;
pub mod memory;
pub mod tracker;
