//! The Master service: hosts the interview orchestration loop behind a
//! WebSocket gateway.

pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod panelist;
pub mod router;
pub mod state;
pub mod store;
