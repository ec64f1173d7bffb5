//! Financial Assistant
//!
//! A conversational assistant over a personal transactions database:
//! - Inspects the SQLite schema and runs validated read-only queries
//! - Converts currencies through a live exchange-rate service
//! - Does arithmetic with a restricted calculator
//! - Drives an LLM tool-calling loop until a final answer is produced
//!
//! LOOP:
//! TASK → MODEL → TOOL CALLS → OBSERVE → ... → FINAL ANSWER

pub mod agent;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod history;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::FinancialAgent;
pub use config::Config;
