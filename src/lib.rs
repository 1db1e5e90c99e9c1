//! Gemini Relay
//!
//! A conversational relay in front of a Gemini proxy endpoint:
//! - Keeps a short rolling history per conversation
//! - Assembles proxy requests with a one-time system instruction
//! - Calls the proxy with bounded retries and turns failures into text
//! - Serves a Telegram bot and an HTTP API for the Web App
//!
//! FLOW:
//! FRONT-END → HISTORY → BUILD REQUEST → GATEWAY → REPLY (+ APPEND ON SUCCESS)

pub mod api;
pub mod config;
pub mod conversational;
pub mod error;
pub mod gemini;
pub mod memory;
pub mod models;
pub mod telegram;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use config::AppConfig;
pub use conversational::ConversationService;
