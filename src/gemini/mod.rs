//! Gemini proxy integration
//!
//! Request assembly, the retrying gateway, and reply extraction

pub mod builder;
pub mod gateway;
pub mod response;

pub use builder::RequestBuilder;
pub use gateway::{GatewayError, ModelGateway, RetryableFailure};
pub use response::extract_text;
