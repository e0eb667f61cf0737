pub mod anthropic;
pub mod canonical;
pub(crate) mod error_shapes;
pub mod mapping;
pub mod openai_chat;
pub mod transcoder;
