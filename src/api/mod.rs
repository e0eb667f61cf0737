pub(crate) mod common;
pub mod health;
pub mod ingress;
pub mod models;

pub use ingress::{chat_completions, count_tokens, messages};
