pub mod chat_completions;
pub mod count_tokens;
pub mod messages;
