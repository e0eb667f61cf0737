pub(crate) mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod fc;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod sanitize;
pub mod state;
pub mod stream;
pub mod upstream;

pub(crate) mod json_scan;
mod util;
