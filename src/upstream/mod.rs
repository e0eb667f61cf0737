//! The free-text chat backend the gateway sits in front of.

mod http_client;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CanonicalError;
use crate::protocol::canonical::{CanonicalUsage, GenerationParams, ImageRef};

pub use http_client::HttpUpstream;

/// One flattened turn for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub model: String,
    /// System text plus rendered conversation history.
    pub message: String,
    pub attachments: Vec<ImageRef>,
    /// Marker grammar instructions for the declared tools. Already embedded
    /// in `message`; kept separately for clients that place it elsewhere.
    pub tool_protocol_instructions: String,
    /// Client sampling parameters; unset fields are left to the backend.
    pub generation: GenerationParams,
    pub stream: bool,
}

/// A complete, non-streamed backend reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: CanonicalUsage,
}

/// One item of a streamed backend reply.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendDelta {
    Text(String),
    /// Always last when the backend finished cleanly.
    Finish {
        finish_reason: Option<String>,
        usage: CanonicalUsage,
    },
}

pub type DeltaStream = BoxStream<'static, Result<BackendDelta, CanonicalError>>;

/// Executes flattened requests against the backend.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn complete(&self, request: BackendRequest) -> Result<BackendReply, CanonicalError>;

    async fn stream(&self, request: BackendRequest) -> Result<DeltaStream, CanonicalError>;
}
