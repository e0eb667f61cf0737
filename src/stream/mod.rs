//! Client-facing streaming: protocol-neutral events, the assembler that
//! produces them from backend deltas, and the SSE body writer.

pub mod assembler;
pub mod sse;

use std::convert::Infallible;

use axum::body::Body;
use futures_util::StreamExt;

use crate::error::ErrorCategory;
use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};
use crate::upstream::{BackendDelta, DeltaStream};

pub use assembler::{Phase, StreamAssembler};
pub use sse::{sse_frame_stream, SseParser};

/// A parsed SSE frame from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// What a content block holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDelta {
    Text(String),
    /// The complete invocation input as a JSON object string.
    InputJson(String),
}

/// Protocol-neutral streaming event. Block events carry the block index.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart { index: usize, block: BlockKind },
    ContentBlockDelta { index: usize, delta: BlockDelta },
    ContentBlockStop { index: usize },
    MessageDelta {
        stop_reason: CanonicalStopReason,
        usage: CanonicalUsage,
    },
    MessageStop,
    Error {
        category: ErrorCategory,
        message: String,
    },
}

/// Writes [`StreamEvent`]s as one client protocol's SSE frames.
pub trait StreamEncoder: Send + 'static {
    fn encode(&mut self, event: &StreamEvent, out: &mut String);
}

struct BodyState<E> {
    deltas: DeltaStream,
    assembler: StreamAssembler,
    encoder: E,
    started: bool,
}

impl<E: StreamEncoder> BodyState<E> {
    fn render(&mut self, events: &[StreamEvent]) -> bytes::Bytes {
        let mut out = String::new();
        for event in events {
            self.encoder.encode(event, &mut out);
        }
        bytes::Bytes::from(out)
    }
}

/// Drive backend deltas through `assembler` and encode the result as an SSE
/// response body.
///
/// Events are written in the order the assembler produces them and nothing
/// is read ahead of the client. Dropping the body drops the backend stream.
pub fn assemble_sse_body<E: StreamEncoder>(
    deltas: DeltaStream,
    assembler: StreamAssembler,
    encoder: E,
) -> Body {
    let state = BodyState {
        deltas,
        assembler,
        encoder,
        started: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        let mut events = Vec::new();
        if !state.started {
            state.started = true;
            state.assembler.start(&mut events);
            let chunk = state.render(&events);
            return Some((Ok::<_, Infallible>(chunk), state));
        }

        loop {
            if state.assembler.phase() == Phase::Done {
                return None;
            }
            match state.deltas.next().await {
                Some(Ok(BackendDelta::Text(text))) => state.assembler.on_delta(&text, &mut events),
                Some(Ok(BackendDelta::Finish {
                    finish_reason,
                    usage,
                })) => state
                    .assembler
                    .finish(finish_reason.as_deref(), usage, &mut events),
                Some(Err(err)) => state.assembler.fail(&err, &mut events),
                None => state
                    .assembler
                    .finish(None, CanonicalUsage::default(), &mut events),
            }
            if !events.is_empty() {
                let chunk = state.render(&events);
                return Some((Ok(chunk), state));
            }
        }
    });

    Body::from_stream(stream.boxed())
}
