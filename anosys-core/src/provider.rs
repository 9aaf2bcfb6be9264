use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{
    ChatCompletion, ChatCompletionRequest, EmbeddingRequest, EmbeddingResponse, ImageRequest,
    ImageResponse,
};
use crate::stream::ChunkStream;

/// Result of a chat call: a whole completion, or a chunk stream when the
/// request asked for `stream: true`.
pub enum ChatOutput {
    Complete(ChatCompletion),
    Stream(ChunkStream),
}

impl std::fmt::Debug for ChatOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(c) => f.debug_tuple("Complete").field(c).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl ChatOutput {
    pub fn into_complete(self) -> Option<ChatCompletion> {
        match self {
            Self::Complete(c) => Some(c),
            Self::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ChunkStream> {
        match self {
            Self::Stream(s) => Some(s),
            Self::Complete(_) => None,
        }
    }
}

/// The AI client surface that can be instrumented.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Provider name, recorded as `gen_ai.system`.
    fn system(&self) -> &str;

    async fn create_chat_completion(&self, req: ChatCompletionRequest) -> CoreResult<ChatOutput>;

    async fn create_embedding(&self, req: EmbeddingRequest) -> CoreResult<EmbeddingResponse>;

    async fn generate_image(&self, req: ImageRequest) -> CoreResult<ImageResponse>;
}
