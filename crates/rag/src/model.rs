use anyhow::Result;
use async_trait::async_trait;

use crate::{LlmClient, LlmRequest, LlmResponse};

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.chat(request).await
    }
}
