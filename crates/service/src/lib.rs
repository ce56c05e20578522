pub mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use project_brain_core::{Answer, DoorSchedule};
use project_brain_rag::{
    AnswerPipeline, ChatModel, ExtractionPipeline, PineconeClient, PineconeStore, Retriever,
};

use crate::config::{FileConfig, PineconeSettings};

#[derive(Clone)]
pub struct AppState {
    answer: Arc<AnswerPipeline>,
    extraction: Arc<ExtractionPipeline>,
}

impl AppState {
    pub fn new(answer: AnswerPipeline, extraction: ExtractionPipeline) -> Self {
        Self {
            answer: Arc::new(answer),
            extraction: Arc::new(extraction),
        }
    }

    /// Wires both pipelines over one retriever and one chat model, using the file settings
    /// for retrieval windows, the extraction query and the extraction strategy.
    pub fn from_parts(
        config: &FileConfig,
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let answer = AnswerPipeline::new(retriever.clone(), model.clone())
            .with_top_k(config.retrieval.chat_top_k);
        let generator = config.extraction_strategy()?.generator(model);
        let extraction = ExtractionPipeline::with_generator(retriever, generator)
            .with_query(config.retrieval.extract_query.clone())
            .with_top_k(config.retrieval.extract_top_k);
        Ok(Self::new(answer, extraction))
    }

    /// Builds hosted clients and resolves the index host. Any failure here is fatal at startup.
    pub async fn connect(config: &FileConfig, pinecone: &PineconeSettings) -> Result<Self> {
        let model = config.llm_client()?;
        let embeddings = config.embedding_client()?;
        let client = PineconeClient::from_env()?;
        let index = client
            .connect(
                &pinecone.index_name,
                pinecone.host.as_deref(),
                pinecone.namespace.clone(),
            )
            .await
            .with_context(|| format!("failed to connect to index {}", pinecone.index_name))?;
        info!(
            index = %pinecone.index_name,
            host = index.base_url(),
            chat_model = model.model(),
            embeddings = embeddings.name(),
            "providers ready"
        );
        let retriever: Arc<dyn Retriever> = Arc::new(PineconeStore::new(index, embeddings));
        Self::from_parts(config, retriever, Arc::new(model))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/extract", post(handle_extract))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let answer = state.answer.ask(&request.query).await?;
    Ok(Json(answer))
}

async fn handle_extract(State(state): State<AppState>) -> Json<DoorSchedule> {
    Json(state.extraction.extract_schedule().await)
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    pub fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(err) => {
                let detail = format!("{err:#}");
                error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn internal_error_renders_detail() {
        let err = AppError::internal(anyhow::anyhow!("quota exceeded").context("chat failed"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"detail": "chat failed: quota exceeded"}));
    }

    #[tokio::test]
    async fn bad_request_renders_detail() {
        let response = AppError::bad_request("missing field `query`").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["detail"], "missing field `query`");
    }
}
