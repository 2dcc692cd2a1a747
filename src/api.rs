//! Superfície HTTP do assistente: o endpoint de chat, a sonda de saúde,
//! as estatísticas do cache e o desligamento ordenado.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{app_state::AppState, cache, models::TraceStep, rag};

// --- Payloads e respostas da API ---

/// Corpo de `POST /api/chat`, em camelCase como a interface original.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    question: String,
    session_id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    bypass_cache: bool,
}

#[derive(Serialize)]
pub struct SourceCounts {
    structured: usize,
    conceptual: usize,
}

#[derive(Serialize)]
pub struct ChatResponse {
    response: String,
    confidence: f64,
    sources: SourceCounts,
    trace: Vec<TraceStep>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/health", get(health_handler))
        .route("/api/cache-stats", get(cache_stats_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<serde_json::Value>)> {
    if payload.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "A pergunta não pode ser vazia."})),
        ));
    }

    let session_id = payload
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("Pergunta recebida (sessão {session_id}): {}", payload.question);

    let outcome = rag::answer_question(
        &state,
        &payload.question,
        payload.model.as_deref(),
        payload.bypass_cache,
    )
    .await;

    info!(
        "Resposta pronta (sessão {session_id}): confiança {:.2}, modelo {}",
        outcome.confidence, outcome.model
    );

    Ok(Json(ChatResponse {
        response: outcome.response,
        confidence: outcome.confidence,
        sources: SourceCounts {
            structured: outcome.structured_count,
            conceptual: outcome.conceptual_count,
        },
        trace: outcome.trace,
    }))
}

#[axum::debug_handler]
async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let store = state.store.clone();
    let probe = tokio::task::spawn_blocking(move || store.health_check()).await;

    match probe {
        Ok(Ok(())) => Ok(Json(json!({
            "status": "ok",
            "database": state.config.database_path,
        }))),
        Ok(Err(e)) => {
            error!("Falha na sonda de saúde do banco: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!("Tarefa da sonda de saúde interrompida: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[axum::debug_handler]
async fn cache_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<cache::CacheStats>, (StatusCode, Json<serde_json::Value>)> {
    match cache::stats(state.store.clone()).await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            error!("Falha ao consultar as estatísticas do cache: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Cache indisponível: {e}")})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Pedido de desligamento recebido.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_aceita_camel_case_e_bypass_opcional() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"question": "oi", "sessionId": "abc", "bypassCache": true}"#,
        )
        .expect("payload válido");
        assert_eq!(request.question, "oi");
        assert_eq!(request.session_id.as_deref(), Some("abc"));
        assert!(request.bypass_cache);

        let minimal: ChatRequest =
            serde_json::from_str(r#"{"question": "oi"}"#).expect("payload mínimo");
        assert!(!minimal.bypass_cache);
        assert!(minimal.model.is_none());
    }

    #[test]
    fn resposta_serializa_o_contrato_externo() {
        let response = ChatResponse {
            response: "texto".to_string(),
            confidence: 0.8,
            sources: SourceCounts {
                structured: 3,
                conceptual: 1,
            },
            trace: Vec::new(),
        };
        let value = serde_json::to_value(&response).expect("serializar");
        assert_eq!(value["sources"]["structured"], 3);
        assert_eq!(value["sources"]["conceptual"], 1);
        assert!(value["trace"].as_array().expect("lista").is_empty());
    }
}
