//! Carga e gestão da configuração da aplicação (SQLite + LLM + pipeline).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Provedor LLM não suportado: {other}")),
        }
    }
}

/// Configuração completa da aplicação.
///
/// Limiar de similaridade, top-K, tempos limite e o piso de confiança do
/// cache são parâmetros de ajuste, não constantes.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_path: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,

    pub similarity_threshold: f64,
    pub vector_top_k: usize,
    pub retrieval_timeout: Duration,
    pub completion_timeout: Duration,
    pub llm_max_retries: u32,
    pub cache_min_confidence: f64,
}

impl AppConfig {
    /// Carrega a configuração a partir de variáveis de ambiente (usando
    /// .env se existir). Tudo tem padrão razoável; só o provedor falha se
    /// for um valor desconhecido.
    pub fn from_env() -> Result<Self> {
        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "plano_diretor.db".to_string());
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3344".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            database_path,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            similarity_threshold: env_f64("SIMILARITY_THRESHOLD", 0.7),
            vector_top_k: env_usize("VECTOR_TOP_K", 5),
            retrieval_timeout: Duration::from_millis(env_u64("RETRIEVAL_TIMEOUT_MS", 5_000)),
            completion_timeout: Duration::from_millis(env_u64("COMPLETION_TIMEOUT_MS", 30_000)),
            llm_max_retries: env_u64("LLM_MAX_RETRIES", 2) as u32,
            cache_min_confidence: env_f64("CACHE_MIN_CONFIDENCE", 0.7),
        })
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
