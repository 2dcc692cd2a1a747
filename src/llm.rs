//! Abstração sobre o Rig para trabalhar com distintos provedores de LLM.
//! Por enquanto OpenAI está implementado; Gemini/Ollama ficam preparados.
//!
//! A identidade do fornecedor nunca vaza deste módulo: o resto do
//! pipeline só conhece `complete(prompt, model_hint)` e `embed_query`.
//! A política de novas tentativas e o tempo limite por chamada vivem
//! aqui, centralizados, em vez de duplicados em cada ponto de uso.

use std::time::Duration;

use anyhow::{anyhow, Result};
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel;
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};

const SYSTEM_PROMPT: &str = "\
Você é um assistente especializado no plano diretor e na legislação \
urbanística de Porto Alegre. Responda em português, de forma clara e \
objetiva, seguindo estritamente as instruções fornecidas no pedido.";

/// Gestor de LLMs e embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    completion_timeout: Duration,
    max_retries: u32,
}

impl LlmManager {
    /// Constrói o gestor a partir da configuração.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            completion_timeout: cfg.completion_timeout,
            max_retries: cfg.llm_max_retries,
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    /// Calcula o embedding da pergunta para a busca vetorial. Limitado
    /// pelo mesmo tempo por chamada das completudes.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let fut = async {
            match self.provider {
                LlmProvider::OpenAI => self.embed_with_openai(text).await,
                ref other => Err(anyhow!(
                    "Provedor LLM {:?} ainda não implementado para embeddings",
                    other
                )),
            }
        };
        match tokio::time::timeout(self.completion_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("tempo limite excedido na chamada de embedding")),
        }
    }

    async fn embed_with_openai(&self, text: &str) -> Result<Vec<f32>> {
        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let embeddings = embedding_model.embed_texts(vec![text.to_string()]).await?;
        let first = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Nenhum embedding devolvido para a pergunta"))?;

        Ok(first.vec.iter().map(|v| *v as f32).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Gera texto a partir de um prompt. `model_hint` permite que a
    /// requisição escolha outro modelo do mesmo provedor; vazio usa o
    /// modelo configurado. Tentativas limitadas com espera crescente.
    pub async fn complete(&self, prompt: &str, model_hint: Option<&str>) -> Result<String> {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            let fut = self.complete_once(prompt, model_hint);
            match tokio::time::timeout(self.completion_timeout, fut).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => {
                    warn!("Falha na completude (tentativa {}): {e}", attempt + 1);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("Tempo limite na completude (tentativa {})", attempt + 1);
                    last_error = Some(anyhow!("tempo limite excedido na chamada de completude"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("falha desconhecida na completude")))
    }

    async fn complete_once(&self, prompt: &str, model_hint: Option<&str>) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(prompt, model_hint).await,
            ref other => Err(anyhow!(
                "Provedor LLM {:?} ainda não implementado para chat",
                other
            )),
        }
    }

    async fn complete_with_openai(&self, prompt: &str, model_hint: Option<&str>) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let model_name = self.resolve_model(model_hint);

        let agent = client.agent(model_name).preamble(SYSTEM_PROMPT).build();
        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    /// Nome do modelo efetivo: a dica da requisição, ou o configurado, ou
    /// o padrão do provedor.
    pub fn resolve_model<'a>(&'a self, model_hint: Option<&'a str>) -> &'a str {
        match model_hint {
            Some(hint) if !hint.is_empty() => hint,
            _ => {
                if self.chat_model.is_empty() {
                    "gpt-4o-mini"
                } else {
                    self.chat_model.as_str()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn manager() -> LlmManager {
        LlmManager {
            provider: LlmProvider::OpenAI,
            embedding_model: String::new(),
            chat_model: "gpt-4o-mini".to_string(),
            completion_timeout: Duration::from_secs(5),
            max_retries: 1,
        }
    }

    #[test]
    fn resolve_model_prefere_a_dica_da_requisicao() {
        let manager = manager();
        assert_eq!(manager.resolve_model(Some("gpt-4o")), "gpt-4o");
        assert_eq!(manager.resolve_model(Some("")), "gpt-4o-mini");
        assert_eq!(manager.resolve_model(None), "gpt-4o-mini");
    }

    #[test]
    fn from_config_copia_os_parametros() {
        let cfg = AppConfig {
            database_path: "x.db".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: "gpt-4o-mini".to_string(),
            similarity_threshold: 0.7,
            vector_top_k: 5,
            retrieval_timeout: Duration::from_secs(5),
            completion_timeout: Duration::from_secs(30),
            llm_max_retries: 2,
            cache_min_confidence: 0.7,
        };
        let manager = LlmManager::from_config(&cfg).expect("config válida");
        assert_eq!(manager.chat_model, "gpt-4o-mini");
        assert_eq!(manager.max_retries, 2);
    }
}
