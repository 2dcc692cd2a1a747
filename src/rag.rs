//! Orquestrador do pipeline de perguntas e respostas.
//!
//! Máquina de estados por requisição:
//!   recebida → consulta ao cache → {acerto → fim} | análise →
//!   recuperação (estruturada ∥ vetorial conforme a estratégia) →
//!   síntese → gravação no cache → fim.
//!
//! Cada braço de recuperação tem seu próprio tempo limite; a falha de um
//! nunca cancela o outro. O trace completo é devolvido em todos os
//! caminhos, inclusive nos degradados e nos acertos de cache.

use chrono::Utc;
use tracing::{info, warn};

use crate::analyzer;
use crate::app_state::AppState;
use crate::cache;
use crate::errors::PipelineError;
use crate::models::{AnalysisResult, LegalPassage, RetrievalBundle, Strategy, TraceStep};
use crate::normalize;
use crate::structured::{self, StructuredOutcome};
use crate::synthesizer;
use crate::vector_store;

const GREETING_RESPONSE: &str = "\
Olá! Sou o assistente do novo Plano Diretor de Porto Alegre. Posso informar \
alturas máximas, coeficientes de aproveitamento e demais parâmetros do regime \
urbanístico por bairro ou zona, e explicar artigos da LUOS e do PDUS. Sobre o \
que você quer saber?";

/// Resultado completo de uma requisição, incluindo o trace.
#[derive(Debug, Clone)]
pub struct RagOutcome {
    pub response: String,
    pub confidence: f64,
    pub structured_count: usize,
    pub conceptual_count: usize,
    pub model: String,
    pub trace: Vec<TraceStep>,
}

/// Processa uma pergunta de ponta a ponta. Nunca devolve erro: degradações
/// viram braços vazios e só a falha de síntese cai no fallback genérico de
/// confiança zero, já tratado dentro do sintetizador.
pub async fn answer_question(
    state: &AppState,
    question: &str,
    model_hint: Option<&str>,
    bypass_cache: bool,
) -> RagOutcome {
    let mut trace = Vec::new();
    push_step(
        &mut trace,
        "received",
        format!("pergunta com {} caractere(s)", question.chars().count()),
    );

    let fingerprint = normalize::fingerprint(question);

    if bypass_cache {
        push_step(&mut trace, "cache_check", "ignorado a pedido da requisição");
    } else {
        match cache::lookup(state.store.clone(), &fingerprint).await {
            Ok(Some(entry)) if entry.confidence >= state.config.cache_min_confidence => {
                if let Err(e) = cache::bump(state.store.clone(), &fingerprint).await {
                    warn!("Falha ao registrar o acerto do cache: {e}");
                }
                push_step(
                    &mut trace,
                    "cache_check",
                    format!("acerto ({} acesso(s) anteriores)", entry.hit_count),
                );
                info!("Resposta servida do cache");
                return RagOutcome {
                    response: entry.response,
                    confidence: entry.confidence,
                    structured_count: 0,
                    conceptual_count: 0,
                    model: "cache".to_string(),
                    trace,
                };
            }
            Ok(Some(_)) => {
                push_step(&mut trace, "cache_check", "entrada abaixo do piso de confiança")
            }
            Ok(None) => push_step(&mut trace, "cache_check", "ausente"),
            Err(e) => {
                warn!("{}", PipelineError::CacheUnavailable(e.to_string()));
                push_step(&mut trace, "cache_check", "cache indisponível; seguindo sem cache");
            }
        }
    }

    let analysis = analyzer::analyze(question);
    push_step(
        &mut trace,
        "query_analysis",
        format!(
            "intenção {}, estratégia {}, {} bairro(s), {} zona(s), {} referência(s) a artigo",
            analysis.intent.as_str(),
            analysis.strategy.as_str(),
            analysis.entities.bairros.len(),
            analysis.entities.zonas.len(),
            analysis.entities.article_refs.len(),
        ),
    );

    // Ambiguidade entre entidades conhecidas não é fatal: os candidatos
    // seguem todos adiante, e o fato fica registrado.
    if analysis.needed_disambiguation {
        let ambiguous = PipelineError::AnalysisAmbiguous(analysis.entities.bairros.join(", "));
        warn!("{ambiguous}");
        push_step(&mut trace, "disambiguation", ambiguous.to_string());
    }

    if analysis.strategy == Strategy::None {
        push_step(&mut trace, "greeting", "resposta de cortesia, sem recuperação");
        return RagOutcome {
            response: synthesizer::ensure_footer(GREETING_RESPONSE.to_string()),
            confidence: 1.0,
            structured_count: 0,
            conceptual_count: 0,
            model: "template".to_string(),
            trace,
        };
    }

    let mut bundle = RetrievalBundle::default();
    match analysis.strategy {
        Strategy::StructuredOnly => {
            let outcome = structured_arm(state, &analysis).await;
            apply_structured(outcome, &mut bundle, &mut trace);
        }
        Strategy::UnstructuredOnly => {
            let outcome = vector_arm(state, question, &analysis).await;
            apply_vector(outcome, &mut bundle, &mut trace);
        }
        Strategy::Hybrid => {
            // Fan-out: os dois braços correm juntos, cada um com seu
            // tempo limite; um braço degradado não derruba o outro.
            let (structured_outcome, vector_outcome) = tokio::join!(
                structured_arm(state, &analysis),
                vector_arm(state, question, &analysis)
            );
            apply_structured(structured_outcome, &mut bundle, &mut trace);
            apply_vector(vector_outcome, &mut bundle, &mut trace);
        }
        Strategy::None => {}
    }

    let answer = synthesizer::synthesize(
        &state.llm_manager,
        question,
        &analysis,
        &bundle,
        model_hint,
    )
    .await;
    push_step(
        &mut trace,
        "synthesis",
        format!(
            "confiança {:.2}, {} fonte(s) estruturada(s), {} trecho(s) legal(is)",
            answer.confidence, answer.structured_count, answer.conceptual_count
        ),
    );

    if !bypass_cache && answer.confidence >= state.config.cache_min_confidence {
        match cache::store_answer(
            state.store.clone(),
            &fingerprint,
            question,
            &answer,
            analysis.intent.as_str(),
        )
        .await
        {
            Ok(()) => push_step(&mut trace, "cache_store", "resposta armazenada"),
            Err(e) => {
                warn!("Falha ao armazenar no cache: {e}");
                push_step(&mut trace, "cache_store", "falha ao armazenar; resposta segue sem cache");
            }
        }
    } else {
        push_step(
            &mut trace,
            "cache_store",
            "não armazenada (bypass ou confiança abaixo do piso)",
        );
    }

    RagOutcome {
        response: answer.text,
        confidence: answer.confidence,
        structured_count: answer.structured_count,
        conceptual_count: answer.conceptual_count,
        model: answer.model,
        trace,
    }
}

async fn structured_arm(
    state: &AppState,
    analysis: &AnalysisResult,
) -> Result<StructuredOutcome, PipelineError> {
    match tokio::time::timeout(
        state.config.retrieval_timeout,
        structured::retrieve(state.store.clone(), analysis),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(PipelineError::RetrievalTimeout("estruturado")),
    }
}

async fn vector_arm(
    state: &AppState,
    question: &str,
    analysis: &AnalysisResult,
) -> Result<Vec<LegalPassage>, PipelineError> {
    match tokio::time::timeout(
        state.config.retrieval_timeout,
        vector_store::search_passages(
            state.store.clone(),
            &state.llm_manager,
            question,
            &analysis.entities,
            state.config.similarity_threshold,
            state.config.vector_top_k,
        ),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(PipelineError::RetrievalTimeout("vetorial")),
    }
}

fn apply_structured(
    outcome: Result<StructuredOutcome, PipelineError>,
    bundle: &mut RetrievalBundle,
    trace: &mut Vec<TraceStep>,
) {
    match outcome {
        Ok(outcome) => {
            push_step(
                trace,
                "structured_retrieval",
                format!(
                    "{} linha(s){}",
                    outcome.rows.len(),
                    if outcome.aggregate.is_some() {
                        ", com agregação calculada no SQL"
                    } else {
                        ""
                    }
                ),
            );
            bundle.regime_rows = outcome.rows;
            bundle.aggregate = outcome.aggregate;
        }
        Err(e) => push_step(trace, "structured_retrieval", format!("braço degradado: {e}")),
    }
}

fn apply_vector(
    outcome: Result<Vec<LegalPassage>, PipelineError>,
    bundle: &mut RetrievalBundle,
    trace: &mut Vec<TraceStep>,
) {
    match outcome {
        Ok(passages) => {
            push_step(
                trace,
                "vector_retrieval",
                format!("{} trecho(s) acima do limiar", passages.len()),
            );
            bundle.passages = passages;
        }
        Err(e) => push_step(trace, "vector_retrieval", format!("braço degradado: {e}")),
    }
}

fn push_step(trace: &mut Vec<TraceStep>, step: &str, summary: impl Into<String>) {
    trace.push(TraceStep {
        step: step.to_string(),
        timestamp: Utc::now(),
        summary: summary.into(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, LlmProvider};
    use crate::llm::LlmManager;
    use crate::models::RegimeRecord;
    use crate::sqlite_client::{self, Store};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, AppState) {
        let dir = TempDir::new().expect("diretório temporário");
        let store = Store::open(&dir.path().join("test.db")).expect("abrir banco");
        sqlite_client::ensure_schema(&store).expect("esquema");

        let rows = [
            ("TRÊS FIGUEIRAS", "ZOT 04", Some(18.0)),
            ("TRÊS FIGUEIRAS", "ZOT 07", Some(60.0)),
            ("TRÊS FIGUEIRAS", "ZOT 08.3-C", Some(90.0)),
            ("CENTRO HISTÓRICO", "ZOT 08.1-E", Some(130.0)),
        ];
        for (bairro, zona, altura) in rows {
            store
                .insert_regime_record(&RegimeRecord {
                    bairro: bairro.to_string(),
                    zona: zona.to_string(),
                    altura_maxima: altura,
                    ca_basico: Some(1.0),
                    ca_maximo: Some(2.0),
                    taxa_permeabilidade: None,
                    area_minima_lote: None,
                    testada_minima_lote: None,
                })
                .expect("inserir registro");
        }

        let cfg = AppConfig {
            database_path: dir.path().join("test.db").display().to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: "gpt-4o-mini".to_string(),
            similarity_threshold: 0.7,
            vector_top_k: 5,
            retrieval_timeout: Duration::from_secs(2),
            completion_timeout: Duration::from_millis(100),
            llm_max_retries: 0,
            cache_min_confidence: 0.7,
        };
        let llm_manager = LlmManager::from_config(&cfg).expect("gestor de LLM");
        let state = AppState {
            config: cfg,
            store: Arc::new(store),
            llm_manager,
            shutdown_sender: Arc::new(Mutex::new(None)),
        };
        (dir, state)
    }

    const QUESTION: &str = "O que pode ser construído no Três Figueiras?";

    #[tokio::test]
    async fn primeira_chamada_sintetiza_e_armazena_no_cache() {
        let (_dir, state) = test_state();
        let outcome = answer_question(&state, QUESTION, None, false).await;

        for zona in ["ZOT 04", "ZOT 07", "ZOT 08.3-C"] {
            assert!(outcome.response.contains(zona), "falta a zona {zona}");
        }
        assert!(outcome.confidence >= 0.7);

        let steps: Vec<&str> = outcome.trace.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(
            steps,
            vec![
                "received",
                "cache_check",
                "query_analysis",
                "structured_retrieval",
                "synthesis",
                "cache_store"
            ]
        );

        let entry = cache::lookup(state.store.clone(), &normalize::fingerprint(QUESTION))
            .await
            .expect("cache acessível")
            .expect("entrada armazenada");
        assert_eq!(entry.response, outcome.response);
        assert_eq!(entry.hit_count, 0);
    }

    #[tokio::test]
    async fn segunda_chamada_acerta_o_cache_modulo_acentos_e_caixa() {
        let (_dir, state) = test_state();
        let first = answer_question(&state, QUESTION, None, false).await;

        let variant = "  o que pode ser CONSTRUIDO no tres figueiras ";
        let second = answer_question(&state, variant, None, false).await;

        assert_eq!(second.response, first.response);
        assert_eq!(second.model, "cache");
        assert!(second
            .trace
            .iter()
            .any(|s| s.step == "cache_check" && s.summary.contains("acerto")));

        let entry = cache::lookup(state.store.clone(), &normalize::fingerprint(QUESTION))
            .await
            .expect("cache acessível")
            .expect("entrada armazenada");
        assert_eq!(entry.hit_count, 1);
    }

    #[tokio::test]
    async fn bypass_nao_le_nem_muda_a_entrada_existente() {
        let (_dir, state) = test_state();
        answer_question(&state, QUESTION, None, false).await;

        let bypassed = answer_question(&state, QUESTION, None, true).await;
        assert!(bypassed
            .trace
            .iter()
            .any(|s| s.step == "cache_check" && s.summary.contains("ignorado")));
        assert_ne!(bypassed.model, "cache");

        let entry = cache::lookup(state.store.clone(), &normalize::fingerprint(QUESTION))
            .await
            .expect("cache acessível")
            .expect("entrada preservada");
        assert_eq!(entry.hit_count, 0, "bypass não conta como acesso");
    }

    #[tokio::test]
    async fn saudacao_curto_circuita_sem_tocar_no_cache() {
        let (_dir, state) = test_state();
        let outcome = answer_question(&state, "bom dia", None, false).await;

        assert_eq!(outcome.confidence, 1.0);
        assert!(outcome.response.contains("Plano Diretor"));
        assert!(outcome.trace.iter().any(|s| s.step == "greeting"));

        let stored = cache::lookup(state.store.clone(), &normalize::fingerprint("bom dia"))
            .await
            .expect("cache acessível");
        assert!(stored.is_none(), "saudação nunca é armazenada");
    }

    #[tokio::test]
    async fn os_dois_bracos_vazios_caem_no_fallback_com_confianca_zero() {
        let (_dir, state) = test_state();
        let outcome = answer_question(&state, "qual o regime urbanístico?", None, false).await;

        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.response.contains(synthesizer::NO_DATA_TEMPLATE));
        assert!(outcome
            .trace
            .iter()
            .any(|s| s.step == "structured_retrieval" && s.summary.contains("degradado")));
        assert!(outcome
            .trace
            .iter()
            .any(|s| s.step == "cache_store" && s.summary.contains("não armazenada")));
    }

    #[tokio::test]
    async fn extremo_da_cidade_vem_do_maximo_real_do_banco() {
        let (_dir, state) = test_state();
        let outcome =
            answer_question(&state, "Qual a maior altura máxima de Porto Alegre?", None, false)
                .await;

        assert!(outcome.response.contains("130"));
        assert!(outcome.response.contains("CENTRO HISTÓRICO"));
    }
}
