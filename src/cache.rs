//! Cache de respostas chaveado pela impressão digital da pergunta.
//!
//! Uma entrada por impressão digital; o incremento de acessos é um único
//! UPDATE (atômico, sem ler-modificar-escrever). Não há expiração
//! automática: a invalidação é uma operação administrativa externa.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::errors::PipelineError;
use crate::models::{CacheEntry, SynthesizedAnswer};
use crate::sqlite_client::Store;

/// Estatísticas agregadas do cache, expostas pela API.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub total_hits: i64,
    pub top_queries: Vec<TopQuery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopQuery {
    pub query: String,
    pub hit_count: i64,
}

/// Procura a entrada da impressão digital dada. `None` é um miss; erros de
/// armazenamento sobem como `CacheUnavailable` para o orquestrador seguir
/// sem cache.
pub async fn lookup(
    store: Arc<Store>,
    fingerprint: &str,
) -> Result<Option<CacheEntry>, PipelineError> {
    let key = fingerprint.to_string();
    run_blocking(move || {
        store.with_read(|conn| {
            conn.query_row(
                "SELECT key, query, response, confidence, category,
                        created_at, hit_count, last_accessed
                 FROM query_cache WHERE key = ?1",
                [&key],
                row_to_entry,
            )
            .optional()
        })
    })
    .await
}

/// Registra um acerto: incrementa `hit_count` e atualiza `last_accessed`
/// em uma única instrução.
pub async fn bump(store: Arc<Store>, fingerprint: &str) -> Result<(), PipelineError> {
    let key = fingerprint.to_string();
    let now = Utc::now().to_rfc3339();
    run_blocking(move || {
        store.with_write(|conn| {
            conn.execute(
                "UPDATE query_cache
                 SET hit_count = hit_count + 1, last_accessed = ?2
                 WHERE key = ?1",
                params![key, now],
            )
            .map(|_| ())
        })
    })
    .await
}

/// Guarda (ou substitui) a resposta sintetizada para a impressão digital.
/// Em caso de conflito, `hit_count` e `created_at` da entrada existente
/// são preservados: a popularidade sobrevive a uma nova síntese.
pub async fn store_answer(
    store: Arc<Store>,
    fingerprint: &str,
    question: &str,
    answer: &SynthesizedAnswer,
    category: &str,
) -> Result<(), PipelineError> {
    let key = fingerprint.to_string();
    let question = question.to_string();
    let response = answer.text.clone();
    let confidence = answer.confidence;
    let category = category.to_string();
    let now = Utc::now().to_rfc3339();
    run_blocking(move || {
        store.with_write(|conn| {
            conn.execute(
                "INSERT INTO query_cache
                     (key, query, response, confidence, category,
                      created_at, hit_count, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                     query = excluded.query,
                     response = excluded.response,
                     confidence = excluded.confidence,
                     category = excluded.category,
                     last_accessed = excluded.last_accessed",
                params![key, question, response, confidence, category, now],
            )
            .map(|_| ())
        })
    })
    .await
}

/// Estatísticas para o endpoint de observabilidade do cache.
pub async fn stats(store: Arc<Store>) -> Result<CacheStats, PipelineError> {
    run_blocking(move || {
        store.with_read(|conn| {
            let total_entries =
                conn.query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))?;
            let total_hits = conn.query_row(
                "SELECT COALESCE(SUM(hit_count), 0) FROM query_cache",
                [],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT query, hit_count FROM query_cache
                 ORDER BY hit_count DESC, last_accessed DESC LIMIT 10",
            )?;
            let top_queries = stmt
                .query_map([], |row| {
                    Ok(TopQuery {
                        query: row.get(0)?,
                        hit_count: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(CacheStats {
                total_entries,
                total_hits,
                top_queries,
            })
        })
    })
    .await
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, PipelineError> + Send + 'static,
) -> Result<T, PipelineError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::CacheUnavailable(format!("tarefa de cache interrompida: {e}")))?
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let created_at: String = row.get(5)?;
    let last_accessed: String = row.get(7)?;
    Ok(CacheEntry {
        key: row.get(0)?,
        query: row.get(1)?,
        response: row.get(2)?,
        confidence: row.get(3)?,
        category: row.get(4)?,
        created_at: parse_timestamp(&created_at),
        hit_count: row.get(6)?,
        last_accessed: parse_timestamp(&last_accessed),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_client::{self, Store};
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Arc<Store>) {
        let dir = TempDir::new().expect("diretório temporário");
        let store = Store::open(&dir.path().join("test.db")).expect("abrir banco");
        sqlite_client::ensure_schema(&store).expect("esquema");
        (dir, Arc::new(store))
    }

    fn answer(text: &str, confidence: f64) -> SynthesizedAnswer {
        SynthesizedAnswer {
            text: text.to_string(),
            confidence,
            structured_count: 1,
            conceptual_count: 0,
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[tokio::test]
    async fn guardar_e_procurar_preserva_os_campos() {
        let (_dir, store) = test_store();
        store_answer(
            store.clone(),
            "qual a altura do cristal",
            "Qual a altura do Cristal?",
            &answer("resposta", 0.85),
            "tabular",
        )
        .await
        .expect("guardar");

        let entry = lookup(store, "qual a altura do cristal")
            .await
            .expect("procurar")
            .expect("deveria existir");
        assert_eq!(entry.response, "resposta");
        assert_eq!(entry.category, "tabular");
        assert_eq!(entry.hit_count, 0);
        assert!((entry.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn impressao_digital_desconhecida_e_miss() {
        let (_dir, store) = test_store();
        let found = lookup(store, "nunca vista").await.expect("procurar");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn bump_incrementa_sem_tocar_no_conteudo() {
        let (_dir, store) = test_store();
        store_answer(store.clone(), "chave", "pergunta", &answer("r", 0.9), "tabular")
            .await
            .expect("guardar");

        bump(store.clone(), "chave").await.expect("bump");
        bump(store.clone(), "chave").await.expect("bump");

        let entry = lookup(store, "chave")
            .await
            .expect("procurar")
            .expect("existe");
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.response, "r");
    }

    #[tokio::test]
    async fn regravar_preserva_hit_count() {
        let (_dir, store) = test_store();
        store_answer(store.clone(), "chave", "pergunta", &answer("v1", 0.8), "tabular")
            .await
            .expect("guardar");
        bump(store.clone(), "chave").await.expect("bump");

        store_answer(store.clone(), "chave", "pergunta", &answer("v2", 0.9), "tabular")
            .await
            .expect("regravar");

        let entry = lookup(store, "chave")
            .await
            .expect("procurar")
            .expect("existe");
        assert_eq!(entry.response, "v2");
        assert_eq!(entry.hit_count, 1, "a popularidade sobrevive à nova síntese");
    }

    #[tokio::test]
    async fn estatisticas_somam_acessos() {
        let (_dir, store) = test_store();
        store_answer(store.clone(), "a", "pergunta a", &answer("ra", 0.9), "tabular")
            .await
            .expect("guardar");
        store_answer(store.clone(), "b", "pergunta b", &answer("rb", 0.9), "conceptual")
            .await
            .expect("guardar");
        bump(store.clone(), "a").await.expect("bump");
        bump(store.clone(), "a").await.expect("bump");
        bump(store.clone(), "b").await.expect("bump");

        let stats = stats(store).await.expect("estatísticas");
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_hits, 3);
        assert_eq!(stats.top_queries[0].query, "pergunta a");
    }
}
