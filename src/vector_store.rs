//! Busca semântica sobre os artigos legais armazenados no SQLite, com
//! fallback léxico exato por número de artigo.
//!
//! API pública:
//!   - `search_passages(...)`: embedding da pergunta + similaridade de
//!     cosseno sobre `legal_articles.embedding`, limiar e top-K.
//!
//! Referências explícitas a artigos resolvem sempre pela consulta
//! estrutural (similaridade 1.0), sem depender do embedding. Vetores
//! malformados contam como "sem resultado", nunca como erro.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::llm::LlmManager;
use crate::models::{ExtractedEntities, LegalPassage};
use crate::normalize;
use crate::sqlite_client::{self, Store};

/// Executa o braço não estruturado: fallback léxico primeiro, depois a
/// busca densa. Devolve a lista ordenada por similaridade, já filtrada
/// pelo limiar e limitada a `top_k`.
pub async fn search_passages(
    store: Arc<Store>,
    llm: &LlmManager,
    question: &str,
    entities: &ExtractedEntities,
    threshold: f64,
    top_k: usize,
) -> Result<Vec<LegalPassage>, PipelineError> {
    let mut passages = lookup_exact_articles(store.clone(), entities).await?;

    if !entities.hierarchy_refs.is_empty() {
        let hierarchy =
            lookup_hierarchy(store.clone(), entities.hierarchy_refs.clone()).await?;
        for passage in hierarchy {
            let duplicate = passages.iter().any(|p| {
                p.document_type == passage.document_type
                    && p.article_number == passage.article_number
            });
            if !duplicate {
                passages.push(passage);
            }
        }
    }

    // Falha de embedding degrada só a parte densa; o que o fallback
    // léxico encontrou continua valendo.
    let query_vector = match llm.embed_query(question).await {
        Ok(vector) => Some(vector),
        Err(e) => {
            warn!("Não foi possível gerar o embedding da pergunta: {e}");
            None
        }
    };

    if let Some(query_vector) = query_vector {
        let already_found: Vec<(String, i64)> = passages
            .iter()
            .map(|p| (p.document_type.clone(), p.article_number))
            .collect();
        let remaining = top_k.saturating_sub(passages.len());
        if remaining > 0 {
            let dense = dense_search(
                store,
                query_vector,
                doc_type_filter(entities),
                threshold,
                remaining,
                already_found,
            )
            .await?;
            passages.extend(dense);
        }
    }

    debug!("Braço não estruturado devolveu {} trecho(s)", passages.len());
    Ok(passages)
}

/// Referências explícitas ("art. 119 da LUOS") resolvem por consulta
/// exata, com similaridade 1.0, à frente de qualquer resultado denso.
async fn lookup_exact_articles(
    store: Arc<Store>,
    entities: &ExtractedEntities,
) -> Result<Vec<LegalPassage>, PipelineError> {
    let refs: Vec<(String, Vec<i64>)> = entities
        .article_refs
        .iter()
        .map(|r| (r.document_type.as_str().to_string(), r.numbers.clone()))
        .collect();
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    tokio::task::spawn_blocking(move || {
        let mut passages = Vec::new();
        for (document_type, numbers) in refs {
            for number in numbers {
                let found = store.with_read(|conn| {
                    let mut stmt = conn.prepare(
                        "SELECT document_type, article_number, hierarchy_path, full_content
                         FROM legal_articles
                         WHERE document_type = ?1 AND article_number = ?2",
                    )?;
                    let mut rows = stmt.query_map((&document_type, number), |row| {
                        Ok(LegalPassage {
                            document_type: row.get(0)?,
                            article_number: row.get(1)?,
                            hierarchy_path: row.get(2)?,
                            text: row.get(3)?,
                            similarity: 1.0,
                        })
                    })?;
                    rows.next().transpose()
                })?;
                if let Some(passage) = found {
                    passages.push(passage);
                }
            }
        }
        Ok(passages)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("tarefa de consulta interrompida: {e}")))?
}

/// Quantos artigos uma menção a título/capítulo/seção traz, no máximo; o
/// resto da divisão fica para a busca densa.
const HIERARCHY_MATCH_LIMIT: usize = 5;

/// Menções a divisões da lei ("Título VI") resolvem pelo caminho
/// hierárquico armazenado, com comparação sem acentos feita em memória
/// (o corpus de artigos é pequeno).
async fn lookup_hierarchy(
    store: Arc<Store>,
    refs: Vec<String>,
) -> Result<Vec<LegalPassage>, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let mut passages: Vec<LegalPassage> = Vec::new();
        store.with_read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT document_type, article_number, hierarchy_path, full_content
                 FROM legal_articles
                 WHERE hierarchy_path IS NOT NULL
                 ORDER BY document_type, article_number",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let hierarchy_path: String = row.get(2)?;
                let folded_path = normalize::fold(&hierarchy_path);
                if !refs.iter().any(|r| folded_path.contains(r.as_str())) {
                    continue;
                }
                passages.push(LegalPassage {
                    document_type: row.get(0)?,
                    article_number: row.get(1)?,
                    hierarchy_path: Some(hierarchy_path),
                    text: row.get(3)?,
                    similarity: 1.0,
                });
                if passages.len() >= HIERARCHY_MATCH_LIMIT {
                    break;
                }
            }
            Ok(())
        })?;
        Ok(passages)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("tarefa de consulta interrompida: {e}")))?
}

fn doc_type_filter(entities: &ExtractedEntities) -> Option<String> {
    entities
        .article_refs
        .first()
        .map(|r| r.document_type.as_str().to_string())
}

async fn dense_search(
    store: Arc<Store>,
    query_vector: Vec<f32>,
    document_type: Option<String>,
    threshold: f64,
    limit: usize,
    already_found: Vec<(String, i64)>,
) -> Result<Vec<LegalPassage>, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let query_vector = l2_normalize(query_vector);
        let mut scored: Vec<LegalPassage> = Vec::new();
        let mut malformed = 0usize;

        store.with_read(|conn| {
            let (sql, params): (&str, Vec<String>) = match &document_type {
                Some(doc) => (
                    "SELECT document_type, article_number, hierarchy_path, full_content, embedding
                     FROM legal_articles
                     WHERE embedding IS NOT NULL AND document_type = ?1",
                    vec![doc.clone()],
                ),
                None => (
                    "SELECT document_type, article_number, hierarchy_path, full_content, embedding
                     FROM legal_articles
                     WHERE embedding IS NOT NULL",
                    Vec::new(),
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

            while let Some(row) = rows.next()? {
                let document_type: String = row.get(0)?;
                let article_number: i64 = row.get(1)?;
                let blob: Vec<u8> = row.get(4)?;

                let stored = match sqlite_client::decode_embedding(&blob) {
                    Some(v) if v.len() == query_vector.len() => l2_normalize(v),
                    _ => {
                        malformed += 1;
                        continue;
                    }
                };

                let similarity = f64::from(cosine_similarity(&query_vector, &stored));
                if similarity < threshold {
                    continue;
                }
                if already_found
                    .iter()
                    .any(|(d, n)| *d == document_type && *n == article_number)
                {
                    continue;
                }

                scored.push(LegalPassage {
                    document_type,
                    article_number,
                    hierarchy_path: row.get(2)?,
                    text: row.get(3)?,
                    similarity,
                });
            }
            Ok(())
        })?;

        if malformed > 0 {
            warn!("{malformed} embedding(s) malformado(s) ignorado(s) na busca vetorial");
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("tarefa de busca interrompida: {e}")))?
}

/// Normaliza o vetor para comprimento unitário; vetor nulo fica como está.
fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Similaridade de cosseno entre vetores já normalizados (produto
/// escalar).
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::sqlite_client::Store;
    use tempfile::TempDir;

    fn article_store() -> (TempDir, Arc<Store>) {
        let dir = TempDir::new().expect("diretório temporário");
        let store = Store::open(&dir.path().join("test.db")).expect("abrir banco");
        sqlite_client::ensure_schema(&store).expect("esquema");

        store
            .insert_legal_article(
                "LUOS",
                119,
                Some("Título VI > Capítulo II".into()),
                "Art. 119 - O Sistema de Gestão e Controle realizará análise dos \
                 impactos financeiros da ação urbanística sobre a arrecadação municipal.",
                Some(&[1.0, 0.0, 0.0]),
            )
            .expect("inserir artigo");
        store
            .insert_legal_article(
                "LUOS",
                81,
                None,
                "Art. 81 - Das certificações urbanísticas e ambientais.",
                Some(&[0.0, 1.0, 0.0]),
            )
            .expect("inserir artigo");
        // Embedding malformado (3 bytes): deve ser ignorado sem erro.
        store
            .with_write(|conn| {
                conn.execute(
                    "INSERT INTO legal_articles (document_type, article_number, full_content, embedding)
                     VALUES ('LUOS', 200, 'Art. 200 - Texto.', X'010203')",
                    [],
                )
                .map(|_| ())
            })
            .expect("inserir blob malformado");

        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn referencia_explicita_resolve_por_consulta_exata() {
        let (_dir, store) = article_store();
        let analysis = analyzer::analyze("O que diz o artigo 119 da LUOS?");

        let passages = lookup_exact_articles(store, &analysis.entities)
            .await
            .expect("buscar artigos");
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].article_number, 119);
        assert!((passages[0].similarity - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn mencao_a_titulo_resolve_pelo_caminho_hierarquico() {
        let (_dir, store) = article_store();
        let analysis = analyzer::analyze("O que trata o Título VI da LUOS?");

        let passages = lookup_hierarchy(store, analysis.entities.hierarchy_refs.clone())
            .await
            .expect("buscar hierarquia");
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].article_number, 119);
        assert!((passages[0].similarity - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn busca_densa_filtra_pelo_limiar_e_ignora_malformados() {
        let (_dir, store) = article_store();
        // Vetor alinhado ao artigo 119; o artigo 81 é ortogonal e fica
        // abaixo do limiar; o 200 tem blob malformado.
        let passages = dense_search(
            store,
            vec![1.0, 0.0, 0.0],
            None,
            0.7,
            5,
            Vec::new(),
        )
        .await
        .expect("busca densa");

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].article_number, 119);
        assert!(passages[0].similarity >= 0.7);
    }

    #[tokio::test]
    async fn busca_densa_nao_duplica_o_que_o_fallback_ja_achou() {
        let (_dir, store) = article_store();
        let passages = dense_search(
            store,
            vec![1.0, 0.0, 0.0],
            None,
            0.1,
            5,
            vec![("LUOS".to_string(), 119)],
        )
        .await
        .expect("busca densa");
        assert!(passages.iter().all(|p| p.article_number != 119));
    }

    #[test]
    fn cosseno_de_vetores_normalizados() {
        let a = l2_normalize(vec![3.0, 0.0, 0.0]);
        let b = l2_normalize(vec![3.0, 0.0, 0.0]);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);

        let c = l2_normalize(vec![0.0, 2.0, 0.0]);
        assert!(cosine_similarity(&a, &c).abs() < 1e-5);
    }
}
