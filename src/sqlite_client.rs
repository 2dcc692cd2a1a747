//! Acesso ao SQLite: uma conexão de escrita e um pequeno pool de conexões
//! somente leitura sobre o mesmo arquivo, com o esquema garantido na
//! inicialização.
//!
//! API pública:
//!   - `Store::open(&Path)` / `with_read` / `with_write`
//!   - `ensure_schema(&Store)`
//!   - `insert_regime_record` / `insert_legal_article` (fronteira de
//!     ingestão tipada: canonicaliza bairro e zona uma única vez)

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags};
use tracing::info;

use crate::errors::PipelineError;
use crate::models::RegimeRecord;
use crate::normalize;

const READ_POOL_SIZE: usize = 4;

/// Par de conexões sobre o arquivo SQLite: o escritor serve o cache; as
/// leitoras (somente leitura, WAL) servem os recuperadores concorrentes.
pub struct Store {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl Store {
    /// Abre o banco no caminho dado, criando-o se necessário, e aplica os
    /// pragmas de concorrência (WAL permite leituras durante escrita).
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let writer = Connection::open(path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;

        let mut readers = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            readers.push(Mutex::new(conn));
        }

        info!("Banco SQLite aberto em {}", path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next: AtomicUsize::new(0),
        })
    }

    /// Executa uma closure com uma conexão de leitura do pool (round-robin).
    pub fn with_read<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, PipelineError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let guard = self.readers[idx]
            .lock()
            .map_err(|e| PipelineError::Internal(format!("conexão de leitura envenenada: {e}")))?;
        f(&guard).map_err(PipelineError::from)
    }

    /// Executa uma closure com a conexão de escrita.
    pub fn with_write<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, PipelineError> {
        let guard = self
            .writer
            .lock()
            .map_err(|e| PipelineError::Internal(format!("conexão de escrita envenenada: {e}")))?;
        f(&guard).map_err(PipelineError::from)
    }

    /// Sonda de vivacidade usada pelo endpoint de saúde.
    pub fn health_check(&self) -> Result<(), PipelineError> {
        self.with_read(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
    }

    /// Insere um registro do regime urbanístico, canonicalizando bairro e
    /// zona. Este é o único ponto de entrada de dados do regime.
    pub fn insert_regime_record(&self, record: &RegimeRecord) -> Result<(), PipelineError> {
        let bairro = normalize::collapse_whitespace(&normalize::fold(&record.bairro));
        let zona = normalize::normalize_zona(&record.zona);
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO regime_urbanistico
                     (bairro, zona, altura_maxima, ca_basico, ca_maximo,
                      taxa_permeabilidade, area_minima_lote, testada_minima_lote)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bairro,
                    zona,
                    record.altura_maxima,
                    record.ca_basico,
                    record.ca_maximo,
                    record.taxa_permeabilidade,
                    record.area_minima_lote,
                    record.testada_minima_lote,
                ],
            )
            .map(|_| ())
        })
    }

    /// Insere (ou substitui) um artigo legal, com embedding opcional.
    pub fn insert_legal_article(
        &self,
        document_type: &str,
        article_number: i64,
        hierarchy_path: Option<&str>,
        full_content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), PipelineError> {
        let blob = embedding.map(encode_embedding);
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO legal_articles
                     (document_type, article_number, hierarchy_path, full_content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(document_type, article_number) DO UPDATE SET
                     hierarchy_path = excluded.hierarchy_path,
                     full_content = excluded.full_content,
                     embedding = excluded.embedding",
                params![
                    document_type.to_uppercase(),
                    article_number,
                    hierarchy_path,
                    full_content,
                    blob,
                ],
            )
            .map(|_| ())
        })
    }
}

/// Cria as tabelas e índices usados pelo pipeline, se ainda não existirem.
pub fn ensure_schema(store: &Store) -> Result<(), PipelineError> {
    let statements = [
        // Tabela do regime urbanístico, chaveada por (bairro, zona); pares
        // repetidos são legítimos e preservados.
        "CREATE TABLE IF NOT EXISTS regime_urbanistico (
             id INTEGER PRIMARY KEY,
             bairro TEXT NOT NULL,
             zona TEXT NOT NULL,
             altura_maxima REAL,
             ca_basico REAL,
             ca_maximo REAL,
             taxa_permeabilidade REAL,
             area_minima_lote REAL,
             testada_minima_lote REAL
         )",
        "CREATE INDEX IF NOT EXISTS idx_regime_bairro ON regime_urbanistico (bairro)",
        "CREATE INDEX IF NOT EXISTS idx_regime_zona ON regime_urbanistico (zona)",
        // Corpus legal com embeddings (f32 little-endian em BLOB).
        "CREATE TABLE IF NOT EXISTS legal_articles (
             id INTEGER PRIMARY KEY,
             document_type TEXT NOT NULL,
             article_number INTEGER NOT NULL,
             hierarchy_path TEXT,
             full_content TEXT NOT NULL,
             embedding BLOB,
             UNIQUE (document_type, article_number)
         )",
        // Cache de respostas, uma linha por impressão digital.
        "CREATE TABLE IF NOT EXISTS query_cache (
             key TEXT PRIMARY KEY,
             query TEXT NOT NULL,
             response TEXT NOT NULL,
             confidence REAL NOT NULL,
             category TEXT NOT NULL,
             created_at TEXT NOT NULL,
             hit_count INTEGER NOT NULL DEFAULT 0,
             last_accessed TEXT NOT NULL
         )",
    ];

    store.with_write(|conn| {
        for stmt in statements {
            conn.execute(stmt, [])?;
        }
        Ok(())
    })?;

    info!("Esquema do SQLite garantido (tabelas e índices criados).");
    Ok(())
}

/// Serializa um embedding como bytes f32 little-endian.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodifica um BLOB de embedding; `None` se o tamanho não for múltiplo
/// de 4 bytes (vetor malformado).
pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().expect("diretório temporário");
        let store = Store::open(&dir.path().join("test.db")).expect("abrir banco");
        ensure_schema(&store).expect("esquema");
        (dir, store)
    }

    fn record(bairro: &str, zona: &str, altura: Option<f64>) -> RegimeRecord {
        RegimeRecord {
            bairro: bairro.to_string(),
            zona: zona.to_string(),
            altura_maxima: altura,
            ca_basico: None,
            ca_maximo: None,
            taxa_permeabilidade: None,
            area_minima_lote: None,
            testada_minima_lote: None,
        }
    }

    #[test]
    fn insercao_canonicaliza_bairro_e_zona() {
        let (_dir, store) = test_store();
        store
            .insert_regime_record(&record("Três Figueiras", "zona 7", Some(60.0)))
            .expect("inserir");

        let (bairro, zona): (String, String) = store
            .with_read(|conn| {
                conn.query_row(
                    "SELECT bairro, zona FROM regime_urbanistico LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .expect("ler");
        assert_eq!(bairro, "TRES FIGUEIRAS");
        assert_eq!(zona, "ZOT 07");
    }

    #[test]
    fn leitores_sao_somente_leitura() {
        let (_dir, store) = test_store();
        let result = store.with_read(|conn| {
            conn.execute("INSERT INTO query_cache (key, query, response, confidence, category, created_at, last_accessed) VALUES ('k','q','r',1.0,'c','t','t')", [])
                .map(|_| ())
        });
        assert!(result.is_err(), "escrita por conexão de leitura deveria falhar");
    }

    #[test]
    fn embedding_roundtrip_e_blob_malformado() {
        let vector = vec![0.1_f32, -0.5, 2.0];
        let blob = encode_embedding(&vector);
        assert_eq!(decode_embedding(&blob), Some(vector));

        assert_eq!(decode_embedding(&[1, 2, 3]), None);
        assert_eq!(decode_embedding(&[]), None);
    }
}
