//! Taxonomia de erros do pipeline de recuperação e síntese.
//!
//! Apenas `SynthesisFailure` encerra uma requisição; os demais degradam o
//! braço afetado e ficam registrados no trace.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A análise encontrou mais de um candidato plausível; os candidatos
    /// seguem adiante em vez de escolher um arbitrariamente.
    #[error("análise ambígua entre entidades conhecidas: {0}")]
    AnalysisAmbiguous(String),

    /// Um recuperador estourou o tempo limite; apenas aquele braço degrada.
    #[error("tempo limite excedido no recuperador {0}")]
    RetrievalTimeout(&'static str),

    /// Um recuperador não tinha consulta aplicável ou não devolveu nada.
    #[error("nenhum dado recuperável no recuperador {0}")]
    RetrievalEmpty(&'static str),

    /// Falha ao montar a resposta final. Único erro fatal da requisição,
    /// exposto como a mensagem genérica de confiança zero.
    #[error("falha na síntese da resposta: {0}")]
    SynthesisFailure(String),

    /// O cache está inacessível; o pipeline segue sem cache.
    #[error("cache indisponível: {0}")]
    CacheUnavailable(String),

    /// Instrução SQL que não é um único SELECT.
    #[error("instrução SQL rejeitada: apenas consultas SELECT são permitidas")]
    WriteRejected,

    #[error("erro de armazenamento: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("falha interna: {0}")]
    Internal(String),
}
