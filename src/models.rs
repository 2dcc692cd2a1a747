//! Modelos de domínio do pipeline: registros do regime urbanístico,
//! trechos legais, resultado da análise de consulta e artefatos da
//! resposta sintetizada.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Um registro do regime urbanístico para um par (bairro, zona).
///
/// Um bairro pode aparecer em várias zonas; todas as linhas correspondentes
/// são preservadas, nunca colapsadas. Campos numéricos ausentes são `None`
/// ("não definido" ≠ zero).
#[derive(Debug, Clone, Serialize)]
pub struct RegimeRecord {
    pub bairro: String,
    pub zona: String,
    pub altura_maxima: Option<f64>,
    pub ca_basico: Option<f64>,
    pub ca_maximo: Option<f64>,
    pub taxa_permeabilidade: Option<f64>,
    pub area_minima_lote: Option<f64>,
    pub testada_minima_lote: Option<f64>,
}

/// Trecho legal recuperado por busca vetorial ou por número de artigo.
#[derive(Debug, Clone, Serialize)]
pub struct LegalPassage {
    pub document_type: String,
    pub article_number: i64,
    pub hierarchy_path: Option<String>,
    pub text: String,
    /// Similaridade em [0, 1]; 1.0 para correspondência léxica exata.
    pub similarity: f64,
}

/// Tipo de documento legal citável.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentType {
    Luos,
    Pdus,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Luos => "LUOS",
            DocumentType::Pdus => "PDUS",
        }
    }
}

/// Referência explícita a artigos de um documento legal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub document_type: DocumentType,
    pub numbers: Vec<i64>,
}

/// Parâmetro urbanístico reconhecido nas perguntas. Cada variante mapeia
/// para exatamente uma coluna da tabela de regime (lista branca).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbanParameter {
    AlturaMaxima,
    CaBasico,
    CaMaximo,
    TaxaPermeabilidade,
    AreaMinimaLote,
}

impl UrbanParameter {
    pub fn column(&self) -> &'static str {
        match self {
            UrbanParameter::AlturaMaxima => "altura_maxima",
            UrbanParameter::CaBasico => "ca_basico",
            UrbanParameter::CaMaximo => "ca_maximo",
            UrbanParameter::TaxaPermeabilidade => "taxa_permeabilidade",
            UrbanParameter::AreaMinimaLote => "area_minima_lote",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UrbanParameter::AlturaMaxima => "altura máxima",
            UrbanParameter::CaBasico => "coeficiente de aproveitamento básico",
            UrbanParameter::CaMaximo => "coeficiente de aproveitamento máximo",
            UrbanParameter::TaxaPermeabilidade => "taxa de permeabilidade",
            UrbanParameter::AreaMinimaLote => "área mínima do lote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    GreaterThan,
    LessThan,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::GreaterThan => ">",
            CompareOp::LessThan => "<",
        }
    }
}

/// Filtro numérico extraído da pergunta ("coeficiente maior que 2").
#[derive(Debug, Clone, PartialEq)]
pub struct NumericFilter {
    pub parameter: UrbanParameter,
    pub op: CompareOp,
    pub value: f64,
}

/// Tipo de agregação pedido pela pergunta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Max,
    Min,
    Count,
    Avg,
}

/// Agregação detectada pela análise: o extremo/contagem/média de um
/// parâmetro, na cidade inteira ou restrita a um bairro.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub kind: AggregateKind,
    pub parameter: UrbanParameter,
}

/// Valor escalar calculado na camada de dados para agregações de contagem
/// ou média (extremos voltam como linhas ordenadas).
#[derive(Debug, Clone)]
pub struct AggregateValue {
    pub kind: AggregateKind,
    pub parameter: UrbanParameter,
    pub value: f64,
    /// Bairro ao qual a agregação se restringe, se houver.
    pub scope: Option<String>,
}

/// Entidades extraídas da pergunta. Nomes de bairros e códigos de zona já
/// estão na forma canônica.
#[derive(Debug, Clone, Default)]
pub struct ExtractedEntities {
    pub bairros: Vec<String>,
    pub zonas: Vec<String>,
    pub article_refs: Vec<ArticleRef>,
    /// Menções a divisões da lei ("TITULO VI", "CAPITULO 2"), sem acentos.
    pub hierarchy_refs: Vec<String>,
    pub parametros: Vec<UrbanParameter>,
    pub numeric_filters: Vec<NumericFilter>,
}

/// Estratégia de recuperação escolhida pela análise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StructuredOnly,
    UnstructuredOnly,
    Hybrid,
    None,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::StructuredOnly => "structured_only",
            Strategy::UnstructuredOnly => "unstructured_only",
            Strategy::Hybrid => "hybrid",
            Strategy::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Tabular,
    Conceptual,
    Hybrid,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Tabular => "tabular",
            Intent::Conceptual => "conceptual",
            Intent::Hybrid => "hybrid",
        }
    }
}

/// Resultado da análise de uma pergunta. Produzido uma única vez por
/// requisição e imutável a partir daí.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub intent: Intent,
    pub strategy: Strategy,
    pub entities: ExtractedEntities,
    pub aggregate: Option<AggregateQuery>,
    pub is_aggregate: bool,
    /// Mais de um bairro candidato foi retido em vez de escolher um.
    pub needed_disambiguation: bool,
}

/// Dados reunidos pelos dois recuperadores antes da síntese. Qualquer um
/// dos braços pode estar vazio; os dois vazios é um estado terminal
/// distinto (resposta determinística de "nada encontrado").
#[derive(Debug, Clone, Default)]
pub struct RetrievalBundle {
    pub regime_rows: Vec<RegimeRecord>,
    pub aggregate: Option<AggregateValue>,
    pub passages: Vec<LegalPassage>,
}

impl RetrievalBundle {
    pub fn is_empty(&self) -> bool {
        self.regime_rows.is_empty() && self.aggregate.is_none() && self.passages.is_empty()
    }
}

/// Entrada do cache de respostas, uma por impressão digital.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub query: String,
    pub response: String,
    pub confidence: f64,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub hit_count: i64,
    pub last_accessed: DateTime<Utc>,
}

/// Um passo do trace de execução, em ordem de execução. Artefato de
/// observabilidade; não faz parte do contrato da resposta.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub step: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

/// Resposta sintetizada final.
#[derive(Debug, Clone)]
pub struct SynthesizedAnswer {
    pub text: String,
    pub confidence: f64,
    pub structured_count: usize,
    pub conceptual_count: usize,
    pub model: String,
}
