//! Analisador de consultas: classifica a pergunta em {intenção,
//! estratégia, entidades} sem chamar nenhum serviço externo.
//!
//! Ordem de análise:
//!   1. Saudação/conversa curta → estratégia `none`.
//!   2. Extração de entidades (bairros, zonas, artigos, parâmetros,
//!      filtros numéricos).
//!   3. Detecção de agregações (contagem, média, extremos), antes de
//!      qualquer classificação de construção.
//!   4. Mapeamento de sinais tabulares/conceituais para a estratégia.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::gazetteer;
use crate::models::{
    AggregateKind, AggregateQuery, AnalysisResult, ArticleRef, CompareOp, DocumentType,
    ExtractedEntities, Intent, NumericFilter, Strategy, UrbanParameter,
};
use crate::normalize;

const GREETINGS: &[&str] = &[
    "OI",
    "OLA",
    "BOM DIA",
    "BOA TARDE",
    "BOA NOITE",
    "TUDO BEM",
    "OBRIGADO",
    "OBRIGADA",
    "TCHAU",
    "VALEU",
    "ATE MAIS",
];

/// Termos de contagem/listagem (avaliados antes dos demais, como no fluxo
/// original de análise).
const COUNT_TERMS: &[&str] = &["QUANTOS", "QUANTAS", "TOTAL DE", "QUANTIDADE DE"];
const AVG_TERMS: &[&str] = &["MEDIA", "MEDIO"];
const MAX_TERMS: &[&str] = &["MAIOR", "MAIS ALTO", "MAIS ALTA", "TETO", "LIMITE MAXIMO"];
const MIN_TERMS: &[&str] = &["MENOR", "MAIS BAIXO", "MAIS BAIXA"];

const CONCEPT_TERMS: &[&str] = &[
    "O QUE E",
    "O QUE SAO",
    "O QUE DIZ",
    "CONCEITO",
    "EXPLIC",
    "POR QUE",
    "PORQUE",
    "PRINCIPIO",
    "OBJETIVO",
    "SIGNIFICA",
    "COMO FUNCIONA",
    "DISPOSICOES",
    "INSTRUMENTO",
    "OUTORGA",
    "CONCESSAO URBANISTICA",
    "CERTIFICACAO",
    "DIRETRIZ",
    "SEGUNDO A LEI",
    "DE ACORDO COM",
];

const TABULAR_TERMS: &[&str] = &[
    "REGIME URBANISTICO",
    "CONSTRUIR",
    "CONSTRUIDO",
    "EDIFICAR",
    "EDIFICACAO",
];

static ARTICLE_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bart(?:igos?)?\.?\s*(\d+)\s*(?:a|ao|ate)\s+(\d+)")
        .expect("expressão regular de faixa de artigos inválida")
});
static ARTICLE_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bart(?:igos?)?\.?\s*(\d+(?:\s*(?:,|e)\s*\d+)+)")
        .expect("expressão regular de lista de artigos inválida")
});
static ARTICLE_SINGLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bart(?:igo)?\.?\s*(\d+)")
        .expect("expressão regular de artigo inválida")
});
static ZONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:zot|zona)\s*-?\s*(\d+(?:\.\d+)?)(?:\s*-\s*([a-e]))?\b")
        .expect("expressão regular de zona inválida")
});
static HIERARCHY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(titulo|capitulo|secao)\s+([ivxlcdm]+|\d+)\b")
        .expect("expressão regular de hierarquia inválida")
});
static NUMERIC_FILTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(coeficiente|aproveitamento|\bca\b|altura|gabarito|permeabilidade)\D{0,40}?(maior(?:es)?\s+que|acima\s+de|superior(?:es)?\s+a|menor(?:es)?\s+que|abaixo\s+de|inferior(?:es)?\s+a)\s*(\d+(?:[.,]\d+)?)",
    )
    .expect("expressão regular de filtro numérico inválida")
});
static BARE_CA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bCA\b").expect("expressão regular de CA inválida"));

/// Analisa a pergunta e produz o resultado imutável usado pelo resto do
/// pipeline.
pub fn analyze(question: &str) -> AnalysisResult {
    let folded = normalize::fold(question);
    let unaccented = normalize::remove_accents(question);

    if is_greeting(&folded) {
        return AnalysisResult {
            intent: Intent::Greeting,
            strategy: Strategy::None,
            entities: ExtractedEntities::default(),
            aggregate: None,
            is_aggregate: false,
            needed_disambiguation: false,
        };
    }

    let mut entities = ExtractedEntities {
        bairros: gazetteer::find_bairros(question),
        zonas: extract_zonas(&unaccented),
        article_refs: extract_article_refs(&unaccented, &folded),
        hierarchy_refs: extract_hierarchy_refs(&unaccented),
        parametros: extract_parametros(&folded),
        numeric_filters: extract_numeric_filters(&unaccented),
    };

    let aggregate = detect_aggregate(
        &folded,
        &entities.parametros,
        !entities.numeric_filters.is_empty(),
    );

    let has_conceptual = !entities.article_refs.is_empty()
        || !entities.hierarchy_refs.is_empty()
        || CONCEPT_TERMS.iter().any(|t| folded.contains(t));
    let mut has_tabular = !entities.bairros.is_empty()
        || !entities.zonas.is_empty()
        || !entities.parametros.is_empty()
        || !entities.numeric_filters.is_empty()
        || aggregate.is_some()
        || TABULAR_TERMS.iter().any(|t| folded.contains(t));

    // Regra de consulta curta: 1-3 palavras sem nenhum outro sinal são
    // tratadas como possível nome de bairro (lookup tabular), exceto o
    // nome da própria cidade.
    if !has_tabular && !has_conceptual {
        let words = folded.split_whitespace().count();
        if words > 0 && words <= 3 {
            let candidate = normalize::normalize_bairro(question);
            if candidate.len() > 2 && candidate != "PORTO ALEGRE" {
                entities.bairros.push(candidate);
                has_tabular = true;
            }
        }
    }

    let (intent, strategy) = match (has_tabular, has_conceptual) {
        (true, true) => (Intent::Hybrid, Strategy::Hybrid),
        (true, false) => (Intent::Tabular, Strategy::StructuredOnly),
        (false, true) => (Intent::Conceptual, Strategy::UnstructuredOnly),
        // Sem sinal algum: híbrido como padrão seguro.
        (false, false) => (Intent::Hybrid, Strategy::Hybrid),
    };

    let needed_disambiguation = entities.bairros.len() > 1;
    let is_aggregate = aggregate.is_some();

    AnalysisResult {
        intent,
        strategy,
        entities,
        aggregate,
        is_aggregate,
        needed_disambiguation,
    }
}

/// Uma pergunta é saudação quando consiste apenas em expressões de
/// cortesia, sem nenhum conteúdo adicional.
fn is_greeting(folded: &str) -> bool {
    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut rest = normalize::collapse_whitespace(&cleaned);
    if rest.is_empty() {
        return false;
    }
    loop {
        let mut advanced = false;
        for greeting in GREETINGS {
            if rest == *greeting {
                return true;
            }
            if let Some(after) = rest.strip_prefix(&format!("{greeting} ")) {
                rest = after.to_string();
                advanced = true;
                break;
            }
        }
        if !advanced {
            return false;
        }
    }
}

fn extract_zonas(unaccented: &str) -> Vec<String> {
    let mut zonas = Vec::new();
    for cap in ZONE_RE.captures_iter(unaccented) {
        let mut raw = format!("ZOT {}", &cap[1]);
        if let Some(sub) = cap.get(2) {
            raw.push('-');
            raw.push_str(sub.as_str());
        }
        let zona = normalize::normalize_zona(&raw);
        if !zonas.contains(&zona) {
            zonas.push(zona);
        }
    }
    zonas
}

fn extract_article_refs(unaccented: &str, folded: &str) -> Vec<ArticleRef> {
    let document_type = if folded.contains("PDUS") || folded.contains("PLANO DIRETOR") {
        DocumentType::Pdus
    } else {
        DocumentType::Luos
    };

    // Faixa ("artigos 75 a 79") tem precedência sobre lista e número único.
    if let Some(cap) = ARTICLE_RANGE_RE.captures(unaccented) {
        let start: i64 = cap[1].parse().unwrap_or(0);
        let end: i64 = cap[2].parse().unwrap_or(0);
        if start > 0 && end >= start && end - start <= 50 {
            return vec![ArticleRef {
                document_type,
                numbers: (start..=end).collect(),
            }];
        }
    }

    if let Some(cap) = ARTICLE_LIST_RE.captures(unaccented) {
        let numbers: Vec<i64> = cap[1]
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        if numbers.len() > 1 {
            return vec![ArticleRef {
                document_type,
                numbers,
            }];
        }
    }

    if let Some(cap) = ARTICLE_SINGLE_RE.captures(unaccented) {
        if let Ok(number) = cap[1].parse::<i64>() {
            return vec![ArticleRef {
                document_type,
                numbers: vec![number],
            }];
        }
    }

    Vec::new()
}

/// Menções a divisões hierárquicas da lei ("Título VI", "capítulo 2"),
/// normalizadas para maiúsculas sem acentos.
fn extract_hierarchy_refs(unaccented: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for cap in HIERARCHY_RE.captures_iter(unaccented) {
        let reference = format!("{} {}", cap[1].to_uppercase(), cap[2].to_uppercase());
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }
    refs
}

fn extract_parametros(folded: &str) -> Vec<UrbanParameter> {
    let mut parametros = Vec::new();
    let push = |p: UrbanParameter, list: &mut Vec<UrbanParameter>| {
        if !list.contains(&p) {
            list.push(p);
        }
    };

    if folded.contains("ALTURA") || folded.contains("GABARITO") {
        push(UrbanParameter::AlturaMaxima, &mut parametros);
    }

    let coef_basico = folded.contains("COEFICIENTE BASICO")
        || folded.contains("CA BASICO")
        || folded.contains("APROVEITAMENTO BASICO");
    let coef_maximo = folded.contains("COEFICIENTE MAXIMO")
        || folded.contains("CA MAXIMO")
        || folded.contains("APROVEITAMENTO MAXIMO")
        || folded.contains("POTENCIAL CONSTRUTIVO");
    if coef_basico {
        push(UrbanParameter::CaBasico, &mut parametros);
    }
    if coef_maximo {
        push(UrbanParameter::CaMaximo, &mut parametros);
    }
    if !coef_basico
        && !coef_maximo
        && (folded.contains("COEFICIENTE")
            || folded.contains("APROVEITAMENTO")
            || folded.contains("INDICE CONSTRUTIVO")
            || BARE_CA_RE.is_match(folded))
    {
        // Variante genérica ("coeficiente", "CA") pede as duas colunas.
        push(UrbanParameter::CaBasico, &mut parametros);
        push(UrbanParameter::CaMaximo, &mut parametros);
    }

    if folded.contains("PERMEABILIDADE") || folded.contains("PERMEAVEL") {
        push(UrbanParameter::TaxaPermeabilidade, &mut parametros);
    }
    if folded.contains("AREA MINIMA") || folded.contains("LOTE MINIMO") || folded.contains("TESTADA")
    {
        push(UrbanParameter::AreaMinimaLote, &mut parametros);
    }

    parametros
}

fn extract_numeric_filters(unaccented: &str) -> Vec<NumericFilter> {
    let mut filters = Vec::new();
    for cap in NUMERIC_FILTER_RE.captures_iter(unaccented) {
        let term = cap[1].to_uppercase();
        let parameter = if term.contains("ALTURA") || term.contains("GABARITO") {
            UrbanParameter::AlturaMaxima
        } else if term.contains("PERMEABILIDADE") {
            UrbanParameter::TaxaPermeabilidade
        } else {
            UrbanParameter::CaMaximo
        };
        let op_text = cap[2].to_uppercase();
        let op = if op_text.starts_with("MAIOR")
            || op_text.starts_with("ACIMA")
            || op_text.starts_with("SUPERIOR")
        {
            CompareOp::GreaterThan
        } else {
            CompareOp::LessThan
        };
        if let Ok(value) = cap[3].replace(',', ".").parse::<f64>() {
            filters.push(NumericFilter {
                parameter,
                op,
                value,
            });
        }
    }
    filters
}

fn detect_aggregate(
    folded: &str,
    parametros: &[UrbanParameter],
    has_numeric_filters: bool,
) -> Option<AggregateQuery> {
    let coefficient_focus = parametros.contains(&UrbanParameter::CaMaximo)
        || parametros.contains(&UrbanParameter::CaBasico);
    let parameter = if coefficient_focus {
        UrbanParameter::CaMaximo
    } else if parametros.contains(&UrbanParameter::TaxaPermeabilidade) {
        UrbanParameter::TaxaPermeabilidade
    } else {
        UrbanParameter::AlturaMaxima
    };

    // Contagem é avaliada primeiro e exige menção a bairro/zona.
    if COUNT_TERMS.iter().any(|t| folded.contains(t))
        && (folded.contains("BAIRRO") || folded.contains("ZONA") || folded.contains("ZOT"))
    {
        return Some(AggregateQuery {
            kind: AggregateKind::Count,
            parameter,
        });
    }

    // Média e extremos só fazem sentido junto a um parâmetro urbanístico.
    // "maior que 2" é comparação, não superlativo.
    if parametros.is_empty() || has_numeric_filters {
        return None;
    }
    if AVG_TERMS.iter().any(|t| folded.contains(t)) {
        return Some(AggregateQuery {
            kind: AggregateKind::Avg,
            parameter,
        });
    }
    if MAX_TERMS.iter().any(|t| folded.contains(t)) {
        return Some(AggregateQuery {
            kind: AggregateKind::Max,
            parameter,
        });
    }
    if MIN_TERMS.iter().any(|t| folded.contains(t)) {
        return Some(AggregateQuery {
            kind: AggregateKind::Min,
            parameter,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saudacao_curto_circuita_com_estrategia_none() {
        for q in ["Olá!", "bom dia", "Oi, tudo bem?"] {
            let result = analyze(q);
            assert_eq!(result.strategy, Strategy::None, "pergunta: {q}");
            assert_eq!(result.intent, Intent::Greeting);
        }
    }

    #[test]
    fn saudacao_com_pergunta_real_nao_curto_circuita() {
        let result = analyze("Bom dia, qual a altura máxima do Cristal?");
        assert_ne!(result.strategy, Strategy::None);
        assert_eq!(result.entities.bairros, vec!["CRISTAL"]);
    }

    #[test]
    fn nome_de_bairro_isolado_vira_lookup_tabular() {
        let result = analyze("Petrópolis");
        assert_eq!(result.strategy, Strategy::StructuredOnly);
        assert_eq!(result.entities.bairros, vec!["PETROPOLIS"]);
    }

    #[test]
    fn consulta_curta_desconhecida_vira_candidato_a_bairro() {
        let result = analyze("vila imaginária");
        assert_eq!(result.strategy, Strategy::StructuredOnly);
        assert_eq!(result.entities.bairros, vec!["VILA IMAGINARIA"]);
    }

    #[test]
    fn nome_da_cidade_nao_e_entidade_de_bairro() {
        let result = analyze("Porto Alegre");
        assert!(result.entities.bairros.is_empty());

        let result = analyze("Qual a maior altura máxima de Porto Alegre?");
        assert!(result.entities.bairros.is_empty());
        assert!(result.is_aggregate);
    }

    #[test]
    fn agregacao_de_extremo_na_cidade() {
        let result = analyze("Qual a maior altura máxima prevista na cidade?");
        let aggregate = result.aggregate.expect("deveria detectar agregação");
        assert_eq!(aggregate.kind, AggregateKind::Max);
        assert_eq!(aggregate.parameter, UrbanParameter::AlturaMaxima);
        assert_eq!(result.strategy, Strategy::StructuredOnly);
    }

    #[test]
    fn contagem_de_bairros_e_agregacao_nao_construcao() {
        let result = analyze("Quantos bairros tem Porto Alegre?");
        let aggregate = result.aggregate.expect("deveria detectar contagem");
        assert_eq!(aggregate.kind, AggregateKind::Count);
        assert_eq!(result.strategy, Strategy::StructuredOnly);
    }

    #[test]
    fn referencia_a_artigo_unico() {
        let result = analyze("O que diz o artigo 119 da LUOS?");
        assert_eq!(result.strategy, Strategy::UnstructuredOnly);
        let article_ref = &result.entities.article_refs[0];
        assert_eq!(article_ref.document_type, DocumentType::Luos);
        assert_eq!(article_ref.numbers, vec![119]);
    }

    #[test]
    fn faixa_de_artigos_expande_todos_os_numeros() {
        let result = analyze("Resuma os artigos 75 a 78 do plano diretor");
        let article_ref = &result.entities.article_refs[0];
        assert_eq!(article_ref.document_type, DocumentType::Pdus);
        assert_eq!(article_ref.numbers, vec![75, 76, 77, 78]);
    }

    #[test]
    fn lista_de_artigos() {
        let result = analyze("o que dizem os artigos 75, 76 e 77?");
        assert_eq!(result.entities.article_refs[0].numbers, vec![75, 76, 77]);
    }

    #[test]
    fn mencao_a_hierarquia_vira_entidade_conceitual() {
        let result = analyze("O que trata o Título VI da LUOS?");
        assert_eq!(result.entities.hierarchy_refs, vec!["TITULO VI"]);
        assert_eq!(result.strategy, Strategy::UnstructuredOnly);

        let result = analyze("resumo do capítulo 2 do plano diretor");
        assert_eq!(result.entities.hierarchy_refs, vec!["CAPITULO 2"]);
    }

    #[test]
    fn zona_e_normalizada_para_forma_canonica() {
        let result = analyze("quais os parâmetros da zona 7?");
        assert_eq!(result.entities.zonas, vec!["ZOT 07"]);

        let result = analyze("altura da ZOT 08.3-C");
        assert_eq!(result.entities.zonas, vec!["ZOT 08.3-C"]);
    }

    #[test]
    fn filtro_numerico_de_coeficiente() {
        let result = analyze("quais zonas têm coeficiente maior que 2?");
        let filter = &result.entities.numeric_filters[0];
        assert_eq!(filter.parameter, UrbanParameter::CaMaximo);
        assert_eq!(filter.op, CompareOp::GreaterThan);
        assert!((filter.value - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dois_bairros_marcam_desambiguacao() {
        let result = analyze("Compare a altura máxima de Boa Vista e Boa Vista do Sul");
        assert_eq!(result.entities.bairros.len(), 2);
        assert!(result.needed_disambiguation);
    }

    #[test]
    fn pergunta_mista_vira_hibrida() {
        let result =
            analyze("Qual a altura máxima do Petrópolis e o que diz o art. 81 sobre certificações?");
        assert_eq!(result.strategy, Strategy::Hybrid);
        assert!(!result.entities.bairros.is_empty());
        assert!(!result.entities.article_refs.is_empty());
    }
}
