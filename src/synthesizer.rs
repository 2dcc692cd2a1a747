//! Sintetizador de respostas: transforma o pacote de recuperação em uma
//! única resposta em português sob um contrato fixo.
//!
//! Contrato:
//!   1. todo número vem de um campo recuperado; o passo generativo só
//!      escreve prosa em volta de valores já extraídos;
//!   2. um bairro com N zonas enumera as N zonas;
//!   3. valor nulo vira "não definido", nunca zero;
//!   4. afirmações legais citam (documento, artigo) apenas de trechos que
//!      passaram o limiar de similaridade;
//!   5. o rodapé fixo fecha toda resposta, literal;
//!   6. pacote vazio nos dois braços → mensagem determinística de "nada
//!      encontrado" com confiança exatamente 0.

use tracing::warn;

use crate::errors::PipelineError;
use crate::gazetteer;
use crate::llm::LlmManager;
use crate::models::{
    AggregateKind, AggregateValue, AnalysisResult, Intent, LegalPassage, RegimeRecord,
    RetrievalBundle, SynthesizedAnswer, UrbanParameter,
};

/// Bloco final de referência, anexado literalmente a toda resposta.
pub const FOOTER_TEMPLATE: &str = "\
📍 Explore mais:
Mapa com Regras Construtivas: https://bit.ly/3ILdXRA ↗ ↗
Contribua com sugestões: https://bit.ly/4o7AWqb ↗ ↗
Participe da Audiência Pública: https://bit.ly/4oefZKm ↗ ↗
💬 Dúvidas? planodiretor@portoalegre.rs.gov.br";

/// Mensagem determinística para o estado terminal de "nada encontrado".
pub const NO_DATA_TEMPLATE: &str =
    "Não foram encontrados dados específicos para esta consulta na base de dados oficial.";

const EXCERPT_LIMIT: usize = 280;

/// Sintetiza a resposta final. Nunca devolve erro: uma falha do passo
/// generativo cai no texto determinístico, e o pacote vazio cai no
/// template de "nada encontrado" com confiança zero.
pub async fn synthesize(
    llm: &LlmManager,
    question: &str,
    analysis: &AnalysisResult,
    bundle: &RetrievalBundle,
    model_hint: Option<&str>,
) -> SynthesizedAnswer {
    let model = llm.resolve_model(model_hint).to_string();

    if bundle.is_empty() {
        return SynthesizedAnswer {
            text: ensure_footer(NO_DATA_TEMPLATE.to_string()),
            confidence: 0.0,
            structured_count: 0,
            conceptual_count: 0,
            model,
        };
    }

    let deterministic = build_deterministic(analysis, bundle);

    // O passo generativo só roda quando há contexto legal junto aos dados
    // tabulares; respostas puramente tabulares ou puramente legais já
    // saem prontas do formato determinístico.
    let text = if !bundle.regime_rows.is_empty() && !bundle.passages.is_empty() {
        match prose_pass(llm, question, &deterministic, &bundle.passages, model_hint).await {
            Ok(prose) => ensure_footer(prose),
            Err(e) => {
                warn!("{e}; mantendo o texto determinístico");
                deterministic
            }
        }
    } else {
        deterministic
    };

    SynthesizedAnswer {
        text,
        confidence: compute_confidence(analysis, bundle),
        structured_count: bundle.regime_rows.len() + usize::from(bundle.aggregate.is_some()),
        conceptual_count: bundle.passages.len(),
        model,
    }
}

/// Confiança reprodutível e monotônica em (linhas estruturadas, trechos
/// legais acima do limiar, necessidade de desambiguação). Pacote vazio é
/// tratado antes e vale exatamente 0.
pub fn compute_confidence(analysis: &AnalysisResult, bundle: &RetrievalBundle) -> f64 {
    if bundle.is_empty() {
        return 0.0;
    }
    let mut confidence = 0.0;
    if !bundle.regime_rows.is_empty() || bundle.aggregate.is_some() {
        confidence += 0.7;
        // Extremos e contagens resolvidos pelo SQL são as respostas mais
        // verificáveis da base.
        if analysis.is_aggregate {
            confidence += 0.1;
        }
    }
    if let Some(best) = bundle
        .passages
        .iter()
        .map(|p| p.similarity)
        .reduce(f64::max)
    {
        confidence += 0.4 + 0.3 * best;
        if bundle.passages.len() >= 3 {
            confidence += 0.05;
        }
    }
    if analysis.needed_disambiguation {
        confidence -= 0.1;
    }
    confidence.clamp(0.0, 1.0)
}

/// Garante o rodapé fixo no fim do texto, inclusive quando o passo
/// generativo o omitiu.
pub fn ensure_footer(mut text: String) -> String {
    if !text.contains("planodiretor@portoalegre.rs.gov.br") {
        text.push_str("\n\n");
        text.push_str(FOOTER_TEMPLATE);
    }
    text
}

fn build_deterministic(analysis: &AnalysisResult, bundle: &RetrievalBundle) -> String {
    let mut out = String::new();

    if let Some(aggregate) = &bundle.aggregate {
        out.push_str(&aggregate_sentence(aggregate));
        out.push_str("\n\n");
    } else if let (Some(agg), Some(first)) = (&analysis.aggregate, bundle.regime_rows.first()) {
        if let Some(sentence) = extreme_sentence(agg.kind, agg.parameter, first) {
            out.push_str(&sentence);
            out.push_str("\n\n");
        }
    }

    if !bundle.regime_rows.is_empty() {
        for (bairro, rows) in group_by_bairro(&bundle.regime_rows) {
            let display = gazetteer::display_name(&bairro).unwrap_or(bairro.as_str());
            out.push_str(&format!("Para o bairro {display}, os dados oficiais são:\n\n"));
            out.push_str(&format_regime_table(&rows));
            out.push('\n');
        }
        out.push_str(&glossary());
        out.push('\n');
    }

    if !bundle.passages.is_empty() {
        out.push_str("📜 **Base legal:**\n\n");
        for passage in &bundle.passages {
            out.push_str(&citation_line(passage));
        }
        out.push('\n');
    } else if expects_legal_context(analysis) {
        out.push_str(
            "Nenhum artigo da LUOS ou do PDUS foi localizado com confiança suficiente \
             para fundamentar juridicamente esta resposta.\n",
        );
    }

    ensure_footer(out.trim_end().to_string())
}

/// Tabela do regime no formato da resposta oficial; uma linha por zona,
/// todas as zonas do bairro, e nulos como "não definido".
fn format_regime_table(rows: &[&RegimeRecord]) -> String {
    let mut table = String::from(
        "| Zona | Altura Máx | CA Básico | CA Máximo | Taxa Permeab. | Área Mín. Lote |\n\
         |------|------------|-----------|-----------|---------------|----------------|\n",
    );
    for row in rows {
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            row.zona,
            render_value(row.altura_maxima, "m"),
            render_value(row.ca_basico, ""),
            render_value(row.ca_maximo, ""),
            render_value(row.taxa_permeabilidade, "%"),
            render_value(row.area_minima_lote, "m²"),
        ));
    }
    table
}

/// Número recuperado com unidade, ou a frase explícita de indefinição.
/// Um campo nulo jamais vira zero.
fn render_value(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{}{unit}", format_number(v)),
        None => "não definido".to_string(),
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v}")
    }
}

fn group_by_bairro(rows: &[RegimeRecord]) -> Vec<(String, Vec<&RegimeRecord>)> {
    let mut groups: Vec<(String, Vec<&RegimeRecord>)> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|(bairro, _)| *bairro == row.bairro) {
            Some((_, members)) => members.push(row),
            None => groups.push((row.bairro.clone(), vec![row])),
        }
    }
    groups
}

fn aggregate_sentence(aggregate: &AggregateValue) -> String {
    let scope_display = aggregate
        .scope
        .as_deref()
        .map(|s| gazetteer::display_name(s).unwrap_or(s).to_string());
    match (aggregate.kind, &scope_display) {
        (AggregateKind::Count, Some(bairro)) => format!(
            "O bairro {bairro} abrange {} zona(s) de ordenamento territorial.",
            format_number(aggregate.value)
        ),
        (AggregateKind::Count, None) => format!(
            "A base oficial do regime urbanístico cobre {} bairro(s) de Porto Alegre.",
            format_number(aggregate.value)
        ),
        (AggregateKind::Avg, Some(bairro)) => format!(
            "A média de {} no bairro {bairro} é {:.2}.",
            aggregate.parameter.label(),
            aggregate.value
        ),
        (AggregateKind::Avg, None) => format!(
            "A média de {} na cidade é {:.2}.",
            aggregate.parameter.label(),
            aggregate.value
        ),
        // Extremos chegam como linhas ordenadas, não como escalar.
        _ => String::new(),
    }
}

/// Frase de abertura para extremos: o valor vem da primeira linha já
/// ordenada pela camada de dados.
fn extreme_sentence(
    kind: AggregateKind,
    parameter: UrbanParameter,
    first: &RegimeRecord,
) -> Option<String> {
    let value = parameter_value(first, parameter)?;
    let qualifier = match kind {
        AggregateKind::Max => "maior",
        AggregateKind::Min => "menor",
        _ => return None,
    };
    let unit = match parameter {
        UrbanParameter::AlturaMaxima => " metros",
        UrbanParameter::TaxaPermeabilidade => "%",
        _ => "",
    };
    let bairro = gazetteer::display_name(&first.bairro).unwrap_or(first.bairro.as_str());
    Some(format!(
        "A {qualifier} {} registrada é {}{unit}, no bairro {bairro} ({}).",
        parameter.label(),
        format_number(value),
        first.zona
    ))
}

fn parameter_value(row: &RegimeRecord, parameter: UrbanParameter) -> Option<f64> {
    match parameter {
        UrbanParameter::AlturaMaxima => row.altura_maxima,
        UrbanParameter::CaBasico => row.ca_basico,
        UrbanParameter::CaMaximo => row.ca_maximo,
        UrbanParameter::TaxaPermeabilidade => row.taxa_permeabilidade,
        UrbanParameter::AreaMinimaLote => row.area_minima_lote,
    }
}

fn citation_line(passage: &LegalPassage) -> String {
    let mut line = format!("- ({}, Art. {})", passage.document_type, passage.article_number);
    if let Some(path) = &passage.hierarchy_path {
        line.push_str(&format!(" [{path}]"));
    }
    line.push_str(&format!(": \"{}\"\n", excerpt(&passage.text)));
    line
}

fn excerpt(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= EXCERPT_LIMIT {
        collapsed
    } else {
        let cut: String = collapsed.chars().take(EXCERPT_LIMIT).collect();
        format!("{}…", cut.trim_end())
    }
}

fn expects_legal_context(analysis: &AnalysisResult) -> bool {
    !analysis.entities.article_refs.is_empty()
        || matches!(analysis.intent, Intent::Conceptual | Intent::Hybrid)
}

fn glossary() -> String {
    "📖 **Significado das siglas:**\n\
     • **CA** = Coeficiente de Aproveitamento (quantas vezes a área do terreno pode ser construída)\n\
     • **ZOT** = Zona de Ordenamento Territorial (áreas com regras específicas de ocupação)\n"
        .to_string()
}

/// Passo generativo híbrido: prosa em volta dos dados já extraídos, com a
/// instrução explícita de não alterar números nem o rodapé.
async fn prose_pass(
    llm: &LlmManager,
    question: &str,
    deterministic: &str,
    passages: &[LegalPassage],
    model_hint: Option<&str>,
) -> Result<String, PipelineError> {
    let context: String = passages
        .iter()
        .map(|p| format!("({}, Art. {}): {}\n", p.document_type, p.article_number, p.text))
        .collect();

    let prompt = format!(
        "DADOS OFICIAIS PRECISOS (100% corretos):\n{deterministic}\n\n\
         CONTEXTO LEGAL ADICIONAL:\n{context}\n\
         PERGUNTA ORIGINAL: {question}\n\n\
         INSTRUÇÕES:\n\
         1. SEMPRE mantenha os dados numéricos oficiais EXATAMENTE como fornecidos\n\
         2. Use o contexto legal apenas para EXPLICAR e CONTEXTUALIZAR os dados\n\
         3. NÃO invente nem modifique nenhum número ou valor\n\
         4. Cite os artigos no formato (DOCUMENTO, Art. N)\n\
         5. Mantenha o rodapé com os links oficiais, sem alterá-lo\n\
         6. Seja conciso e direto\n\n\
         Forneça uma resposta que combine os dados precisos com as explicações \
         contextuais relevantes:"
    );

    llm.complete(&prompt, model_hint)
        .await
        .map_err(|e| PipelineError::SynthesisFailure(e.to_string()))
}
