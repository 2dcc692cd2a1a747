//! Recuperador estruturado: transforma as entidades da análise em
//! consultas SELECT parametrizadas sobre a tabela do regime urbanístico.
//!
//! Garantias:
//!   - apenas colunas da lista branca e valores parametrizados;
//!   - qualquer instrução que não seja um único SELECT é rejeitada
//!     estaticamente;
//!   - agregações (extremo/contagem/média) são resolvidas na camada de
//!     dados com ORDER BY/LIMIT e funções SQL, nunca por um passo
//!     generativo;
//!   - bairros com várias zonas devolvem todas as linhas correspondentes.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

use crate::errors::PipelineError;
use crate::models::{
    AggregateKind, AggregateQuery, AggregateValue, AnalysisResult, ExtractedEntities,
    RegimeRecord, UrbanParameter,
};
use crate::sqlite_client::Store;

/// Colunas expostas pelo recuperador (lista branca; tudo fora daqui não é
/// consultável).
const SELECT_COLUMNS: &str = "bairro, zona, altura_maxima, ca_basico, ca_maximo, \
                              taxa_permeabilidade, area_minima_lote, testada_minima_lote";

/// Quantas linhas um extremo devolve (o máximo verdadeiro mais o contexto
/// imediato, como na resposta de altura máxima da cidade).
const EXTREME_LIMIT: usize = 5;

/// Resultado do braço estruturado: linhas tipadas e, para contagem/média,
/// o escalar calculado pelo SQL.
#[derive(Debug, Clone, Default)]
pub struct StructuredOutcome {
    pub rows: Vec<RegimeRecord>,
    pub aggregate: Option<AggregateValue>,
}

/// Executa o braço estruturado para a análise dada. Devolve
/// `RetrievalEmpty` quando não há nenhuma consulta aplicável; o marcador
/// de vazio para consultas válidas sem linhas é um `StructuredOutcome`
/// vazio.
pub async fn retrieve(
    store: Arc<Store>,
    analysis: &AnalysisResult,
) -> Result<StructuredOutcome, PipelineError> {
    let entities = analysis.entities.clone();
    let aggregate = analysis.aggregate.clone();

    tokio::task::spawn_blocking(move || run_retrieval(&store, &entities, aggregate.as_ref()))
        .await
        .map_err(|e| PipelineError::Internal(format!("tarefa de consulta interrompida: {e}")))?
}

fn run_retrieval(
    store: &Store,
    entities: &ExtractedEntities,
    aggregate: Option<&AggregateQuery>,
) -> Result<StructuredOutcome, PipelineError> {
    if let Some(agg) = aggregate {
        return run_aggregate(store, entities, agg);
    }
    run_entity_queries(store, entities)
}

/// Uma consulta por combinação distinta de entidades; todas as linhas de
/// cada bairro são devolvidas, ordenadas por zona.
fn run_entity_queries(
    store: &Store,
    entities: &ExtractedEntities,
) -> Result<StructuredOutcome, PipelineError> {
    let mut rows = Vec::new();

    if !entities.bairros.is_empty() {
        for bairro in &entities.bairros {
            let mut sql = format!(
                "SELECT {SELECT_COLUMNS} FROM regime_urbanistico WHERE bairro = ?1"
            );
            let mut params: Vec<Value> = vec![Value::Text(bairro.clone())];
            if !entities.zonas.is_empty() {
                let placeholders = placeholders(params.len() + 1, entities.zonas.len());
                sql.push_str(&format!(" AND zona IN ({placeholders})"));
                params.extend(entities.zonas.iter().map(|z| Value::Text(z.clone())));
            }
            append_numeric_filters(&mut sql, &mut params, entities);
            sql.push_str(" ORDER BY zona");
            rows.extend(query_rows(store, &sql, &params)?);
        }
    } else if !entities.zonas.is_empty() {
        for zona in &entities.zonas {
            let mut sql = format!(
                "SELECT {SELECT_COLUMNS} FROM regime_urbanistico WHERE zona = ?1"
            );
            let mut params: Vec<Value> = vec![Value::Text(zona.clone())];
            append_numeric_filters(&mut sql, &mut params, entities);
            sql.push_str(" ORDER BY bairro");
            rows.extend(query_rows(store, &sql, &params)?);
        }
    } else if !entities.numeric_filters.is_empty() {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM regime_urbanistico WHERE 1 = 1");
        let mut params: Vec<Value> = Vec::new();
        append_numeric_filters(&mut sql, &mut params, entities);
        sql.push_str(" ORDER BY bairro, zona");
        rows = query_rows(store, &sql, &params)?;
    } else {
        return Err(PipelineError::RetrievalEmpty("estruturado"));
    }

    debug!("Braço estruturado devolveu {} linha(s)", rows.len());
    Ok(StructuredOutcome {
        rows,
        aggregate: None,
    })
}

fn run_aggregate(
    store: &Store,
    entities: &ExtractedEntities,
    agg: &AggregateQuery,
) -> Result<StructuredOutcome, PipelineError> {
    let scope = entities.bairros.first().cloned();

    match agg.kind {
        AggregateKind::Max | AggregateKind::Min => {
            let column = agg.parameter.column();
            let direction = if agg.kind == AggregateKind::Max {
                "DESC"
            } else {
                "ASC"
            };
            let (sql, params): (String, Vec<Value>) = match &scope {
                Some(bairro) => (
                    format!(
                        "SELECT {SELECT_COLUMNS} FROM regime_urbanistico \
                         WHERE {column} IS NOT NULL AND bairro = ?1 \
                         ORDER BY {column} {direction} LIMIT {EXTREME_LIMIT}"
                    ),
                    vec![Value::Text(bairro.clone())],
                ),
                None => (
                    format!(
                        "SELECT {SELECT_COLUMNS} FROM regime_urbanistico \
                         WHERE {column} IS NOT NULL \
                         ORDER BY {column} {direction} LIMIT {EXTREME_LIMIT}"
                    ),
                    Vec::new(),
                ),
            };
            let rows = query_rows(store, &sql, &params)?;
            Ok(StructuredOutcome {
                rows,
                aggregate: None,
            })
        }
        AggregateKind::Count => run_count(store, entities, agg, scope),
        AggregateKind::Avg => run_avg(store, entities, agg, scope),
    }
}

fn run_count(
    store: &Store,
    entities: &ExtractedEntities,
    agg: &AggregateQuery,
    scope: Option<String>,
) -> Result<StructuredOutcome, PipelineError> {
    match scope {
        Some(bairro) => {
            let sql = "SELECT COUNT(DISTINCT zona) FROM regime_urbanistico WHERE bairro = ?1";
            assert_read_only(sql)?;
            let count: i64 = store.with_read(|conn| {
                conn.query_row(sql, [&bairro], |row| row.get(0))
            })?;
            // As linhas detalhadas acompanham a contagem, para a resposta
            // poder enumerar as zonas.
            let detail = run_entity_queries(store, entities)?;
            let aggregate = (count > 0).then(|| AggregateValue {
                kind: AggregateKind::Count,
                parameter: agg.parameter,
                value: count as f64,
                scope: Some(bairro),
            });
            Ok(StructuredOutcome {
                rows: detail.rows,
                aggregate,
            })
        }
        None => {
            let sql = "SELECT COUNT(DISTINCT bairro) FROM regime_urbanistico";
            assert_read_only(sql)?;
            let count: i64 = store.with_read(|conn| conn.query_row(sql, [], |row| row.get(0)))?;
            let aggregate = (count > 0).then(|| AggregateValue {
                kind: AggregateKind::Count,
                parameter: agg.parameter,
                value: count as f64,
                scope: None,
            });
            Ok(StructuredOutcome {
                rows: Vec::new(),
                aggregate,
            })
        }
    }
}

fn run_avg(
    store: &Store,
    entities: &ExtractedEntities,
    agg: &AggregateQuery,
    scope: Option<String>,
) -> Result<StructuredOutcome, PipelineError> {
    // Para coeficientes, a média pedida é a do ponto médio entre básico e
    // máximo; para os demais parâmetros, a média simples da coluna.
    let (expr, not_null) = match agg.parameter {
        UrbanParameter::CaBasico | UrbanParameter::CaMaximo => (
            "AVG((ca_basico + ca_maximo) / 2.0)",
            "ca_basico IS NOT NULL AND ca_maximo IS NOT NULL",
        ),
        UrbanParameter::AlturaMaxima => ("AVG(altura_maxima)", "altura_maxima IS NOT NULL"),
        UrbanParameter::TaxaPermeabilidade => {
            ("AVG(taxa_permeabilidade)", "taxa_permeabilidade IS NOT NULL")
        }
        UrbanParameter::AreaMinimaLote => {
            ("AVG(area_minima_lote)", "area_minima_lote IS NOT NULL")
        }
    };

    let (sql, params): (String, Vec<Value>) = match &scope {
        Some(bairro) => (
            format!("SELECT {expr} FROM regime_urbanistico WHERE {not_null} AND bairro = ?1"),
            vec![Value::Text(bairro.clone())],
        ),
        None => (
            format!("SELECT {expr} FROM regime_urbanistico WHERE {not_null}"),
            Vec::new(),
        ),
    };
    assert_read_only(&sql)?;
    let value: Option<f64> = store.with_read(|conn| {
        conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
    })?;

    let rows = if scope.is_some() {
        run_entity_queries(store, entities)?.rows
    } else {
        Vec::new()
    };

    Ok(StructuredOutcome {
        rows,
        aggregate: value.map(|value| AggregateValue {
            kind: AggregateKind::Avg,
            parameter: agg.parameter,
            value,
            scope,
        }),
    })
}

fn append_numeric_filters(sql: &mut String, params: &mut Vec<Value>, entities: &ExtractedEntities) {
    for filter in &entities.numeric_filters {
        let idx = params.len() + 1;
        sql.push_str(&format!(
            " AND {} {} ?{idx}",
            filter.parameter.column(),
            filter.op.sql()
        ));
        params.push(Value::Real(filter.value));
    }
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_rows(
    store: &Store,
    sql: &str,
    params: &[Value],
) -> Result<Vec<RegimeRecord>, PipelineError> {
    assert_read_only(sql)?;
    store.with_read(|conn| collect_rows(conn, sql, params))
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<Vec<RegimeRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mapped = stmt.query_map(params_from_iter(params.iter()), row_to_record)?;
    mapped.collect()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RegimeRecord> {
    Ok(RegimeRecord {
        bairro: row.get(0)?,
        zona: row.get(1)?,
        altura_maxima: row.get(2)?,
        ca_basico: row.get(3)?,
        ca_maximo: row.get(4)?,
        taxa_permeabilidade: row.get(5)?,
        area_minima_lote: row.get(6)?,
        testada_minima_lote: row.get(7)?,
    })
}

/// Rejeita estaticamente qualquer instrução que não seja um único SELECT.
/// Defesa em profundidade: todo SQL deste módulo já nasce de listas
/// brancas, mas nada além de leitura passa daqui.
pub fn assert_read_only(sql: &str) -> Result<(), PipelineError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.contains(';') {
        return Err(PipelineError::WriteRejected);
    }
    let upper = trimmed.to_uppercase();
    if !upper.starts_with("SELECT") {
        return Err(PipelineError::WriteRejected);
    }
    const FORBIDDEN: &[&str] = &[
        "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH", "PRAGMA",
        "REINDEX", "REPLACE", "VACUUM",
    ];
    for word in upper.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if FORBIDDEN.contains(&word) {
            return Err(PipelineError::WriteRejected);
        }
    }
    Ok(())
}
