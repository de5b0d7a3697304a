use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
    Json, Router,
};

use crate::models::{AppState, Finding, FindingsQuery, FindingsResponse, FindingsSummary};
use crate::scoring;
use crate::types::AppResult;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/findings/{mission_id}", get(list_findings))
        .route("/api/findings/{mission_id}/summary", get(findings_summary))
        .route("/api/findings/{mission_id}/{finding_id}", get(get_finding))
        .with_state(state)
}

/// Best score first; ties keep discovery order.
fn filter_findings(mut findings: Vec<Finding>, query: &FindingsQuery) -> Vec<Finding> {
    findings.retain(|f| {
        query.min_score.map(|min| f.quality_score >= min).unwrap_or(true)
            && (!query.verified_only || f.verified)
    });
    findings.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
    findings
}

async fn list_findings(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
    Query(query): Query<FindingsQuery>,
) -> AppResult<ResponseJson<FindingsResponse>> {
    let findings = filter_findings(state.engine.findings(&mission_id).await?, &query);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let total = findings.len();
    let page = findings.into_iter().skip(offset).take(limit).collect();

    Ok(Json(FindingsResponse {
        mission_id,
        findings: page,
        total,
        limit,
        offset,
    }))
}

fn source_host(source: &str) -> Option<String> {
    reqwest::Url::parse(source)
        .ok()?
        .host_str()
        .map(|host| host.trim_start_matches("www.").to_string())
}

fn summarize(mission_id: String, findings: &[Finding]) -> FindingsSummary {
    let scored: Vec<f64> = findings
        .iter()
        .filter(|f| !f.is_errored())
        .map(|f| f.quality_score)
        .collect();

    let mut by_source = BTreeMap::new();
    for finding in findings {
        for host in finding.sources.iter().filter_map(|s| source_host(s)) {
            *by_source.entry(host).or_insert(0) += 1;
        }
    }

    FindingsSummary {
        mission_id,
        total_findings: findings.len(),
        average_quality: scoring::average(findings),
        min_quality: scored.iter().cloned().reduce(f64::min).unwrap_or(0.0),
        max_quality: scored.iter().cloned().reduce(f64::max).unwrap_or(0.0),
        verified_count: findings.iter().filter(|f| f.verified).count(),
        unconfirmed_count: findings.iter().filter(|f| f.unconfirmed).count(),
        corrected_count: findings.iter().filter(|f| f.corrected).count(),
        error_count: findings.iter().filter(|f| f.is_errored()).count(),
        by_source,
    }
}

async fn findings_summary(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<FindingsSummary>> {
    let findings = state.engine.findings(&mission_id).await?;
    Ok(Json(summarize(mission_id, &findings)))
}

async fn get_finding(
    State(state): State<AppState>,
    Path((mission_id, finding_id)): Path<(String, String)>,
) -> AppResult<ResponseJson<Finding>> {
    Ok(Json(state.engine.finding(&mission_id, &finding_id).await?))
}
