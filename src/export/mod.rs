//! Export renderers
//!
//! The engine hands a finished (or in-progress) mission to an [`Exporter`]
//! once per requested format and records the outcome as an export record.

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::fs;
use tracing::info;

use crate::mission::Mission;
use crate::models::{ExportFormat, ExportRecord, Finding};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("{0} export is not supported")]
    Unsupported(ExportFormat),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Render `findings` in the record's format and return a reference to
    /// the output.
    async fn render(
        &self,
        mission: &Mission,
        findings: &[Finding],
        record: &ExportRecord,
    ) -> Result<String, ExportError>;
}

/// Writes export files under a directory.
pub struct FileExporter {
    export_dir: PathBuf,
}

impl FileExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn render(
        &self,
        mission: &Mission,
        findings: &[Finding],
        record: &ExportRecord,
    ) -> Result<String, ExportError> {
        let format = record.format;
        let body = match format {
            ExportFormat::Json => render_json(mission, findings)?,
            ExportFormat::Csv => render_csv(findings)?,
            ExportFormat::Markdown => render_markdown(mission, findings).into_bytes(),
            ExportFormat::Pdf => return Err(ExportError::Unsupported(format)),
        };

        fs::create_dir_all(&self.export_dir).await?;
        // The record id keeps same-second exports apart.
        let file_name = format!(
            "{}_{}_{}.{}",
            mission.id,
            record.created_at.format("%Y%m%d_%H%M%S"),
            record.id,
            format.extension()
        );
        let path = self.export_dir.join(file_name);
        fs::write(&path, body).await?;

        info!(mission_id = %mission.id, format = %format, path = %path.display(), "Export written");
        Ok(path.display().to_string())
    }
}

pub fn render_json(mission: &Mission, findings: &[Finding]) -> Result<Vec<u8>, ExportError> {
    let document = json!({
        "mission": {
            "id": mission.id,
            "goal": mission.goal,
            "state": mission.state,
            "quality_threshold": mission.criteria.quality_threshold,
            "quality_average": mission.quality_average,
            "corrections_made": mission.corrections_made,
            "created_at": mission.created_at,
            "completed_at": mission.completed_at,
        },
        "report": mission.report,
        "findings": findings,
        "exported_at": Utc::now(),
    });
    Ok(serde_json::to_vec_pretty(&document)?)
}

const CSV_HEADER: [&str; 16] = [
    "name",
    "quality_score",
    "verified",
    "unconfirmed",
    "corrected",
    "error",
    "category",
    "website",
    "pricing",
    "free_trial",
    "features",
    "pros",
    "cons",
    "use_cases",
    "competitors",
    "sources",
];

pub fn render_csv(findings: &[Finding]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for finding in findings {
        let attrs = &finding.attributes;
        let pricing = attrs.pricing.as_ref();
        writer.write_record([
            finding.name.clone(),
            format!("{:.3}", finding.quality_score),
            finding.verified.to_string(),
            finding.unconfirmed.to_string(),
            finding.corrected.to_string(),
            finding.error.clone().unwrap_or_default(),
            attrs.category.clone(),
            attrs.website.clone().unwrap_or_default(),
            pricing.map(|p| p.summary()).unwrap_or_default(),
            pricing
                .and_then(|p| p.free_trial)
                .map(|t| t.to_string())
                .unwrap_or_default(),
            attrs.features.join("; "),
            attrs.pros.join("; "),
            attrs.cons.join("; "),
            attrs.use_cases.join("; "),
            attrs.competitors.join("; "),
            finding.sources.join(" "),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.to_string()))
}

fn bullet_list(out: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

pub fn render_markdown(mission: &Mission, findings: &[Finding]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Research Report\n");
    let _ = writeln!(out, "**Goal:** {}\n", mission.goal);
    let _ = writeln!(
        out,
        "**Findings:** {} | **Average quality:** {:.2} | **Corrections:** {}\n",
        findings.len(),
        mission.quality_average,
        mission.corrections_made
    );

    if let Some(report) = &mission.report {
        let _ = writeln!(out, "## Executive Summary\n\n{}\n", report.executive_summary);
        if !report.key_insights.is_empty() {
            let _ = writeln!(out, "## Key Insights\n");
            bullet_list(&mut out, &report.key_insights);
            out.push('\n');
        }
        if !report.top_recommendations.is_empty() {
            let _ = writeln!(out, "## Recommendations\n");
            bullet_list(&mut out, &report.top_recommendations);
            out.push('\n');
        }
        if !report.next_steps.is_empty() {
            let _ = writeln!(out, "## Next Steps\n");
            bullet_list(&mut out, &report.next_steps);
            out.push('\n');
        }
    }

    let _ = writeln!(out, "## Overview\n");
    let _ = writeln!(out, "| Name | Score | Pricing | Verified |");
    let _ = writeln!(out, "|---|---|---|---|");
    for finding in findings {
        let pricing = finding
            .attributes
            .pricing
            .as_ref()
            .map(|p| p.summary())
            .unwrap_or_else(|| "n/a".to_string());
        let verified = if finding.verified {
            "yes"
        } else if finding.unconfirmed {
            "unconfirmed"
        } else {
            "no"
        };
        let _ = writeln!(
            out,
            "| {} | {:.2} | {} | {} |",
            finding.name,
            finding.quality_score,
            pricing.replace('|', "/"),
            verified
        );
    }
    out.push('\n');

    for finding in findings {
        let _ = writeln!(out, "### {}\n", finding.name);
        if let Some(error) = &finding.error {
            let _ = writeln!(out, "> Research failed: {}\n", error);
            continue;
        }
        let attrs = &finding.attributes;
        if !attrs.description.is_empty() {
            let _ = writeln!(out, "{}\n", attrs.description);
        }
        if !attrs.features.is_empty() {
            let _ = writeln!(out, "**Features**\n");
            bullet_list(&mut out, &attrs.features);
            out.push('\n');
        }
        if !attrs.pros.is_empty() {
            let _ = writeln!(out, "**Pros:** {}\n", attrs.pros.join(", "));
        }
        if !attrs.cons.is_empty() {
            let _ = writeln!(out, "**Cons:** {}\n", attrs.cons.join(", "));
        }
        if let Some(best_for) = &attrs.best_for {
            let _ = writeln!(out, "**Best for:** {}\n", best_for);
        }
        if !finding.sources.is_empty() {
            let _ = writeln!(out, "**Sources:** {}\n", finding.sources.join(", "));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissionConfig;
    use crate::llm::SynthesisReport;
    use crate::mission::MissionCriteria;
    use crate::models::Pricing;

    fn mission() -> Mission {
        let mut mission = Mission::new(
            "Compare issue trackers",
            MissionCriteria::from_config(&MissionConfig::default()),
        );
        mission.report = Some(SynthesisReport {
            executive_summary: "Linear leads for small teams.".into(),
            key_insights: vec!["Most tools charge per seat".into()],
            ..SynthesisReport::default()
        });
        mission
    }

    fn findings() -> Vec<Finding> {
        let mut linear = Finding::new("Linear");
        linear.quality_score = 0.9;
        linear.verified = true;
        linear.attributes.pricing = Some(Pricing {
            starting_price: Some("$8/user | month".into()),
            ..Pricing::default()
        });
        linear.attributes.features = vec!["Cycles".into(), "Triage".into()];
        let mut broken = Finding::new("Broken");
        broken.error = Some("timed out".into());
        vec![linear, broken]
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let csv = String::from_utf8(render_csv(&findings()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("name,quality_score,verified"));
        assert!(lines[1].starts_with("Linear,0.900,true"));
        assert!(lines[1].contains("Cycles; Triage"));
    }

    #[test]
    fn test_markdown_sections() {
        let md = render_markdown(&mission(), &findings());
        assert!(md.contains("## Executive Summary"));
        assert!(md.contains("| Linear | 0.90 | $8/user / month | yes |"));
        assert!(md.contains("> Research failed: timed out"));
    }

    #[test]
    fn test_json_document() {
        let value: serde_json::Value =
            serde_json::from_slice(&render_json(&mission(), &findings()).unwrap()).unwrap();
        assert_eq!(value["findings"].as_array().unwrap().len(), 2);
        assert_eq!(value["mission"]["goal"], "Compare issue trackers");
    }

    #[tokio::test]
    async fn test_file_exporter_writes_and_rejects_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());
        let mission = mission();

        let record = ExportRecord::pending(ExportFormat::Markdown, 2);
        let path = exporter.render(&mission, &findings(), &record).await.unwrap();
        assert!(path.ends_with(&format!("_{}.md", record.id)));
        assert!(std::path::Path::new(&path).exists());

        let pdf = ExportRecord::pending(ExportFormat::Pdf, 2);
        let err = exporter.render(&mission, &findings(), &pdf).await.unwrap_err();
        assert!(matches!(err, ExportError::Unsupported(ExportFormat::Pdf)));
    }

    #[tokio::test]
    async fn test_back_to_back_exports_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = FileExporter::new(dir.path());
        let mission = mission();

        let mut first = ExportRecord::pending(ExportFormat::Csv, 2);
        let mut second = ExportRecord::pending(ExportFormat::Csv, 2);
        second.created_at = first.created_at;
        first.id = "aaaa0001".into();
        second.id = "aaaa0002".into();

        let a = exporter.render(&mission, &findings(), &first).await.unwrap();
        let b = exporter.render(&mission, &findings(), &second).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
