//! Markdown and JSON report generation.
//!
//! This module renders a finished [`Report`] for people (Markdown tables)
//! or for other tools (pretty-printed JSON).

use crate::models::{GroupReport, HospitalResult, Report, ReportMetadata};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# CareStars Rating Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata, report.unrated()));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // Star distribution
    output.push_str(&generate_distribution_section(&report.distribution));

    // Model estimates per group
    output.push_str(&generate_groups_section(&report.groups));

    // Convergence overview
    output.push_str(&generate_convergence_section(&report.groups));

    // Hospital ratings
    output.push_str(&generate_hospitals_section(&report.group_names, &report.hospitals));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, unrated: usize) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Input:** {}\n", metadata.input));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Clustering:** {}\n", metadata.strategy));
    section.push_str(&format!("- **Estimator:** `{}`\n", metadata.estimator));
    section.push_str(&format!("- **Hospitals:** {}\n", metadata.hospitals));
    if unrated > 0 {
        section.push_str(&format!("- **Unrated Hospitals:** {}\n", unrated));
    }
    section.push_str(&format!(
        "- **Groups Estimated:** {}\n",
        metadata.groups_estimated
    ));
    if metadata.groups_failed > 0 {
        section.push_str(&format!("- **Groups Failed:** {}\n", metadata.groups_failed));
    }
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Star Distribution](#star-distribution)\n");
    toc.push_str("- [Model Estimates](#model-estimates)\n");

    for group in &report.groups {
        toc.push_str(&format!("  - [{}](#{})\n", group.name, anchor(&group.name)));
    }

    toc.push_str("- [Convergence](#convergence)\n");
    toc.push_str("- [Hospital Ratings](#hospital-ratings)\n");
    toc.push('\n');

    toc
}

fn anchor(name: &str) -> String {
    name.replace(['/', '.', ' ', '_'], "-").to_lowercase()
}

fn stars_text(stars: u8) -> String {
    "★".repeat(stars as usize)
}

fn fmt_score(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

/// Generate the star distribution section.
fn generate_distribution_section(distribution: &[usize]) -> String {
    let mut section = String::new();

    section.push_str("## Star Distribution\n\n");
    section.push_str("| Stars | Hospitals |\n");
    section.push_str("|:---|:---:|\n");

    for (i, count) in distribution.iter().enumerate() {
        section.push_str(&format!("| {} | {} |\n", stars_text(i as u8 + 1), count));
    }
    section.push_str(&format!(
        "| **Total** | **{}** |\n\n",
        distribution.iter().sum::<usize>()
    ));

    section
}

/// Generate the per-group parameter tables.
fn generate_groups_section(groups: &[GroupReport]) -> String {
    let mut section = String::new();

    section.push_str("## Model Estimates\n\n");

    for group in groups {
        section.push_str(&generate_group_block(group));
    }

    section
}

/// Generate the parameter table for a single group.
fn generate_group_block(group: &GroupReport) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {} {{#{}}}\n\n", group.name, anchor(&group.name)));
    block.push_str(&format!("*Weight: {:.2}*\n\n", group.weight));

    if let Some(ref error) = group.error {
        block.push_str(&format!("> ⚠️ **Not estimated:** {}\n\n", error));
        return block;
    }

    block.push_str("| Measure | mu | gamma | err |\n");
    block.push_str("|:---|---:|---:|---:|\n");
    for p in &group.parameters {
        block.push_str(&format!(
            "| {} | {:.6} | {:.6} | {:.6} |\n",
            p.measure, p.mu, p.gamma, p.err
        ));
    }
    block.push('\n');

    block
}

/// Generate the convergence overview.
fn generate_convergence_section(groups: &[GroupReport]) -> String {
    let mut section = String::new();

    section.push_str("## Convergence\n\n");
    section.push_str("| Group | Converged | Iterations | Evaluations | -log L | Time | Message |\n");
    section.push_str("|:---|:---:|---:|---:|---:|---:|:---|\n");

    for group in groups {
        match (&group.convergence, &group.error) {
            (Some(c), _) => section.push_str(&format!(
                "| {} | {} | {} | {} | {:.4} | {:.2}s | {} |\n",
                group.name,
                if c.converged { "✅" } else { "⚠️" },
                c.iterations,
                c.evaluations,
                c.objective,
                c.elapsed_seconds,
                c.message
            )),
            (None, Some(error)) => section.push_str(&format!(
                "| {} | ❌ | - | - | - | - | {} |\n",
                group.name, error
            )),
            (None, None) => {}
        }
    }
    section.push('\n');

    section
}

/// Generate the hospital ratings table.
fn generate_hospitals_section(group_names: &[String], hospitals: &[HospitalResult]) -> String {
    let mut section = String::new();

    section.push_str("## Hospital Ratings\n\n");

    if hospitals.is_empty() {
        section.push_str("No hospitals were rated.\n\n");
        return section;
    }

    section.push_str("| Hospital |");
    for name in group_names {
        section.push_str(&format!(" {} |", name));
    }
    section.push_str(" Summary | Winsorized | Stars |\n");
    section.push_str("|:---|");
    section.push_str(&"---:|".repeat(group_names.len() + 2));
    section.push_str(":---:|\n");

    for hospital in hospitals {
        section.push_str(&format!("| {} |", hospital.id));
        for score in &hospital.group_scores {
            section.push_str(&format!(" {} |", fmt_score(*score)));
        }
        section.push_str(&format!(
            " {} | {} | {} |\n",
            fmt_score(hospital.summary),
            fmt_score(hospital.summary_winsorized),
            hospital.stars.map_or_else(|| "-".to_string(), stars_text)
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by CareStars v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Write a Markdown report to a file.
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    let content = generate_markdown_report(report);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON report to a file.
pub fn write_json_report(report: &Report, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
