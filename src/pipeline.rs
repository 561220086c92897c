//! End-to-end QC runs: axis selection, stage sequencing and the structured
//! run summary written alongside the reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::dataset::Dataset;
use crate::figures::FigureBook;
use crate::filter;
use crate::plink::PlinkRunner;
use crate::samples::{self, SampleQcParams};
use crate::variants::{self, VariantQcParams};

/// Which QC axes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcAxis {
    Samples,
    Variants,
    Full,
}

/// Configuration for one QC run.
#[derive(Debug, Clone)]
pub struct QcConfig {
    /// Prefix of the input dataset triple.
    pub bfile: PathBuf,
    /// Directory receiving every intermediate dataset, report table,
    /// manifest and document.
    pub work_dir: PathBuf,
    /// Path to the external tool binary.
    pub plink: PathBuf,
    /// Kill a tool invocation that runs longer than this.
    pub timeout: Option<Duration>,
    /// Optional pre-filter: keep only the samples listed in this file.
    pub keep: Option<PathBuf>,
    pub axis: QcAxis,
    pub sample_params: SampleQcParams,
    pub variant_params: VariantQcParams,
}

impl QcConfig {
    pub fn new(bfile: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            bfile: bfile.into(),
            work_dir: work_dir.into(),
            plink: PathBuf::from("plink"),
            timeout: None,
            keep: None,
            axis: QcAxis::Full,
            sample_params: SampleQcParams::default(),
            variant_params: VariantQcParams::default(),
        }
    }
}

/// Summary of one completed axis, serialized into the run summary JSON.
#[derive(Debug, Serialize)]
pub struct AxisSummary {
    pub total_failed: usize,
    pub population: usize,
    pub manifest_hr: String,
    pub manifest_pr: String,
    pub document: String,
    pub output_dataset: String,
}

/// Machine-consumable record of a whole QC run, written as
/// `qc_run_summary.json` in the work directory.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub version: String,
    pub timestamp: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<AxisSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<AxisSummary>,
    pub final_dataset: String,
}

impl RunSummary {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote run summary");
        Ok(())
    }
}

fn timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("unknown"))
}

/// Run the configured QC axes in order: sample axis first, then variant
/// axis on the sample-filtered dataset. Any stage failure halts the run;
/// completed stages leave their outputs on disk so a rerun can resume from
/// the last good prefix.
pub fn run(config: &QcConfig) -> Result<RunSummary> {
    std::fs::create_dir_all(&config.work_dir).with_context(|| {
        format!("failed to create work directory {}", config.work_dir.display())
    })?;

    let mut runner = PlinkRunner::new(&config.plink);
    if let Some(timeout) = config.timeout {
        runner = runner.with_timeout(timeout);
    }

    let input = Dataset::open(&config.bfile)
        .with_context(|| format!("input dataset {} is incomplete", config.bfile.display()))?;
    tracing::info!(input = %input, axis = ?config.axis, "starting QC run");

    let input = match &config.keep {
        Some(keep_file) => filter::keep_samples(
            &runner,
            &input,
            keep_file,
            &config.work_dir.join("keep_filtered"),
        )
        .context("keep-list pre-filter failed")?,
        None => input,
    };

    let mut sample_summary = None;
    let mut dataset = input.clone();

    if matches!(config.axis, QcAxis::Samples | QcAxis::Full) {
        let mut figures = FigureBook::new();
        let outcome = samples::run_sample_qc(
            &runner,
            &dataset,
            &config.sample_params,
            &config.work_dir,
            &mut figures,
        )?;
        sample_summary = Some(AxisSummary {
            total_failed: outcome.manifest.total_unique,
            population: outcome.manifest.population,
            manifest_hr: outcome.manifest.human_readable.display().to_string(),
            manifest_pr: outcome.manifest.machine_readable.display().to_string(),
            document: outcome.document.display().to_string(),
            output_dataset: outcome.dataset.prefix().display().to_string(),
        });
        dataset = outcome.dataset;
    }

    let mut variant_summary = None;
    if matches!(config.axis, QcAxis::Variants | QcAxis::Full) {
        let mut figures = FigureBook::new();
        let outcome = variants::run_variant_qc(
            &runner,
            &dataset,
            &config.variant_params,
            &config.work_dir,
            &mut figures,
        )?;
        variant_summary = Some(AxisSummary {
            total_failed: outcome.manifest.total_unique,
            population: outcome.manifest.population,
            manifest_hr: outcome.manifest.human_readable.display().to_string(),
            manifest_pr: outcome.manifest.machine_readable.display().to_string(),
            document: outcome.document.display().to_string(),
            output_dataset: outcome.dataset.prefix().display().to_string(),
        });
        dataset = outcome.dataset;
    }

    let summary = RunSummary {
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: timestamp(),
        input: config.bfile.display().to_string(),
        samples: sample_summary,
        variants: variant_summary,
        final_dataset: dataset.prefix().display().to_string(),
    };
    summary.write(&config.work_dir.join("qc_run_summary.json"))?;

    Ok(summary)
}
