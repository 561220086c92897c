//! Variant-axis QC: missingness, optional autosomal restriction, minor
//! allele frequency and Hardy-Weinberg equilibrium, in that order.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::dataset::{append_extension, Dataset, VariantId};
use crate::figures::FigureBook;
use crate::filter;
use crate::manifest::{self, FailureSet, Manifest};
use crate::plink::{PlinkOp, PlinkRunner};
use crate::report;

/// Thresholds for the variant axis.
#[derive(Debug, Clone)]
pub struct VariantQcParams {
    /// Per-variant missing-call-rate cutoff (fail at or above).
    pub missingness_cutoff: f64,
    /// Minor allele frequency cutoff (fail below).
    pub maf_cutoff: f64,
    /// HWE exact-test p-value cutoff (fail below).
    pub hwe_cutoff: f64,
    /// Extend the HWE test beyond control samples.
    pub hwe_include_nonctrl: bool,
    /// Restrict to autosomal variants before the MAF check.
    pub autosomal_only: bool,
}

impl Default for VariantQcParams {
    fn default() -> Self {
        Self {
            missingness_cutoff: 0.2,
            maf_cutoff: 0.01,
            hwe_cutoff: 1e-6,
            hwe_include_nonctrl: false,
            autosomal_only: false,
        }
    }
}

/// Result of the full variant axis.
#[derive(Debug)]
pub struct VariantQcOutcome {
    /// Dataset with all failing variants removed.
    pub dataset: Dataset,
    /// Aggregated failure manifest for the axis.
    pub manifest: Manifest,
    /// Where the axis report document was written.
    pub document: PathBuf,
}

/// Extract the autosomal (chromosome 1-22) variant ids from the dataset's
/// `.bim` file into a one-id-per-line inclusion list.
pub fn write_autosomal_variant_file(input: &Dataset, out: &Path) -> Result<usize> {
    let bim_path = input.sibling("bim");
    let bim = File::open(&bim_path)
        .with_context(|| format!("failed to open {}", bim_path.display()))?;

    let mut file =
        File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut written = 0usize;
    for line in BufReader::new(bim).lines() {
        let line = line.with_context(|| format!("failed to read {}", bim_path.display()))?;
        let mut fields = line.split_whitespace();
        let (Some(chrom), Some(snp)) = (fields.next(), fields.next()) else {
            continue;
        };
        // Non-numeric codes (X, Y, MT) and 23+ are not autosomal.
        if matches!(chrom.parse::<u8>(), Ok(c) if (1..=22).contains(&c)) {
            writeln!(file, "{snp}")?;
            written += 1;
        }
    }
    Ok(written)
}

/// Missingness stage on the variant axis.
pub fn check_missingness(
    runner: &PlinkRunner,
    input: &Dataset,
    cutoff: f64,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<VariantId>, usize)> {
    let miss_prefix = work_dir.join("variant_missingness");
    runner
        .report(input, &[PlinkOp::MissingReport], &miss_prefix)
        .context("missingness report failed")?;

    let outcome =
        report::variant_missingness(&append_extension(&miss_prefix, "lmiss"), cutoff)?;
    figures.push(outcome.figure);

    let filtered = filter::variant_missingness(
        runner,
        input,
        cutoff,
        &work_dir.join("snp_missingness_filtered"),
    )
    .context("variant missingness filter failed")?;

    Ok((filtered, outcome.failed, outcome.population))
}

/// MAF stage, optionally restricted to autosomal variants first.
pub fn check_maf(
    runner: &PlinkRunner,
    input: &Dataset,
    params: &VariantQcParams,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<VariantId>)> {
    let input = if params.autosomal_only {
        let auto_file = work_dir.join("autosomal_snps.txt");
        let kept = write_autosomal_variant_file(input, &auto_file)?;
        tracing::info!(kept, "restricting to autosomal variants");
        runner
            .make_bed(input, &[PlinkOp::Extract(auto_file)], &work_dir.join("autosomal"))
            .context("autosomal restriction failed")?
    } else {
        input.clone()
    };

    let freq_prefix = work_dir.join("maf_check");
    runner
        .report(&input, &[PlinkOp::FreqReport], &freq_prefix)
        .context("allele frequency report failed")?;

    let outcome = report::minor_allele_frequency(
        &append_extension(&freq_prefix, "frq"),
        params.maf_cutoff,
    )?;
    figures.push(outcome.figure);

    let filtered = filter::minor_allele_frequency(
        runner,
        &input,
        params.maf_cutoff,
        &work_dir.join("maf_filtered"),
    )
    .context("minor allele frequency filter failed")?;

    Ok((filtered, outcome.failed))
}

/// HWE stage: report, classify, filter.
pub fn check_hwe(
    runner: &PlinkRunner,
    input: &Dataset,
    params: &VariantQcParams,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<VariantId>)> {
    let hwe_prefix = work_dir.join("hwe_check");
    runner
        .report(input, &[PlinkOp::HardyReport], &hwe_prefix)
        .context("Hardy-Weinberg report failed")?;

    let outcome =
        report::hardy_weinberg(&append_extension(&hwe_prefix, "hwe"), params.hwe_cutoff)?;
    figures.push(outcome.figure);

    let filtered = filter::hardy_weinberg(
        runner,
        input,
        params.hwe_cutoff,
        params.hwe_include_nonctrl,
        &work_dir.join("hwe_filtered"),
    )
    .context("Hardy-Weinberg filter failed")?;

    Ok((filtered, outcome.failed))
}

/// Run the whole variant axis and persist its manifest and report document.
pub fn run_variant_qc(
    runner: &PlinkRunner,
    input: &Dataset,
    params: &VariantQcParams,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<VariantQcOutcome> {
    let mut failures: FailureSet<VariantId> = FailureSet::new();

    let (dataset, missing_failed, population) =
        check_missingness(runner, input, params.missingness_cutoff, work_dir, figures)?;
    failures.record("missingness", missing_failed);

    let (dataset, maf_failed) = check_maf(runner, &dataset, params, work_dir, figures)?;
    failures.record("maf", maf_failed);

    let (dataset, hwe_failed) = check_hwe(runner, &dataset, params, work_dir, figures)?;
    failures.record("hwe", hwe_failed);

    let summary = report::failure_summary_figure(
        "Variants",
        &failures.counts(),
        failures.total_unique(),
        population,
    )?;
    figures.push(summary);

    let manifest = manifest::aggregate(&failures, population, &work_dir.join("failed_snp_ids"))
        .context("failed to write variant failure manifests")?;

    let document = work_dir.join("variants_qc_report.html");
    figures
        .write_document(&document)
        .context("failed to write variant QC report document")?;

    Ok(VariantQcOutcome {
        dataset,
        manifest,
        document,
    })
}
