//! Sample-axis QC: missingness, sex discrepancy, heterozygosity outliers
//! and cryptic relatedness, in that order.
//!
//! Stage order is a correctness requirement, not a convention: each stage
//! receives the dataset handle returned by the one before it, so the
//! heterozygosity band and relatedness pairs are computed on the population
//! that survived the earlier checks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::dataset::{append_extension, Dataset, SampleId};
use crate::figures::FigureBook;
use crate::filter::{self, LdPruneParams};
use crate::manifest::{self, FailureSet, Manifest};
use crate::plink::{PlinkOp, PlinkRunner};
use crate::report;

/// Thresholds for the sample axis.
#[derive(Debug, Clone)]
pub struct SampleQcParams {
    /// Per-sample missing-call-rate cutoff (fail at or above).
    pub missingness_cutoff: f64,
    /// Pi-hat cutoff for the relatedness report (fail at or above).
    pub pi_hat_cutoff: f64,
    /// Linkage pruning ahead of the heterozygosity check.
    pub ld: LdPruneParams,
}

impl Default for SampleQcParams {
    fn default() -> Self {
        Self {
            missingness_cutoff: 0.2,
            pi_hat_cutoff: 0.2,
            ld: LdPruneParams::default(),
        }
    }
}

/// Result of the full sample axis.
#[derive(Debug)]
pub struct SampleQcOutcome {
    /// Dataset with all failing samples removed.
    pub dataset: Dataset,
    /// Aggregated failure manifest for the axis.
    pub manifest: Manifest,
    /// Where the axis report document was written.
    pub document: PathBuf,
}

fn stage_prefix(work_dir: &Path, name: &str) -> PathBuf {
    work_dir.join(name)
}

/// Missingness stage: report, classify, filter. Returns the narrowed
/// dataset, the failing ids and the stage population.
pub fn check_missingness(
    runner: &PlinkRunner,
    input: &Dataset,
    cutoff: f64,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<SampleId>, usize)> {
    let miss_prefix = stage_prefix(work_dir, "missingness");
    runner
        .report(input, &[PlinkOp::MissingReport], &miss_prefix)
        .context("missingness report failed")?;

    let outcome = report::sample_missingness(&append_extension(&miss_prefix, "imiss"), cutoff)?;
    figures.push(outcome.figure);

    let filtered = filter::sample_missingness(
        runner,
        input,
        cutoff,
        &stage_prefix(work_dir, "sample_missingness_filtered"),
    )
    .context("sample missingness filter failed")?;

    Ok((filtered, outcome.failed, outcome.population))
}

/// Sex-discrepancy stage: impute sex from X-chromosome homozygosity,
/// compare against the reported value, remove mismatches.
pub fn check_sex_discrepancy(
    runner: &PlinkRunner,
    input: &Dataset,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<SampleId>)> {
    let sexcheck_prefix = stage_prefix(work_dir, "sexcheck");
    runner
        .report(input, &[PlinkOp::CheckSex], &sexcheck_prefix)
        .context("sex-check report failed")?;

    let discrepancy_file = work_dir.join("sex_discrepancy.txt");
    let outcome = report::sex_check(
        &append_extension(&sexcheck_prefix, "sexcheck"),
        &discrepancy_file,
    )?;
    figures.push(outcome.figure);

    let filtered = filter::remove_sex_discrepant(
        runner,
        input,
        &discrepancy_file,
        &stage_prefix(work_dir, "sex_discrepancy_filtered"),
    )
    .context("sex-discrepancy removal failed")?;

    Ok((filtered, outcome.failed))
}

/// Heterozygosity stage: LD-prune, compute per-sample heterozygosity on the
/// pruned set, remove the +/- 3 sd outliers from the unpruned input.
///
/// Returns the narrowed dataset, the failing ids and the independent
/// variant list for reuse by the relatedness stage.
pub fn check_heterozygosity(
    runner: &PlinkRunner,
    input: &Dataset,
    ld: &LdPruneParams,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<SampleId>, PathBuf)> {
    let pruned = filter::ld_prune(
        runner,
        input,
        ld,
        &stage_prefix(work_dir, "independent_snps"),
        &stage_prefix(work_dir, "ld_pruned"),
    )
    .context("linkage pruning failed")?;

    let het_prefix = stage_prefix(work_dir, "het_check");
    runner
        .report(&pruned.dataset, &[PlinkOp::HetReport], &het_prefix)
        .context("heterozygosity report failed")?;

    let failed_file = work_dir.join("heterozygosity_failed.txt");
    let (outcome, bounds) =
        report::heterozygosity(&append_extension(&het_prefix, "het"), &failed_file)?;
    tracing::debug!(lower = bounds.lower, upper = bounds.upper, "heterozygosity band");
    figures.push(outcome.figure);

    let filtered = filter::remove_samples(
        runner,
        input,
        &failed_file,
        &stage_prefix(work_dir, "heterozygosity_filtered"),
    )
    .context("heterozygosity outlier removal failed")?;

    Ok((filtered, outcome.failed, pruned.prune_in))
}

/// Cryptic-relatedness stage: pairwise relatedness on the independent
/// variant set, then remove the worse-genotyped member of each related pair.
pub fn check_relatedness(
    runner: &PlinkRunner,
    input: &Dataset,
    prune_in: &Path,
    pi_hat_cutoff: f64,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<(Dataset, Vec<SampleId>)> {
    let genome_prefix = stage_prefix(work_dir, &format!("pihat_min{pi_hat_cutoff}"));
    runner
        .report(
            input,
            &[
                PlinkOp::Extract(prune_in.to_path_buf()),
                PlinkOp::GenomeReport {
                    min_pi_hat: pi_hat_cutoff,
                },
            ],
            &genome_prefix,
        )
        .context("relatedness report failed")?;

    let miss_prefix = stage_prefix(work_dir, "related_missingness");
    runner
        .report(input, &[PlinkOp::MissingReport], &miss_prefix)
        .context("missingness report for relatedness tie-break failed")?;

    let removal_file = work_dir.join("related_low_call_rate.txt");
    let outcome = report::relatedness(
        &append_extension(&genome_prefix, "genome"),
        &append_extension(&miss_prefix, "imiss"),
        &removal_file,
    )?;
    figures.push(outcome.figure);

    // No related pairs above the cutoff: nothing to remove, the stage
    // passes the dataset through unchanged.
    if outcome.failed.is_empty() {
        return Ok((input.clone(), Vec::new()));
    }

    let filtered = filter::remove_samples(
        runner,
        input,
        &removal_file,
        &stage_prefix(work_dir, "relatedness_filtered"),
    )
    .context("relatedness removal failed")?;

    Ok((filtered, outcome.failed))
}

/// Run the whole sample axis and persist its manifest and report document.
pub fn run_sample_qc(
    runner: &PlinkRunner,
    input: &Dataset,
    params: &SampleQcParams,
    work_dir: &Path,
    figures: &mut FigureBook,
) -> Result<SampleQcOutcome> {
    let mut failures: FailureSet<SampleId> = FailureSet::new();

    let (dataset, missing_failed, population) =
        check_missingness(runner, input, params.missingness_cutoff, work_dir, figures)?;
    failures.record("missingness", missing_failed);

    let (dataset, sex_failed) = check_sex_discrepancy(runner, &dataset, work_dir, figures)?;
    failures.record("sex_discrepancy", sex_failed);

    let (dataset, het_failed, prune_in) =
        check_heterozygosity(runner, &dataset, &params.ld, work_dir, figures)?;
    failures.record("heterozygosity", het_failed);

    let (dataset, related_failed) = check_relatedness(
        runner,
        &dataset,
        &prune_in,
        params.pi_hat_cutoff,
        work_dir,
        figures,
    )?;
    failures.record("relatedness", related_failed);

    let summary = report::failure_summary_figure(
        "Samples",
        &failures.counts(),
        failures.total_unique(),
        population,
    )?;
    figures.push(summary);

    let manifest = manifest::aggregate(
        &failures,
        population,
        &stage_prefix(work_dir, "failed_sample_ids"),
    )
    .context("failed to write sample failure manifests")?;

    let document = work_dir.join("samples_qc_report.html");
    figures
        .write_document(&document)
        .context("failed to write sample QC report document")?;

    Ok(SampleQcOutcome {
        dataset,
        manifest,
        document,
    })
}
