//! Filter stages: one exclusion criterion each, applied as an idempotent
//! transformation from an input dataset to a new, narrower output dataset.
//!
//! Every stage guarantees monotonic narrowing: the output triple contains a
//! subset of the input's samples and variants, never new ones. The heavy
//! lifting is delegated to the external tool; this module owns stage
//! preconditions and the dataset-handle bookkeeping.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dataset::{append_extension, Dataset};
use crate::plink::{PlinkError, PlinkOp, PlinkRunner};

#[derive(Debug, Error)]
pub enum FilterError {
    /// The upstream report stage never produced the exclusion file. This is
    /// a recoverable precondition failure: it aborts only this stage.
    #[error("exclusion file {0} does not exist; run the matching report stage first")]
    MissingExclusionFile(PathBuf),

    #[error(
        "correlation threshold {threshold} is not valid for the multiple method: \
         the variance inflation factor must be greater than 1"
    )]
    MultipleCorrelationThreshold { threshold: f64 },

    #[error(transparent)]
    Plink(#[from] PlinkError),
}

/// Drop variants whose missing-call rate is at or above `threshold`.
pub fn variant_missingness(
    runner: &PlinkRunner,
    input: &Dataset,
    threshold: f64,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    Ok(runner.make_bed(input, &[PlinkOp::FilterVariantMissingness(threshold)], out_prefix)?)
}

/// Drop samples whose missing-call rate is at or above `threshold`.
pub fn sample_missingness(
    runner: &PlinkRunner,
    input: &Dataset,
    threshold: f64,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    Ok(runner.make_bed(input, &[PlinkOp::FilterSampleMissingness(threshold)], out_prefix)?)
}

/// Keep only the samples listed in `keep_file` (two columns, family id and
/// within-family id, no header).
pub fn keep_samples(
    runner: &PlinkRunner,
    input: &Dataset,
    keep_file: &Path,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    Ok(runner.make_bed(input, &[PlinkOp::Keep(keep_file.to_path_buf())], out_prefix)?)
}

/// Rewrite reported sex from imputed X-chromosome homozygosity.
pub fn impute_sex(
    runner: &PlinkRunner,
    input: &Dataset,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    Ok(runner.make_bed(input, &[PlinkOp::ImputeSex], out_prefix)?)
}

/// Remove the samples flagged by the sex-discrepancy report.
///
/// A missing exclusion file aborts this stage with a typed error instead of
/// being swallowed; the caller decides whether the run can continue.
pub fn remove_sex_discrepant(
    runner: &PlinkRunner,
    input: &Dataset,
    discrepancy_file: &Path,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    if !discrepancy_file.is_file() {
        return Err(FilterError::MissingExclusionFile(
            discrepancy_file.to_path_buf(),
        ));
    }
    Ok(runner.make_bed(
        input,
        &[PlinkOp::Remove(discrepancy_file.to_path_buf())],
        out_prefix,
    )?)
}

/// Remove an arbitrary exclusion list of samples (heterozygosity outliers,
/// related individuals).
pub fn remove_samples(
    runner: &PlinkRunner,
    input: &Dataset,
    remove_file: &Path,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    if !remove_file.is_file() {
        return Err(FilterError::MissingExclusionFile(remove_file.to_path_buf()));
    }
    Ok(runner.make_bed(input, &[PlinkOp::Remove(remove_file.to_path_buf())], out_prefix)?)
}

/// Drop variants with minor allele frequency below `threshold`.
pub fn minor_allele_frequency(
    runner: &PlinkRunner,
    input: &Dataset,
    threshold: f64,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    Ok(runner.make_bed(input, &[PlinkOp::FilterMaf(threshold)], out_prefix)?)
}

/// Drop variants with an HWE exact-test p-value below `threshold`.
/// `include_nonctrl` extends the test beyond control samples.
pub fn hardy_weinberg(
    runner: &PlinkRunner,
    input: &Dataset,
    threshold: f64,
    include_nonctrl: bool,
    out_prefix: &Path,
) -> Result<Dataset, FilterError> {
    Ok(runner.make_bed(
        input,
        &[PlinkOp::FilterHwe {
            threshold,
            include_nonctrl,
        }],
        out_prefix,
    )?)
}

/// How variant independence is measured during linkage pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMethod {
    /// Pairwise r^2 between variants in the window.
    Pairwise,
    /// Multi-variant variance inflation factor; thresholds must exceed 1.
    Multiple,
}

#[derive(Debug, Clone, Copy)]
pub struct LdPruneParams {
    pub window: u32,
    pub shift: u32,
    pub correlation_threshold: f64,
    pub method: CorrelationMethod,
}

impl Default for LdPruneParams {
    fn default() -> Self {
        Self {
            window: 50,
            shift: 5,
            correlation_threshold: 0.2,
            method: CorrelationMethod::Pairwise,
        }
    }
}

/// Result of linkage pruning: the restricted dataset plus the independent
/// variant list the pruning step selected (reused by the relatedness check).
#[derive(Debug)]
pub struct LdPruned {
    pub dataset: Dataset,
    pub prune_in: PathBuf,
}

/// Select an approximately independent variant set, then re-invoke the tool
/// restricted to that set.
///
/// Two sequential invocations; the second never runs if the first fails.
/// The `Multiple` method's threshold is validated before any subprocess is
/// spawned.
pub fn ld_prune(
    runner: &PlinkRunner,
    input: &Dataset,
    params: &LdPruneParams,
    snp_prefix: &Path,
    out_prefix: &Path,
) -> Result<LdPruned, FilterError> {
    let op = match params.method {
        CorrelationMethod::Multiple => {
            if !params.correlation_threshold.is_finite() || params.correlation_threshold <= 1.0 {
                return Err(FilterError::MultipleCorrelationThreshold {
                    threshold: params.correlation_threshold,
                });
            }
            PlinkOp::Indep {
                window: params.window,
                shift: params.shift,
                vif: params.correlation_threshold,
            }
        }
        CorrelationMethod::Pairwise => PlinkOp::IndepPairwise {
            window: params.window,
            shift: params.shift,
            r2: params.correlation_threshold,
        },
    };

    runner.report(input, &[op], snp_prefix)?;

    let prune_in = append_extension(snp_prefix, "prune.in");
    if !prune_in.is_file() {
        return Err(FilterError::MissingExclusionFile(prune_in));
    }

    let dataset = runner.make_bed(input, &[PlinkOp::Extract(prune_in.clone())], out_prefix)?;
    Ok(LdPruned { dataset, prune_in })
}
