//! Command dispatcher for the external PLINK binary.
//!
//! Builds argument lists for a single PLINK invocation, validates the inputs
//! the operation references before anything is spawned, runs the subprocess
//! synchronously and propagates a non-zero exit status as a fatal stage
//! failure. The dispatcher never inspects PLINK's outputs; report parsing
//! lives in [`crate::report`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::dataset::{Dataset, DatasetError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PlinkError {
    #[error("{flag} requires an existing file, {path} was not found")]
    MissingInput { flag: &'static str, path: PathBuf },

    #[error("invalid value {value} for {flag}: {reason}")]
    InvalidParameter {
        flag: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: String },

    #[error("`{command}` did not finish within {}s and was killed", timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("failed to wait on `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// One PLINK operation, expanded into command-line flags by the dispatcher.
#[derive(Debug, Clone)]
pub enum PlinkOp {
    /// `--geno <t>`: drop variants whose missing-call rate exceeds `t`.
    FilterVariantMissingness(f64),
    /// `--mind <t>`: drop samples whose missing-call rate exceeds `t`.
    FilterSampleMissingness(f64),
    /// `--keep <file>`: retain only the listed samples.
    Keep(PathBuf),
    /// `--remove <file>`: drop the listed samples.
    Remove(PathBuf),
    /// `--impute-sex`: rewrite reported sex from X-chromosome homozygosity.
    ImputeSex,
    /// `--maf <t>`: drop variants with minor allele frequency below `t`.
    FilterMaf(f64),
    /// `--hwe [include-nonctrl] <t>`: drop variants with an HWE exact-test
    /// p-value below `t`.
    FilterHwe { threshold: f64, include_nonctrl: bool },
    /// `--indep <window> <shift> <vif>`: multi-variant correlation pruning.
    Indep { window: u32, shift: u32, vif: f64 },
    /// `--indep-pairwise <window> <shift> <r2>`: pairwise correlation pruning.
    IndepPairwise { window: u32, shift: u32, r2: f64 },
    /// `--extract <file>`: restrict to the listed variants.
    Extract(PathBuf),
    /// `--freq`: per-variant allele frequency report.
    FreqReport,
    /// `--missing`: per-sample and per-variant missingness reports.
    MissingReport,
    /// `--check-sex`: imputed-vs-reported sex report.
    CheckSex,
    /// `--het`: per-sample homozygosity report.
    HetReport,
    /// `--hardy`: per-variant HWE exact-test report.
    HardyReport,
    /// `--genome --min <t>`: pairwise relatedness report, restricted to
    /// pairs with pi-hat at or above `t`.
    GenomeReport { min_pi_hat: f64 },
    /// `--make-pheno <file> '*'`: annotate case/control phenotypes.
    MakePheno(PathBuf),
    /// `--assoc [--adjust]`: chi-squared allelic association test.
    Assoc { adjust: bool },
    /// `--linear` / `--logistic` with an optional covariate file.
    Regression {
        logistic: bool,
        covariates: Option<PathBuf>,
    },
}

impl PlinkOp {
    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            Self::FilterVariantMissingness(t) => {
                args.push("--geno".into());
                args.push(t.to_string());
            }
            Self::FilterSampleMissingness(t) => {
                args.push("--mind".into());
                args.push(t.to_string());
            }
            Self::Keep(path) => {
                args.push("--keep".into());
                args.push(path.display().to_string());
            }
            Self::Remove(path) => {
                args.push("--remove".into());
                args.push(path.display().to_string());
            }
            Self::ImputeSex => args.push("--impute-sex".into()),
            Self::FilterMaf(t) => {
                args.push("--maf".into());
                args.push(t.to_string());
            }
            Self::FilterHwe {
                threshold,
                include_nonctrl,
            } => {
                args.push("--hwe".into());
                if *include_nonctrl {
                    args.push("include-nonctrl".into());
                }
                args.push(threshold.to_string());
            }
            Self::Indep { window, shift, vif } => {
                args.push("--indep".into());
                args.push(window.to_string());
                args.push(shift.to_string());
                args.push(vif.to_string());
            }
            Self::IndepPairwise { window, shift, r2 } => {
                args.push("--indep-pairwise".into());
                args.push(window.to_string());
                args.push(shift.to_string());
                args.push(r2.to_string());
            }
            Self::Extract(path) => {
                args.push("--extract".into());
                args.push(path.display().to_string());
            }
            Self::FreqReport => args.push("--freq".into()),
            Self::MissingReport => args.push("--missing".into()),
            Self::CheckSex => args.push("--check-sex".into()),
            Self::HetReport => args.push("--het".into()),
            Self::HardyReport => args.push("--hardy".into()),
            Self::GenomeReport { min_pi_hat } => {
                args.push("--genome".into());
                args.push("--min".into());
                args.push(min_pi_hat.to_string());
            }
            Self::MakePheno(path) => {
                args.push("--make-pheno".into());
                args.push(path.display().to_string());
                args.push("*".into());
            }
            Self::Assoc { adjust } => {
                args.push("--assoc".into());
                if *adjust {
                    args.push("--adjust".into());
                }
            }
            Self::Regression {
                logistic,
                covariates,
            } => {
                args.push(if *logistic { "--logistic" } else { "--linear" }.into());
                if let Some(cov) = covariates {
                    args.push("--covar".into());
                    args.push(cov.display().to_string());
                }
            }
        }
    }

    /// Rejects malformed parameters and missing referenced files before a
    /// subprocess is constructed.
    fn validate(&self) -> Result<(), PlinkError> {
        match self {
            Self::FilterVariantMissingness(t) => check_rate("--geno", *t),
            Self::FilterSampleMissingness(t) => check_rate("--mind", *t),
            Self::FilterMaf(t) => check_rate("--maf", *t),
            Self::FilterHwe { threshold, .. } => {
                if !threshold.is_finite() || *threshold <= 0.0 || *threshold >= 1.0 {
                    return Err(PlinkError::InvalidParameter {
                        flag: "--hwe",
                        value: *threshold,
                        reason: "p-value threshold must be in (0, 1)",
                    });
                }
                Ok(())
            }
            Self::Indep { vif, .. } => {
                if !vif.is_finite() || *vif <= 1.0 {
                    return Err(PlinkError::InvalidParameter {
                        flag: "--indep",
                        value: *vif,
                        reason: "variance inflation factor must be greater than 1",
                    });
                }
                Ok(())
            }
            Self::IndepPairwise { r2, .. } => {
                if !r2.is_finite() || *r2 <= 0.0 || *r2 >= 1.0 {
                    return Err(PlinkError::InvalidParameter {
                        flag: "--indep-pairwise",
                        value: *r2,
                        reason: "r^2 threshold must be in (0, 1)",
                    });
                }
                Ok(())
            }
            Self::GenomeReport { min_pi_hat } => check_rate("--min", *min_pi_hat),
            Self::Keep(path) => check_file("--keep", path),
            Self::Remove(path) => check_file("--remove", path),
            Self::Extract(path) => check_file("--extract", path),
            Self::MakePheno(path) => check_file("--make-pheno", path),
            Self::Regression {
                covariates: Some(cov),
                ..
            } => check_file("--covar", cov),
            _ => Ok(()),
        }
    }
}

fn check_rate(flag: &'static str, value: f64) -> Result<(), PlinkError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(PlinkError::InvalidParameter {
            flag,
            value,
            reason: "must be a rate in [0, 1]",
        });
    }
    Ok(())
}

fn check_file(flag: &'static str, path: &Path) -> Result<(), PlinkError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PlinkError::MissingInput {
            flag,
            path: path.to_path_buf(),
        })
    }
}

/// Synchronous runner for the external PLINK binary.
///
/// Every invocation blocks the pipeline until the subprocess exits; there is
/// no parallelism and no retry. A hung tool is bounded by the optional
/// timeout, after which the child is killed and the stage fails.
#[derive(Debug, Clone)]
pub struct PlinkRunner {
    tool: PathBuf,
    timeout: Option<Duration>,
}

impl PlinkRunner {
    pub fn new<P: AsRef<Path>>(tool: P) -> Self {
        Self {
            tool: tool.as_ref().to_path_buf(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `ops` against `input` and produce a new dataset triple at
    /// `out_prefix` (adds `--make-bed`). Returns a validated handle to the
    /// new triple.
    pub fn make_bed(
        &self,
        input: &Dataset,
        ops: &[PlinkOp],
        out_prefix: &Path,
    ) -> Result<Dataset, PlinkError> {
        self.invoke(input, ops, out_prefix, true)?;
        Ok(Dataset::from_output_of(out_prefix)?)
    }

    /// Run `ops` against `input` for their side-channel report files only;
    /// no new dataset triple is produced.
    pub fn report(
        &self,
        input: &Dataset,
        ops: &[PlinkOp],
        out_prefix: &Path,
    ) -> Result<(), PlinkError> {
        self.invoke(input, ops, out_prefix, false)
    }

    fn invoke(
        &self,
        input: &Dataset,
        ops: &[PlinkOp],
        out_prefix: &Path,
        make_bed: bool,
    ) -> Result<(), PlinkError> {
        for op in ops {
            op.validate()?;
        }

        let mut args: Vec<String> =
            vec!["--bfile".into(), input.prefix().display().to_string()];
        for op in ops {
            op.push_args(&mut args);
        }
        args.push("--silent".into());
        if make_bed {
            args.push("--make-bed".into());
        }
        args.push("--out".into());
        args.push(out_prefix.display().to_string());

        let rendered = render_command(&self.tool, &args);
        tracing::debug!(command = %rendered, "invoking external tool");

        let mut child = Command::new(&self.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| PlinkError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let status = match self.timeout {
            None => child.wait().map_err(|source| PlinkError::Wait {
                command: rendered.clone(),
                source,
            })?,
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    match child.try_wait().map_err(|source| PlinkError::Wait {
                        command: rendered.clone(),
                        source,
                    })? {
                        Some(status) => break status,
                        None if Instant::now() >= deadline => {
                            // The child may have exited between the poll and
                            // the kill; ignore the race.
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(PlinkError::TimedOut {
                                command: rendered,
                                timeout,
                            });
                        }
                        None => std::thread::sleep(POLL_INTERVAL),
                    }
                }
            }
        };

        if !status.success() {
            return Err(PlinkError::Failed {
                command: rendered,
                status: status.to_string(),
            });
        }

        tracing::debug!(out = %out_prefix.display(), "external tool finished");
        Ok(())
    }
}

fn render_command(tool: &Path, args: &[String]) -> String {
    let mut rendered = tool.display().to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_vif_at_or_below_one() {
        let op = PlinkOp::Indep {
            window: 50,
            shift: 5,
            vif: 0.5,
        };
        let err = op.validate().unwrap_err();
        assert!(matches!(
            err,
            PlinkError::InvalidParameter { flag: "--indep", .. }
        ));
    }

    #[test]
    fn rejects_missing_remove_file() {
        let op = PlinkOp::Remove(PathBuf::from("/nonexistent/remove.txt"));
        let err = op.validate().unwrap_err();
        assert!(matches!(
            err,
            PlinkError::MissingInput { flag: "--remove", .. }
        ));
    }

    #[test]
    fn hwe_args_include_nonctrl_before_threshold() {
        let mut args = Vec::new();
        PlinkOp::FilterHwe {
            threshold: 1e-6,
            include_nonctrl: true,
        }
        .push_args(&mut args);
        assert_eq!(args, vec!["--hwe", "include-nonctrl", "0.000001"]);
    }

    #[test]
    fn rejects_out_of_range_rate() {
        let err = PlinkOp::FilterMaf(1.5).validate().unwrap_err();
        assert!(matches!(
            err,
            PlinkError::InvalidParameter { flag: "--maf", .. }
        ));
    }
}
