use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use crate::filter::CorrelationMethod;
use crate::pipeline::{self, QcAxis, QcConfig, RunSummary};

#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum)]
pub enum CorrelationMethodArg {
    Pairwise,
    Multiple,
}

impl From<CorrelationMethodArg> for CorrelationMethod {
    fn from(arg: CorrelationMethodArg) -> Self {
        match arg {
            CorrelationMethodArg::Pairwise => CorrelationMethod::Pairwise,
            CorrelationMethodArg::Multiple => CorrelationMethod::Multiple,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Sample and variant QC for PLINK binary genotype data", long_about = None)]
struct Cli {
    /// Prefix of the input dataset (.bed/.bim/.fam triple)
    #[arg(value_name = "BFILE")]
    bfile: PathBuf,

    /// Directory for intermediate datasets, manifests and reports
    #[arg(long, default_value = "qc_output", value_name = "DIR")]
    out_dir: PathBuf,

    /// Keep only the samples listed in this file before QC starts
    #[arg(long, value_name = "FILE")]
    keep: Option<PathBuf>,

    /// Run only the sample-level checks
    #[arg(long, conflicts_with = "variants_only")]
    samples_only: bool,

    /// Run only the variant-level checks
    #[arg(long, conflicts_with = "samples_only")]
    variants_only: bool,

    /// Missing-call-rate cutoff for both axes (fail at or above)
    #[arg(long, default_value_t = 0.2)]
    missingness: f64,

    /// Minor allele frequency cutoff (fail below)
    #[arg(long, default_value_t = 0.01)]
    maf: f64,

    /// HWE exact-test p-value cutoff (fail below)
    #[arg(long, default_value_t = 1e-6)]
    hwe: f64,

    /// Apply the HWE test to cases as well as controls
    #[arg(long)]
    hwe_include_nonctrl: bool,

    /// Restrict to autosomal variants before the MAF check
    #[arg(long)]
    autosomal_only: bool,

    /// Pi-hat cutoff for the relatedness check (fail at or above)
    #[arg(long, default_value_t = 0.2)]
    pi_hat: f64,

    /// Linkage-pruning window size in variants
    #[arg(long, default_value_t = 50)]
    ld_window: u32,

    /// Linkage-pruning window shift in variants
    #[arg(long, default_value_t = 5)]
    ld_shift: u32,

    /// Linkage-pruning correlation threshold (r^2, or VIF for `multiple`)
    #[arg(long, default_value_t = 0.2)]
    ld_threshold: f64,

    /// Correlation method for linkage pruning
    #[arg(long, value_enum, default_value_t = CorrelationMethodArg::Pairwise)]
    correlation_method: CorrelationMethodArg,

    /// Path to the external PLINK binary
    #[arg(long, default_value = "plink", value_name = "PATH")]
    plink: PathBuf,

    /// Kill any single tool invocation running longer than this
    #[arg(long, value_name = "SECONDS")]
    timeout_secs: Option<u64>,

    /// Logging verbosity (e.g. error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let axis = match (cli.samples_only, cli.variants_only) {
        (true, false) => QcAxis::Samples,
        (false, true) => QcAxis::Variants,
        _ => QcAxis::Full,
    };

    let mut config = QcConfig::new(&cli.bfile, &cli.out_dir);
    config.plink = cli.plink.clone();
    config.timeout = cli.timeout_secs.map(Duration::from_secs);
    config.keep = cli.keep.clone();
    config.axis = axis;

    config.sample_params.missingness_cutoff = cli.missingness;
    config.sample_params.pi_hat_cutoff = cli.pi_hat;
    config.sample_params.ld.window = cli.ld_window;
    config.sample_params.ld.shift = cli.ld_shift;
    config.sample_params.ld.correlation_threshold = cli.ld_threshold;
    config.sample_params.ld.method = cli.correlation_method.into();

    config.variant_params.missingness_cutoff = cli.missingness;
    config.variant_params.maf_cutoff = cli.maf;
    config.variant_params.hwe_cutoff = cli.hwe;
    config.variant_params.hwe_include_nonctrl = cli.hwe_include_nonctrl;
    config.variant_params.autosomal_only = cli.autosomal_only;

    let summary = pipeline::run(&config)?;
    print_summary(&summary);

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

fn print_summary(summary: &RunSummary) {
    if let Some(samples) = &summary.samples {
        println!(
            "Samples failing QC: {}/{} (manifest: {})",
            samples.total_failed, samples.population, samples.manifest_hr
        );
    }
    if let Some(variants) = &summary.variants {
        println!(
            "Variants failing QC: {}/{} (manifest: {})",
            variants.total_failed, variants.population, variants.manifest_hr
        );
    }
    println!("Final dataset: {}", summary.final_dataset);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["plink-qc", "cohort"]);
        assert_eq!(cli.bfile, PathBuf::from("cohort"));
        assert_eq!(cli.missingness, 0.2);
        assert_eq!(cli.maf, 0.01);
        assert_eq!(cli.hwe, 1e-6);
        assert!(!cli.samples_only && !cli.variants_only);
    }

    #[test]
    fn axis_flags_are_mutually_exclusive() {
        let result = Cli::try_parse_from(["plink-qc", "cohort", "--samples-only", "--variants-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_correlation_method() {
        let cli = Cli::parse_from([
            "plink-qc",
            "cohort",
            "--correlation-method",
            "multiple",
            "--ld-threshold",
            "1.5",
        ]);
        assert_eq!(cli.correlation_method, CorrelationMethodArg::Multiple);
        assert_eq!(cli.ld_threshold, 1.5);
    }
}
