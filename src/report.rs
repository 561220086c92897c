//! Report stages: parse one external report table, apply the criterion's
//! decision rule, and emit the failing ids, a summary count and a figure.
//!
//! Every function here is pure with respect to the pipeline's dataset
//! handles; the only side effects are the exclusion-id files consumed by the
//! next filter stage.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dataset::{SampleId, VariantId};
use crate::figures::{Figure, FigureData, FigureError};
use crate::table::{Table, TableError};

const HISTOGRAM_BINS: usize = 30;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Figure(#[from] FigureError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The classified result of one report stage.
#[derive(Debug)]
pub struct ReportOutcome<I> {
    /// Rows inspected (the stage's population size).
    pub population: usize,
    /// Identifiers that failed the criterion, in table order.
    pub failed: Vec<I>,
    /// Diagnostic figure for the run report.
    pub figure: Figure,
}

impl<I> ReportOutcome<I> {
    pub fn n_failed(&self) -> usize {
        self.failed.len()
    }
}

fn sample_ids(table: &Table) -> Result<Vec<SampleId>, TableError> {
    let fids = table.strings("FID")?;
    let iids = table.strings("IID")?;
    Ok(fids
        .iter()
        .zip(&iids)
        .map(|(fid, iid)| SampleId::new(*fid, *iid))
        .collect())
}

/// Write a two-column (family id, within-family id) exclusion file, the
/// format every `--remove`/`--keep` invocation consumes. No header.
pub fn write_sample_id_file(path: &Path, ids: &[SampleId]) -> Result<(), ReportError> {
    let mut file = File::create(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for id in ids {
        writeln!(file, "{} {}", id.fid, id.iid).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Per-sample missingness: a sample fails when its missing-call rate
/// `F_MISS` is at or above the cutoff.
pub fn sample_missingness(
    imiss: &Path,
    cutoff: f64,
) -> Result<ReportOutcome<SampleId>, ReportError> {
    let table = Table::read(imiss)?;
    let ids = sample_ids(&table)?;
    let rates = table.floats("F_MISS")?;

    let failed: Vec<SampleId> = ids
        .iter()
        .zip(&rates)
        .filter(|(_, &rate)| rate >= cutoff)
        .map(|(id, _)| id.clone())
        .collect();

    tracing::info!(
        failed = failed.len(),
        population = table.len(),
        cutoff,
        "sample missingness check"
    );

    let figure = Figure::new(
        format!("Missing call rate per sample (>= {cutoff} removed)"),
        "Proportion of missing genotypes",
        "Number of samples",
        FigureData::Histogram {
            values: rates,
            bins: HISTOGRAM_BINS,
            cutoff: Some(cutoff),
        },
    )?;

    Ok(ReportOutcome {
        population: table.len(),
        failed,
        figure,
    })
}

/// Per-variant missingness from the `.lmiss` report; same decision rule as
/// the sample side.
pub fn variant_missingness(
    lmiss: &Path,
    cutoff: f64,
) -> Result<ReportOutcome<VariantId>, ReportError> {
    let table = Table::read(lmiss)?;
    let snps = table.strings("SNP")?;
    let rates = table.floats("F_MISS")?;

    let failed: Vec<VariantId> = snps
        .iter()
        .zip(&rates)
        .filter(|(_, &rate)| rate >= cutoff)
        .map(|(snp, _)| VariantId(snp.to_string()))
        .collect();

    tracing::info!(
        failed = failed.len(),
        population = table.len(),
        cutoff,
        "variant missingness check"
    );

    let figure = Figure::new(
        format!("Missing call rate per variant (>= {cutoff} removed)"),
        "Proportion of missing samples",
        "Number of variants",
        FigureData::Histogram {
            values: rates,
            bins: HISTOGRAM_BINS,
            cutoff: Some(cutoff),
        },
    )?;

    Ok(ReportOutcome {
        population: table.len(),
        failed,
        figure,
    })
}

/// Sex-discrepancy check: the external tool marks a sample's `STATUS` as
/// `PROBLEM` when imputed and reported sex disagree. Writes the exclusion
/// file consumed by the removal filter.
pub fn sex_check(
    sexcheck: &Path,
    discrepancy_file: &Path,
) -> Result<ReportOutcome<SampleId>, ReportError> {
    let table = Table::read(sexcheck)?;
    let ids = sample_ids(&table)?;
    let statuses = table.strings("STATUS")?;
    let f_values = table.floats("F")?;

    let failed: Vec<SampleId> = ids
        .iter()
        .zip(&statuses)
        .filter(|(_, status)| **status == "PROBLEM")
        .map(|(id, _)| id.clone())
        .collect();

    write_sample_id_file(discrepancy_file, &failed)?;

    tracing::info!(
        failed = failed.len(),
        population = table.len(),
        "sex discrepancy check"
    );

    let figure = Figure::new(
        "X-chromosome homozygosity (F) per sample",
        "F value",
        "Number of samples",
        FigureData::Histogram {
            values: f_values,
            bins: HISTOGRAM_BINS,
            cutoff: None,
        },
    )?;

    Ok(ReportOutcome {
        population: table.len(),
        failed,
        figure,
    })
}

/// Heterozygosity outlier bounds derived from the population itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HetBounds {
    pub mean: f64,
    pub sd: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Classify per-sample heterozygosity rates against a three-standard-
/// deviation band around the population mean.
///
/// `het_rate = (N(NM) - O(HOM)) / N(NM)` per sample; the band is recomputed
/// from the current population on every run. A sample sitting exactly on a
/// bound is not an outlier.
pub fn heterozygosity(
    het: &Path,
    failed_file: &Path,
) -> Result<(ReportOutcome<SampleId>, HetBounds), ReportError> {
    let table = Table::read(het)?;
    let ids = sample_ids(&table)?;
    let non_missing = table.floats("N(NM)")?;
    let hom = table.floats("O(HOM)")?;

    let rates: Vec<f64> = non_missing
        .iter()
        .zip(&hom)
        .map(|(&nm, &hom)| if nm > 0.0 { (nm - hom) / nm } else { f64::NAN })
        .collect();

    let finite: Vec<f64> = rates.iter().copied().filter(|r| r.is_finite()).collect();
    let mean = finite.iter().sum::<f64>() / finite.len().max(1) as f64;
    // Sample standard deviation (n - 1 denominator), matching how the
    // bounds have historically been derived for this check.
    let sd = if finite.len() > 1 {
        (finite.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (finite.len() - 1) as f64)
            .sqrt()
    } else {
        0.0
    };
    let bounds = HetBounds {
        mean,
        sd,
        lower: mean - 3.0 * sd,
        upper: mean + 3.0 * sd,
    };

    let failed: Vec<SampleId> = ids
        .iter()
        .zip(&rates)
        .filter(|(_, &rate)| rate.is_finite() && (rate < bounds.lower || rate > bounds.upper))
        .map(|(id, _)| id.clone())
        .collect();

    write_sample_id_file(failed_file, &failed)?;

    tracing::info!(
        failed = failed.len(),
        population = table.len(),
        mean = bounds.mean,
        sd = bounds.sd,
        "heterozygosity outlier check"
    );

    let figure = Figure::new(
        "Heterozygosity rate per sample (outside mean +/- 3 sd removed)",
        "Heterozygosity rate",
        "Number of samples",
        FigureData::Histogram {
            values: rates,
            bins: HISTOGRAM_BINS,
            cutoff: None,
        },
    )?;

    Ok((
        ReportOutcome {
            population: table.len(),
            failed,
            figure,
        },
        bounds,
    ))
}

/// Relatedness with low-call-rate tie-break.
///
/// For each pair in the `.genome` report, join both members' missingness
/// rates from the `.imiss` report and mark the member with the strictly
/// higher rate for removal, keeping the better-genotyped member. Writes the
/// exclusion file consumed by the removal filter.
pub fn relatedness(
    genome: &Path,
    imiss: &Path,
    removal_file: &Path,
) -> Result<ReportOutcome<SampleId>, ReportError> {
    let pairs = Table::read(genome)?;
    let missing = Table::read(imiss)?;

    let miss_ids = sample_ids(&missing)?;
    let miss_rates = missing.floats("F_MISS")?;
    let by_id: HashMap<&SampleId, f64> = miss_ids.iter().zip(miss_rates).collect();

    let fid1 = pairs.strings("FID1")?;
    let iid1 = pairs.strings("IID1")?;
    let fid2 = pairs.strings("FID2")?;
    let iid2 = pairs.strings("IID2")?;
    let pi_hat = pairs.floats("PI_HAT")?;
    let z0 = pairs.floats("Z0")?;

    let mut failed: Vec<SampleId> = Vec::new();
    for i in 0..pairs.len() {
        let first = SampleId::new(fid1[i], iid1[i]);
        let second = SampleId::new(fid2[i], iid2[i]);
        let first_miss = by_id.get(&first).copied().unwrap_or(f64::NAN);
        let second_miss = by_id.get(&second).copied().unwrap_or(f64::NAN);

        // Strictly higher missingness loses; on a tie (or when a rate is
        // unknown) the second member of the pair is removed.
        let removed = if first_miss > second_miss { first } else { second };
        if !failed.contains(&removed) {
            failed.push(removed);
        }
    }

    write_sample_id_file(removal_file, &failed)?;

    tracing::info!(
        failed = failed.len(),
        pairs = pairs.len(),
        "relatedness low-call-rate check"
    );

    let figure = Figure::new(
        "Related pairs: Z0 vs pi-hat",
        "Z0 (probability of zero shared alleles)",
        "Pi-hat",
        FigureData::Scatter {
            points: z0.into_iter().zip(pi_hat).collect(),
        },
    )?;

    Ok(ReportOutcome {
        population: missing.len(),
        failed,
        figure,
    })
}

/// Minor allele frequency: a variant fails when `MAF` is below the cutoff.
pub fn minor_allele_frequency(
    frq: &Path,
    cutoff: f64,
) -> Result<ReportOutcome<VariantId>, ReportError> {
    let table = Table::read(frq)?;
    let snps = table.strings("SNP")?;
    let maf = table.floats("MAF")?;

    let failed: Vec<VariantId> = snps
        .iter()
        .zip(&maf)
        .filter(|(_, &freq)| freq < cutoff)
        .map(|(snp, _)| VariantId(snp.to_string()))
        .collect();

    tracing::info!(
        failed = failed.len(),
        population = table.len(),
        cutoff,
        "minor allele frequency check"
    );

    let figure = Figure::new(
        format!("MAF distribution (< {cutoff} removed)"),
        "Minor allele frequency",
        "Number of variants",
        FigureData::Histogram {
            values: maf,
            bins: HISTOGRAM_BINS,
            cutoff: Some(cutoff),
        },
    )?;

    Ok(ReportOutcome {
        population: table.len(),
        failed,
        figure,
    })
}

/// Hardy-Weinberg equilibrium: a variant fails when its exact-test p-value
/// is below the cutoff.
pub fn hardy_weinberg(
    hwe: &Path,
    cutoff: f64,
) -> Result<ReportOutcome<VariantId>, ReportError> {
    let table = Table::read(hwe)?;
    let snps = table.strings("SNP")?;
    let p_values = table.floats("P")?;

    let failed: Vec<VariantId> = snps
        .iter()
        .zip(&p_values)
        .filter(|(_, &p)| p < cutoff)
        .map(|(snp, _)| VariantId(snp.to_string()))
        .collect();

    tracing::info!(
        failed = failed.len(),
        population = table.len(),
        cutoff,
        "Hardy-Weinberg check"
    );

    let figure = Figure::new(
        format!("HWE exact-test p-values (< {cutoff} removed)"),
        "p-value",
        "Number of variants",
        FigureData::Histogram {
            values: p_values,
            bins: HISTOGRAM_BINS,
            cutoff: Some(cutoff),
        },
    )?;

    Ok(ReportOutcome {
        population: table.len(),
        failed,
        figure,
    })
}

/// Bar chart of per-criterion failure counts with the union total in the
/// caption, for the end-of-axis summary page.
pub fn failure_summary_figure(
    axis: &str,
    counts: &[(String, usize)],
    total_unique: usize,
    population: usize,
) -> Result<Figure, FigureError> {
    Figure::new(
        format!("{axis} failing QC checks (total: {total_unique}/{population})"),
        "QC criterion",
        format!("Number of {}", axis.to_lowercase()),
        FigureData::Bar {
            categories: counts.iter().map(|(name, _)| name.clone()).collect(),
            counts: counts.iter().map(|(_, count)| *count).collect(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn sample_missingness_uses_inclusive_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let imiss = write(
            &dir,
            "run.imiss",
            "FID IID MISS_PHENO N_MISS N_GENO F_MISS\n\
             f1 i1 N 200 1000 0.2\n\
             f2 i2 N 199 1000 0.199\n\
             f3 i3 N 500 1000 0.5\n",
        );

        let outcome = sample_missingness(&imiss, 0.2).unwrap();
        assert_eq!(outcome.population, 3);
        assert_eq!(
            outcome.failed,
            vec![SampleId::new("f1", "i1"), SampleId::new("f3", "i3")]
        );
    }

    #[test]
    fn het_outlier_boundary_is_exclusive() {
        // Identical rates collapse the band to a point: every sample sits
        // exactly on mean +/- 3 sd and none may be flagged.
        let dir = tempfile::tempdir().unwrap();
        let mut rows = String::from("FID IID O(HOM) E(HOM) N(NM) F\n");
        for i in 0..10 {
            rows.push_str(&format!("f{i} i{i} 800 810 1000 0.01\n")); // rate 0.2
        }
        let het = write(&dir, "run.het", &rows);
        let failed_file = dir.path().join("het_failed.txt");

        let (outcome, bounds) = heterozygosity(&het, &failed_file).unwrap();
        assert_eq!(bounds.sd, 0.0);
        assert_eq!(bounds.lower, bounds.upper);
        assert!(outcome.failed.is_empty());

        // The exclusion file still exists (empty) for the next stage.
        assert!(failed_file.is_file());
    }

    #[test]
    fn het_flags_true_outlier() {
        let dir = tempfile::tempdir().unwrap();
        let mut rows = String::from("FID IID O(HOM) E(HOM) N(NM) F\n");
        for i in 0..20 {
            // rates tightly clustered: 0.200 +/- 0.001
            let hom = 800 - (i % 3);
            rows.push_str(&format!("f{i} i{i} {hom} 810 1000 0.01\n"));
        }
        rows.push_str("fx ix 500 810 1000 0.01\n"); // rate 0.5, far outside
        let het = write(&dir, "run.het", &rows);
        let failed_file = dir.path().join("het_failed.txt");

        let (outcome, _) = heterozygosity(&het, &failed_file).unwrap();
        assert_eq!(outcome.failed, vec![SampleId::new("fx", "ix")]);

        let written = fs::read_to_string(&failed_file).unwrap();
        assert_eq!(written.trim(), "fx ix");
    }

    #[test]
    fn relatedness_removes_higher_missingness_member() {
        let dir = tempfile::tempdir().unwrap();
        let imiss = write(
            &dir,
            "rel.imiss",
            "FID IID MISS_PHENO N_MISS N_GENO F_MISS\n\
             f1 i1 N 10 1000 0.01\n\
             f2 i2 N 30 1000 0.03\n",
        );
        let genome = write(
            &dir,
            "rel.genome",
            "FID1 IID1 FID2 IID2 RT EZ Z0 Z1 Z2 PI_HAT PHE DST PPC RATIO\n\
             f1 i1 f2 i2 OT 0 0.2 0.5 0.3 0.55 -1 0.97 1 2.1\n",
        );
        let removal = dir.path().join("related_low_call_rate.txt");

        let outcome = relatedness(&genome, &imiss, &removal).unwrap();
        assert_eq!(outcome.failed, vec![SampleId::new("f2", "i2")]);
    }

    #[test]
    fn sex_check_writes_discrepancy_file() {
        let dir = tempfile::tempdir().unwrap();
        let sexcheck = write(
            &dir,
            "run.sexcheck",
            "FID IID PEDSEX SNPSEX STATUS F\n\
             f1 i1 2 2 OK 0.01\n\
             f2 i2 1 2 PROBLEM 0.35\n",
        );
        let out = dir.path().join("sex_discrepancy.txt");

        let outcome = sex_check(&sexcheck, &out).unwrap();
        assert_eq!(outcome.failed, vec![SampleId::new("f2", "i2")]);
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "f2 i2");
    }

    #[test]
    fn hwe_and_maf_use_strict_less_than() {
        let dir = tempfile::tempdir().unwrap();
        let frq = write(
            &dir,
            "maf.frq",
            "CHR SNP A1 A2 MAF NCHROBS\n\
             1 rs1 A G 0.01 200\n\
             1 rs2 A G 0.005 200\n",
        );
        let hwe = write(
            &dir,
            "run.hwe",
            "CHR SNP TEST A1 A2 GENO O(HET) E(HET) P\n\
             1 rs1 ALL A G 1/2/3 0.1 0.1 1e-6\n\
             1 rs2 ALL A G 1/2/3 0.1 0.1 1e-7\n",
        );

        let maf_outcome = minor_allele_frequency(&frq, 0.01).unwrap();
        assert_eq!(maf_outcome.failed, vec![VariantId("rs2".into())]);

        let hwe_outcome = hardy_weinberg(&hwe, 1e-6).unwrap();
        assert_eq!(hwe_outcome.failed, vec![VariantId("rs2".into())]);
    }
}
