//! Case/control phenotype annotation and association tests on a QC'd
//! dataset.
//!
//! Phenotypes follow the external tool's convention: 1 = control, 2 = case,
//! -9/0 = missing. The annotation path hands the tool a case-id list and
//! lets it assign 2 to listed samples and 1 to everyone else.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::dataset::{append_extension, Dataset, SampleId};
use crate::plink::{PlinkOp, PlinkRunner};

/// Read a comma-separated id list (one cohort export format), skipping
/// empty entries.
pub fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        for raw in line.split(',') {
            let id = raw.trim();
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
    }
    Ok(ids)
}

/// Write the two-column case list consumed by phenotype annotation. Cohort
/// exports carry a single id per individual, used as both family and
/// within-family id.
pub fn write_case_list(ids: &[String], out: &Path) -> Result<Vec<SampleId>> {
    let mut file =
        File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut samples = Vec::with_capacity(ids.len());
    for id in ids {
        writeln!(file, "{id} {id}")?;
        samples.push(SampleId::new(id.clone(), id.clone()));
    }
    Ok(samples)
}

/// Annotate case/control phenotypes: listed samples become cases (2),
/// everyone else a control (1).
pub fn annotate_phenotypes(
    runner: &PlinkRunner,
    input: &Dataset,
    case_list: &Path,
    out_prefix: &Path,
) -> Result<Dataset> {
    runner
        .make_bed(input, &[PlinkOp::MakePheno(case_list.to_path_buf())], out_prefix)
        .context("phenotype annotation failed")
}

/// Which association test to run against the annotated dataset.
#[derive(Debug, Clone)]
pub enum AssociationTest {
    /// 1-df chi-squared allelic test, optionally with multiple-testing
    /// adjustment.
    Allelic { adjust: bool },
    /// Linear regression with an optional covariate file.
    Linear { covariates: Option<PathBuf> },
    /// Logistic regression with an optional covariate file.
    Logistic { covariates: Option<PathBuf> },
}

/// Run an association test; returns the path of the tool's result table.
pub fn run_association(
    runner: &PlinkRunner,
    input: &Dataset,
    test: &AssociationTest,
    out_prefix: &Path,
) -> Result<PathBuf> {
    let (op, extension) = match test {
        AssociationTest::Allelic { adjust } => (PlinkOp::Assoc { adjust: *adjust }, "assoc"),
        AssociationTest::Linear { covariates } => (
            PlinkOp::Regression {
                logistic: false,
                covariates: covariates.clone(),
            },
            "assoc.linear",
        ),
        AssociationTest::Logistic { covariates } => (
            PlinkOp::Regression {
                logistic: true,
                covariates: covariates.clone(),
            },
            "assoc.logistic",
        ),
    };

    runner
        .report(input, &[op], out_prefix)
        .context("association test failed")?;
    Ok(append_extension(out_prefix, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn id_list_skips_empty_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "1001,1002,,1003,").unwrap();

        let ids = read_id_list(&path).unwrap();
        assert_eq!(ids, vec!["1001", "1002", "1003"]);
    }

    #[test]
    fn case_list_duplicates_id_across_both_columns() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cases.txt");

        let samples =
            write_case_list(&["1001".to_string(), "1002".to_string()], &out).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(fs::read_to_string(&out).unwrap(), "1001 1001\n1002 1002\n");
    }
}
