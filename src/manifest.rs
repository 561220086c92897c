//! Failure-set aggregation and the persisted failure manifests.
//!
//! Each QC axis (samples or variants) accumulates an ordered list of
//! per-criterion failing-id lists. The aggregate total is the size of the
//! set union, so an id failing several criteria is counted once. Criteria
//! with zero failures stay in the manifest with an empty list.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs::File;
use std::hash::Hash;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Ordered mapping from criterion name to the identifiers that failed it.
///
/// `I` is [`crate::dataset::SampleId`] on the sample axis and
/// [`crate::dataset::VariantId`] on the variant axis; the two are never
/// mixed within one set.
#[derive(Debug, Clone, Default)]
pub struct FailureSet<I> {
    entries: Vec<(String, Vec<I>)>,
}

impl<I> FailureSet<I>
where
    I: Clone + Ord + Hash + Display,
{
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record the failures for one criterion. Criteria are reported in
    /// insertion order; an empty id list is kept, not dropped.
    pub fn record(&mut self, criterion: impl Into<String>, ids: Vec<I>) {
        self.entries.push((criterion.into(), ids));
    }

    pub fn criteria(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn ids_for(&self, criterion: &str) -> Option<&[I]> {
        self.entries
            .iter()
            .find(|(name, _)| name == criterion)
            .map(|(_, ids)| ids.as_slice())
    }

    /// Per-criterion failure counts in insertion order.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.entries
            .iter()
            .map(|(name, ids)| (name.clone(), ids.len()))
            .collect()
    }

    /// Deduplicated union of all failing ids across criteria.
    pub fn union(&self) -> BTreeSet<I> {
        self.entries
            .iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Number of distinct ids that failed at least one criterion.
    pub fn total_unique(&self) -> usize {
        self.union().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, ids)| ids.is_empty())
    }
}

/// The aggregated result of one QC axis, plus where its manifests landed.
#[derive(Debug)]
pub struct Manifest {
    pub total_unique: usize,
    pub population: usize,
    pub human_readable: PathBuf,
    pub machine_readable: PathBuf,
}

/// Aggregate the failure sets for one axis and persist the dual-format
/// manifest: `<stem>_hr.csv` with one `criterion: [ids...]` line per
/// criterion, and `<stem>_pr.csv` with one row per criterion
/// (`criterion,n_failed,ids` with ids `;`-separated).
pub fn aggregate<I>(
    failures: &FailureSet<I>,
    population: usize,
    stem: &Path,
) -> io::Result<Manifest>
where
    I: Clone + Ord + Hash + Display,
{
    let human_readable = manifest_path(stem, "_hr.csv");
    let machine_readable = manifest_path(stem, "_pr.csv");

    let mut hr = File::create(&human_readable)?;
    for (criterion, ids) in &failures.entries {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(hr, "{criterion}: [{joined}]")?;
    }

    let mut pr = File::create(&machine_readable)?;
    writeln!(pr, "criterion,n_failed,ids")?;
    for (criterion, ids) in &failures.entries {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(";");
        writeln!(pr, "{criterion},{},{joined}", ids.len())?;
    }

    let total_unique = failures.total_unique();
    tracing::info!(
        total = total_unique,
        population,
        hr = %human_readable.display(),
        "aggregated QC failures"
    );

    Ok(Manifest {
        total_unique,
        population,
        human_readable,
        machine_readable,
    })
}

fn manifest_path(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    stem.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::VariantId;

    fn ids(names: &[&str]) -> Vec<VariantId> {
        names.iter().map(|n| VariantId(n.to_string())).collect()
    }

    #[test]
    fn union_counts_shared_ids_once() {
        let mut failures = FailureSet::new();
        failures.record("missing", ids(&["A", "B"]));
        failures.record("hwe", ids(&["B", "C"]));

        assert_eq!(failures.total_unique(), 3);
        assert_eq!(failures.counts(), vec![("missing".into(), 2), ("hwe".into(), 2)]);
    }

    #[test]
    fn manifest_keeps_empty_criteria() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("failed_snp_ids");

        let mut failures = FailureSet::new();
        failures.record("missing", ids(&["rs1"]));
        failures.record("maf", ids(&[]));

        let manifest = aggregate(&failures, 100, &stem).unwrap();
        assert_eq!(manifest.total_unique, 1);

        let hr = std::fs::read_to_string(&manifest.human_readable).unwrap();
        assert!(hr.contains("missing: [rs1]"));
        assert!(hr.contains("maf: []"));

        let pr = std::fs::read_to_string(&manifest.machine_readable).unwrap();
        assert!(pr.contains("maf,0,"));
    }

    #[test]
    fn manifest_files_use_stem_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("failed_sample_ids");
        let failures: FailureSet<VariantId> = FailureSet::new();

        let manifest = aggregate(&failures, 10, &stem).unwrap();
        assert!(manifest
            .human_readable
            .to_string_lossy()
            .ends_with("failed_sample_ids_hr.csv"));
        assert!(manifest
            .machine_readable
            .to_string_lossy()
            .ends_with("failed_sample_ids_pr.csv"));
    }
}
