//! Dataset handles and the identifiers threaded between QC stages.
//!
//! A PLINK binary dataset is a triple of files sharing one prefix:
//! `<prefix>.bed` (genotype matrix), `<prefix>.bim` (variant metadata) and
//! `<prefix>.fam` (sample metadata). Stages never pass raw prefix strings
//! around; they exchange validated [`Dataset`] handles so a missing or
//! half-written triple is caught at stage entry rather than deep inside the
//! external tool.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

const TRIPLE_EXTENSIONS: [&str; 3] = ["bed", "bim", "fam"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset {prefix} is missing required file {missing}")]
    MissingFile { prefix: String, missing: PathBuf },
}

/// A validated handle to a PLINK binary dataset.
///
/// Handles are immutable: every filter stage produces a new handle with a
/// new prefix instead of mutating its input in place. The pipeline never
/// deletes the underlying files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    prefix: PathBuf,
}

impl Dataset {
    /// Open an existing dataset, verifying the `.bed`/`.bim`/`.fam` triple
    /// is present on disk.
    pub fn open<P: AsRef<Path>>(prefix: P) -> Result<Self, DatasetError> {
        let prefix = prefix.as_ref().to_path_buf();
        for ext in TRIPLE_EXTENSIONS {
            let path = append_extension(&prefix, ext);
            if !path.is_file() {
                return Err(DatasetError::MissingFile {
                    prefix: prefix.display().to_string(),
                    missing: path,
                });
            }
        }
        Ok(Self { prefix })
    }

    /// Wrap the output prefix of a just-finished external invocation,
    /// re-validating that the tool actually produced the triple.
    pub fn from_output_of<P: AsRef<Path>>(prefix: P) -> Result<Self, DatasetError> {
        Self::open(prefix)
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Path to a sibling file sharing this dataset's prefix, e.g. the
    /// `.imiss` report written next to the triple.
    pub fn sibling(&self, extension: &str) -> PathBuf {
        append_extension(&self.prefix, extension)
    }
}

/// Append `.extension` to a prefix without interpreting dots already in it.
///
/// `Path::with_extension` would turn `pihat_min0.2` into `pihat_min0.ext`;
/// report prefixes routinely contain threshold values, so extensions are
/// always appended.
pub fn append_extension(prefix: &Path, extension: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.prefix.display().fmt(f)
    }
}

/// Composite sample key: family ID plus within-family ID.
///
/// This is the join key across every per-sample report table the external
/// tool produces, and the two-column format of exclusion/inclusion id files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId {
    pub fid: String,
    pub iid: String,
}

impl SampleId {
    pub fn new(fid: impl Into<String>, iid: impl Into<String>) -> Self {
        Self {
            fid: fid.into(),
            iid: iid.into(),
        }
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.fid, self.iid)
    }
}

/// Variant identifier as reported in `.bim` files and report tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(pub String);

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
