//! End-to-end pipeline tests against a scripted stand-in for the external
//! PLINK binary. The script copies canned report tables into place for each
//! requested operation and fabricates output triples for `--make-bed`, so
//! the full stage sequencing, classification and aggregation logic runs
//! exactly as it would against the real tool.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use plink_qc::pipeline::{self, QcAxis, QcConfig};

const IMISS: &str = "\
 FID  IID MISS_PHENO N_MISS N_GENO F_MISS
 f01  i01          N     10   1000   0.01
 f02  i02          N     30   1000   0.03
 f03  i03          N     20   1000   0.02
 f04  i04          N     20   1000   0.02
 f05  i05          N    500   1000    0.5
 f06  i06          N     20   1000   0.02
 f07  i07          N     20   1000   0.02
 f08  i08          N     20   1000   0.02
 f09  i09          N     20   1000   0.02
 f10  i10          N     20   1000   0.02
 f11  i11          N     20   1000   0.02
 f12  i12          N     20   1000   0.02
";

const LMISS: &str = "\
 CHR  SNP N_MISS N_GENO F_MISS
   1  rs1      1     12  0.083
   1  rs2      0     12      0
   1  rs3      0     12      0
   2  rs4      6     12    0.5
   2  rs5      1     12  0.083
";

const SEXCHECK: &str = "\
 FID  IID PEDSEX SNPSEX STATUS      F
 f01  i01      2      2     OK  0.011
 f02  i02      1      1     OK  0.912
 f03  i03      2      2     OK  0.031
 f04  i04      1      2 PROBLEM  0.150
 f05  i05      2      2     OK  0.020
 f06  i06      1      1     OK  0.950
 f07  i07      2      2     OK  0.010
 f08  i08      1      1     OK  0.930
 f09  i09      2      2     OK  0.015
 f10  i10      1      1     OK  0.910
 f11  i11      2      2     OK  0.012
 f12  i12      1      1     OK  0.920
";

// Eleven samples at het rate 0.2 and one at 0.5; with the n-1 standard
// deviation the extreme sample sits just above mean + 3 sd.
const HET: &str = "\
 FID  IID O(HOM) E(HOM)  N(NM)      F
 f01  i01    800    810   1000  0.010
 f02  i02    800    810   1000  0.010
 f03  i03    800    810   1000  0.010
 f04  i04    800    810   1000  0.010
 f05  i05    800    810   1000  0.010
 f06  i06    800    810   1000  0.010
 f07  i07    800    810   1000  0.010
 f08  i08    800    810   1000  0.010
 f09  i09    800    810   1000  0.010
 f10  i10    800    810   1000  0.010
 f11  i11    800    810   1000  0.010
 f12  i12    500    810   1000  0.010
";

const GENOME: &str = "\
 FID1 IID1 FID2 IID2 RT EZ   Z0   Z1   Z2 PI_HAT PHE  DST  PPC RATIO
  f01  i01  f02  i02 OT  0 0.15  0.60 0.25   0.55  -1 0.97 1.00  2.10
";

const FRQ: &str = "\
 CHR  SNP A1 A2    MAF NCHROBS
   1  rs1  A  G  0.100      24
   1  rs2  C  T  0.200      24
   1  rs3  A  C  0.005      24
   2  rs4  G  T  0.150      24
   2  rs5  A  G  0.010      24
";

const HWE: &str = "\
 CHR  SNP TEST A1 A2   GENO O(HET) E(HET)     P
   1  rs1  ALL  A  G 1/4/7  0.333  0.300   1.0
   1  rs2  ALL  C  T 2/4/6  0.333  0.320  1e-7
   1  rs3  ALL  A  C 1/5/6  0.416  0.400   0.8
   2  rs4  ALL  G  T 1/4/7  0.333  0.310   0.5
   2  rs5  ALL  A  G 1/4/7  0.333  0.330   1.0
";

const PRUNE_IN: &str = "rs1\nrs2\nrs3\n";

struct Fixture {
    dir: tempfile::TempDir,
    bfile: PathBuf,
    plink: PathBuf,
}

/// Lay out the input triple, the canned report tables and the fake tool
/// script. `fail_hook` is spliced into the script before any output is
/// produced, e.g. to make one operation exit non-zero.
fn fixture(fail_hook: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let fixtures = dir.path().join("fixtures");
    fs::create_dir(&fixtures).unwrap();

    for (name, contents) in [
        ("fix.imiss", IMISS),
        ("fix.lmiss", LMISS),
        ("fix.sexcheck", SEXCHECK),
        ("fix.het", HET),
        ("fix.genome", GENOME),
        ("fix.frq", FRQ),
        ("fix.hwe", HWE),
        ("fix.prune.in", PRUNE_IN),
    ] {
        fs::write(fixtures.join(name), contents).unwrap();
    }

    let bfile = dir.path().join("cohort");
    fs::write(bfile.with_extension("bed"), b"\x6c\x1b\x01").unwrap();
    fs::write(
        bfile.with_extension("bim"),
        "1\trs1\t0\t100\tA\tG\n1\trs2\t0\t200\tC\tT\n1\trs3\t0\t300\tA\tC\n\
         2\trs4\t0\t400\tG\tT\n2\trs5\t0\t500\tA\tG\n",
    )
    .unwrap();
    let fam: String = (1..=12)
        .map(|i| format!("f{i:02} i{i:02} 0 0 1 -9\n"))
        .collect();
    fs::write(bfile.with_extension("fam"), fam).unwrap();

    let plink = dir.path().join("plink");
    let script = format!(
        r#"#!/bin/sh
FIX="{fix}"
out=""; bfile=""; make_bed=0; ops=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
    --bfile) bfile="$2"; shift ;;
    --make-bed) make_bed=1 ;;
    --missing) ops="$ops missing" ;;
    --check-sex) ops="$ops sexcheck" ;;
    --het) ops="$ops het" ;;
    --genome) ops="$ops genome" ;;
    --freq) ops="$ops freq" ;;
    --hardy) ops="$ops hardy" ;;
    --indep|--indep-pairwise) ops="$ops prune" ;;
  esac
  shift
done
{fail_hook}
for op in $ops; do
  case "$op" in
    missing) cp "$FIX/fix.imiss" "$out.imiss"; cp "$FIX/fix.lmiss" "$out.lmiss" ;;
    sexcheck) cp "$FIX/fix.sexcheck" "$out.sexcheck" ;;
    het) cp "$FIX/fix.het" "$out.het" ;;
    genome) cp "$FIX/fix.genome" "$out.genome" ;;
    freq) cp "$FIX/fix.frq" "$out.frq" ;;
    hardy) cp "$FIX/fix.hwe" "$out.hwe" ;;
    prune) cp "$FIX/fix.prune.in" "$out.prune.in" ;;
  esac
done
if [ "$make_bed" = "1" ]; then
  cp "$bfile.bed" "$out.bed"; cp "$bfile.bim" "$out.bim"; cp "$bfile.fam" "$out.fam"
fi
exit 0
"#,
        fix = fixtures.display(),
        fail_hook = fail_hook,
    );
    fs::write(&plink, script).unwrap();
    fs::set_permissions(&plink, fs::Permissions::from_mode(0o755)).unwrap();

    Fixture { dir, bfile, plink }
}

fn config(fixture: &Fixture) -> QcConfig {
    let mut config = QcConfig::new(&fixture.bfile, fixture.dir.path().join("qc"));
    config.plink = fixture.plink.clone();
    config
}

#[test]
fn full_run_aggregates_both_axes() {
    let fixture = fixture("");
    let config = config(&fixture);

    let summary = pipeline::run(&config).unwrap();

    // Sample axis: f05 (missingness), f04 (sex), f12 (heterozygosity),
    // f02 (relatedness, worse-genotyped member of the f01/f02 pair).
    let samples = summary.samples.as_ref().unwrap();
    assert_eq!(samples.total_failed, 4);
    assert_eq!(samples.population, 12);

    // Variant axis: rs4 (missingness), rs3 (MAF), rs2 (HWE).
    let variants = summary.variants.as_ref().unwrap();
    assert_eq!(variants.total_failed, 3);
    assert_eq!(variants.population, 5);

    let work = fixture.dir.path().join("qc");
    let sample_hr = fs::read_to_string(work.join("failed_sample_ids_hr.csv")).unwrap();
    assert!(sample_hr.contains("missingness: [f05 i05]"));
    assert!(sample_hr.contains("sex_discrepancy: [f04 i04]"));
    assert!(sample_hr.contains("heterozygosity: [f12 i12]"));
    assert!(sample_hr.contains("relatedness: [f02 i02]"));

    let variant_pr = fs::read_to_string(work.join("failed_snp_ids_pr.csv")).unwrap();
    assert!(variant_pr.contains("missingness,1,rs4"));
    assert!(variant_pr.contains("maf,1,rs3"));
    assert!(variant_pr.contains("hwe,1,rs2"));

    assert!(work.join("samples_qc_report.html").is_file());
    assert!(work.join("variants_qc_report.html").is_file());
    assert!(work.join("qc_run_summary.json").is_file());

    // The exclusion files handed between stages use the two-column format.
    assert_eq!(
        fs::read_to_string(work.join("sex_discrepancy.txt")).unwrap().trim(),
        "f04 i04"
    );
    assert_eq!(
        fs::read_to_string(work.join("related_low_call_rate.txt"))
            .unwrap()
            .trim(),
        "f02 i02"
    );
}

#[test]
fn input_triple_is_never_mutated() {
    let fixture = fixture("");
    let config = config(&fixture);
    let bim_before = fs::read_to_string(fixture.bfile.with_extension("bim")).unwrap();
    let fam_before = fs::read_to_string(fixture.bfile.with_extension("fam")).unwrap();

    pipeline::run(&config).unwrap();

    assert_eq!(
        fs::read_to_string(fixture.bfile.with_extension("bim")).unwrap(),
        bim_before
    );
    assert_eq!(
        fs::read_to_string(fixture.bfile.with_extension("fam")).unwrap(),
        fam_before
    );
}

#[test]
fn samples_only_skips_variant_axis() {
    let fixture = fixture("");
    let mut config = config(&fixture);
    config.axis = QcAxis::Samples;

    let summary = pipeline::run(&config).unwrap();
    assert!(summary.samples.is_some());
    assert!(summary.variants.is_none());
    assert!(!fixture
        .dir
        .path()
        .join("qc")
        .join("variants_qc_report.html")
        .exists());
}

#[test]
fn hwe_tool_failure_halts_before_variant_document() {
    let fixture = fixture(r#"case " $ops " in *" hardy "*) exit 3 ;; esac"#);
    let config = config(&fixture);

    let err = pipeline::run(&config).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("Hardy-Weinberg report failed"), "{chain}");

    let work = fixture.dir.path().join("qc");
    // The sample axis completed, the variant axis halted before its
    // document or the run summary could be written.
    assert!(work.join("samples_qc_report.html").is_file());
    assert!(!work.join("variants_qc_report.html").exists());
    assert!(!work.join("qc_run_summary.json").exists());
}

#[test]
fn keep_list_prefilter_runs_first() {
    let fixture = fixture("");
    let keep = fixture.dir.path().join("keep.txt");
    fs::write(&keep, "f01 i01\nf02 i02\n").unwrap();

    let mut config = config(&fixture);
    config.keep = Some(keep);

    pipeline::run(&config).unwrap();
    assert!(fixture
        .dir
        .path()
        .join("qc")
        .join("keep_filtered.bed")
        .is_file());
}
