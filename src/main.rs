use anyhow::Result;

fn main() -> Result<()> {
    plink_qc::cli::run()
}
