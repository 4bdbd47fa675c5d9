//! 对 fMRIPrep BOLD 衍生物做 MNI 空间配准质量检查, 输出 TSV 结果表.

use clap::Parser;
use simple_logger::SimpleLogger;

mod cli;
mod result;
mod runner;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    SimpleLogger::new().with_level(cli.log_level).init()?;

    let report = runner::run(&cli)?;
    report.analyze()?;
    Ok(())
}
