//! 程序运行函数.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use mni_berry::config::QcConfig;
use mni_berry::pipeline::run_batch;
use utils::loader;

use crate::cli::Cli;
use crate::result::RunReport;

/// 由命令行参数构造配置. 路径不合法时在处理任何单元前失败.
pub fn config_from(cli: &Cli) -> Result<QcConfig> {
    let mask_dir = loader::resolve_mask_dir(cli.mask_dir.as_deref())
        .context("no --mask-dir given and no home directory to fall back to")?;
    let config = QcConfig::new(
        cli.study.as_str(),
        &cli.derivs,
        mask_dir,
        &cli.outdir,
        &cli.tmpdir,
    )
    .context("invalid configuration")?
    .with_mode(cli.mode)
    .with_workers(utils::workers_or_cpus(cli.workers))
    .with_timeout(Duration::from_secs(cli.timeout_secs))
    .with_resampler(cli.resampler)
    .with_ants_program(cli.ants_program.as_str())
    .with_extractor(cli.extractor);
    Ok(config)
}

/// 实际运行.
pub fn run(cli: &Cli) -> Result<RunReport> {
    let config = config_from(cli)?;
    info!(
        "Checking study {} ({} derivatives) under {}",
        config.study(),
        config.mode(),
        config.derivs().display()
    );

    let started = Instant::now();
    let summary = run_batch(&config)
        .with_context(|| format!("batch for study {} failed", config.study()))?;

    Ok(RunReport {
        study: config.study().to_owned(),
        output: config.output_path(),
        summary,
        elapsed: started.elapsed(),
    })
}
