//! 命令行参数.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use mni_berry::extract::ExtractorKind;
use mni_berry::locate::DerivativeMode;
use mni_berry::resample::ResamplerKind;

/// 检查 fMRIPrep BOLD 衍生物在 MNI152NLin2009cAsym 空间中与标准脑掩模的一致性.
#[derive(Debug, Parser)]
#[command(name = "boldqc", version)]
pub struct Cli {
    /// 研究编号, 如 `ds000001`.
    #[arg(long = "openneuro-study", alias = "openneuro_study")]
    pub study: String,

    /// fMRIPrep 衍生物目录.
    #[arg(long = "derivs-path", alias = "derivs_path")]
    pub derivs: PathBuf,

    /// 含 `tpl-MNI152NLin2009cAsym_res-02_desc-brain_mask.nii.gz` 的目录.
    /// 缺省时依次尝试 `$MNI_MASK_DIR` 与 `$HOME/dataset/templateflow/tpl-MNI152NLin2009cAsym`.
    #[arg(long = "mask-dir", alias = "mask_dir")]
    pub mask_dir: Option<PathBuf>,

    /// 衍生物类型: `minimal` 或 `nonminimal`.
    #[arg(long = "deriv-type", alias = "deriv_type")]
    pub mode: DerivativeMode,

    /// 结果目录.
    #[arg(long)]
    pub outdir: PathBuf,

    /// 临时文件目录.
    #[arg(long)]
    pub tmpdir: PathBuf,

    /// 并行单元数 (0 = 全部核心).
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// 外部进程时限 (秒).
    #[arg(long = "timeout-secs", default_value_t = 600)]
    pub timeout_secs: u64,

    /// 重采样后端: `auto`, `native` 或 `ants`.
    /// `auto` 把含 `.h5` 复合变换的链交给 ANTs, 其余在进程内完成.
    #[arg(long, default_value = "auto")]
    pub resampler: ResamplerKind,

    /// `antsApplyTransforms` 可执行文件.
    #[arg(long = "ants-program", default_value = "antsApplyTransforms")]
    pub ants_program: String,

    /// 脑提取后端: `native` 或 `afni`.
    #[arg(long, default_value = "native")]
    pub extractor: ExtractorKind,

    /// 日志级别.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: LevelFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underscore_aliases() {
        let cli = Cli::try_parse_from([
            "boldqc",
            "--openneuro_study",
            "ds000001",
            "--derivs_path",
            "/d",
            "--deriv_type",
            "nonminimal",
            "--outdir",
            "/o",
            "--tmpdir",
            "/t",
        ])
        .unwrap();
        assert_eq!(cli.study, "ds000001");
        assert_eq!(cli.mode, DerivativeMode::Nonminimal);
        assert!(cli.mask_dir.is_none());
        assert_eq!(cli.resampler, ResamplerKind::Auto);
        assert_eq!(cli.ants_program, "antsApplyTransforms");
        assert_eq!(cli.log_level, LevelFilter::Info);
    }

    #[test]
    fn test_backends_and_bad_mode() {
        let cli = Cli::try_parse_from([
            "boldqc",
            "--openneuro-study",
            "ds1",
            "--derivs-path",
            "/d",
            "--mask-dir",
            "/m",
            "--deriv-type",
            "minimal",
            "--outdir",
            "/o",
            "--tmpdir",
            "/t",
            "--resampler",
            "ants",
            "--extractor",
            "afni",
            "--workers",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.resampler, ResamplerKind::Ants);
        assert_eq!(cli.extractor, ExtractorKind::Afni);
        assert_eq!(cli.workers, 3);

        let bad = Cli::try_parse_from([
            "boldqc",
            "--openneuro-study",
            "ds1",
            "--derivs-path",
            "/d",
            "--deriv-type",
            "partial",
            "--outdir",
            "/o",
            "--tmpdir",
            "/t",
        ]);
        assert!(bad.is_err());
    }
}
