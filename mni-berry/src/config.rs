//! 运行配置.
//!
//! [`QcConfig`] 在构造时校验路径; 之后不可变, 显式传给流水线.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QcError, QcResult};
use crate::extract::{AfniExtractor, Extractor, ExtractorKind, NativeExtractor};
use crate::locate::DerivativeMode;
use crate::resample::{
    AntsResampler, AutoResampler, NativeResampler, Resampler, ResamplerKind, ANTS_APPLY_TRANSFORMS,
};
use crate::templates::reference_mask_in;

/// 外部进程默认时限.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// 一次质量检查运行的配置.
#[derive(Debug, Clone)]
pub struct QcConfig {
    study: String,
    derivs: PathBuf,
    mask_dir: PathBuf,
    out_dir: PathBuf,
    tmp_dir: PathBuf,
    mode: DerivativeMode,
    workers: usize,
    timeout: Duration,
    resampler: ResamplerKind,
    ants_program: String,
    extractor: ExtractorKind,
}

fn require_dir(what: &str, path: &Path) -> QcResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(QcError::configuration(format!(
            "{what} {} is not an existing directory",
            path.display()
        )))
    }
}

impl QcConfig {
    /// 创建配置并校验输入路径.
    ///
    /// - `study`: 研究编号, 用于输出文件名与临时目录, 不能为空或含路径分隔符;
    /// - `derivs`: fMRIPrep 衍生物目录, 必须存在;
    /// - `mask_dir`: 含 `tpl-MNI152NLin2009cAsym_res-02_desc-brain_mask.nii.gz` 的目录;
    /// - `out_dir`, `tmp_dir`: 结果与临时文件目录, 不存在时由 [`QcConfig::prepare`] 创建.
    pub fn new<S, P1, P2, P3, P4>(
        study: S,
        derivs: P1,
        mask_dir: P2,
        out_dir: P3,
        tmp_dir: P4,
    ) -> QcResult<Self>
    where
        S: Into<String>,
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
        P3: Into<PathBuf>,
        P4: Into<PathBuf>,
    {
        let study = study.into();
        if study.is_empty() || study.contains(['/', '\\']) || study == "." || study == ".." {
            return Err(QcError::configuration(format!(
                "invalid study identifier `{study}`"
            )));
        }
        let cfg = Self {
            study,
            derivs: derivs.into(),
            mask_dir: mask_dir.into(),
            out_dir: out_dir.into(),
            tmp_dir: tmp_dir.into(),
            mode: DerivativeMode::default(),
            workers: default_workers(),
            timeout: DEFAULT_TIMEOUT,
            resampler: ResamplerKind::default(),
            ants_program: ANTS_APPLY_TRANSFORMS.to_owned(),
            extractor: ExtractorKind::default(),
        };
        require_dir("derivatives path", &cfg.derivs)?;
        require_dir("mask directory", &cfg.mask_dir)?;
        let mask = cfg.reference_mask_path();
        if !mask.is_file() {
            return Err(QcError::configuration(format!(
                "reference mask {} does not exist",
                mask.display()
            )));
        }
        for (what, p) in [("output directory", &cfg.out_dir), ("scratch directory", &cfg.tmp_dir)] {
            if p.exists() && !p.is_dir() {
                return Err(QcError::configuration(format!(
                    "{what} {} is not a directory",
                    p.display()
                )));
            }
        }
        Ok(cfg)
    }

    /// 设置衍生物类型.
    pub fn with_mode(mut self, mode: DerivativeMode) -> Self {
        self.mode = mode;
        self
    }

    /// 设置并行单元数. `0` 表示使用全部可用核心.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 { default_workers() } else { workers };
        self
    }

    /// 设置外部进程时限.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 选择重采样后端.
    pub fn with_resampler(mut self, kind: ResamplerKind) -> Self {
        self.resampler = kind;
        self
    }

    /// 指定 `antsApplyTransforms` 可执行文件, 默认在 `PATH` 中查找.
    pub fn with_ants_program(mut self, program: impl Into<String>) -> Self {
        self.ants_program = program.into();
        self
    }

    /// 选择脑提取后端.
    pub fn with_extractor(mut self, kind: ExtractorKind) -> Self {
        self.extractor = kind;
        self
    }

    /// 研究编号.
    #[inline]
    pub fn study(&self) -> &str {
        &self.study
    }

    /// 衍生物目录.
    #[inline]
    pub fn derivs(&self) -> &Path {
        &self.derivs
    }

    /// 衍生物类型.
    #[inline]
    pub fn mode(&self) -> DerivativeMode {
        self.mode
    }

    /// 并行单元数.
    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 外部进程时限.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 参考掩模路径.
    #[inline]
    pub fn reference_mask_path(&self) -> PathBuf {
        reference_mask_in(&self.mask_dir)
    }

    /// 结果文件 `<outdir>/study-<id>_check-bold_fmriprep-<mode>.tsv`.
    pub fn output_path(&self) -> PathBuf {
        self.out_dir.join(format!(
            "study-{}_check-bold_fmriprep-{}.tsv",
            self.study, self.mode
        ))
    }

    /// 本研究的临时目录 `<tmpdir>/<study>`.
    #[inline]
    pub fn scratch_dir(&self) -> PathBuf {
        self.tmp_dir.join(&self.study)
    }

    /// 创建输出目录与临时目录.
    pub fn prepare(&self) -> QcResult<()> {
        for dir in [self.out_dir.clone(), self.scratch_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                QcError::configuration(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// 按配置构造重采样器. 外部后端的临时文件放在 [`QcConfig::scratch_dir`] 下.
    pub fn build_resampler(&self) -> Box<dyn Resampler> {
        match self.resampler {
            ResamplerKind::Auto => Box::new(AutoResampler::new(self.ants())),
            ResamplerKind::Native => Box::new(NativeResampler::new()),
            ResamplerKind::Ants => Box::new(self.ants()),
        }
    }

    fn ants(&self) -> AntsResampler {
        AntsResampler::new(self.timeout)
            .with_program(self.ants_program.as_str())
            .with_scratch(self.scratch_dir())
    }

    /// 按配置构造脑提取器.
    pub fn build_extractor(&self) -> Box<dyn Extractor> {
        match self.extractor {
            ExtractorKind::Native => Box::new(NativeExtractor::new()),
            ExtractorKind::Afni => {
                Box::new(AfniExtractor::new(self.timeout).with_scratch(self.scratch_dir()))
            }
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}
