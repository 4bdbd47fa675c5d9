use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use tempfile::TempDir;

use super::{Interpolation, Resampler};
use crate::data::{SpatialVolume, VolumeWrite, VoxelGrid};
use crate::error::{QcError, QcResult};
use crate::external::ExternalTool;
use crate::transform::{TransformChain, TransformStep};

/// 默认可执行文件名.
pub const ANTS_APPLY_TRANSFORMS: &str = "antsApplyTransforms";

/// 调用 `antsApplyTransforms` 的重采样器.
///
/// 每次调用都在一个临时目录中写入输入、参考网格和内存中的变换,
/// 目录在任何返回路径上都会被删除.
#[derive(Clone, Debug)]
pub struct AntsResampler {
    tool: ExternalTool,
    scratch: Option<PathBuf>,
}

impl AntsResampler {
    /// 使用 `PATH` 中的 `antsApplyTransforms`, 每次调用限时 `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            tool: ExternalTool::new(ANTS_APPLY_TRANSFORMS, timeout),
            scratch: None,
        }
    }

    /// 指定可执行文件.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.tool = ExternalTool::new(program, self.tool.timeout());
        self
    }

    /// 临时目录创建在 `dir` 中, 而不是系统默认位置.
    pub fn with_scratch<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch = Some(dir.into());
        self
    }

    fn scratch_dir(&self) -> QcResult<TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("ants-");
            b
        };
        let dir = match &self.scratch {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| QcError::transform(format!("cannot create scratch directory: {e}")))
    }

    /// 把变换链展开为 `--transform` 参数. ANTs 对点先应用最后列出的变换,
    /// 所以按图像方向的逆序列出.
    fn transform_args(chain: &TransformChain, dir: &Path) -> QcResult<Vec<OsString>> {
        let mut args = Vec::with_capacity(2 * chain.len());
        for (idx, step) in chain.steps().iter().enumerate().rev() {
            let path = match step {
                TransformStep::File(path) => {
                    if !path.is_file() {
                        return Err(QcError::transform(format!(
                            "transform file {} does not exist",
                            path.display()
                        )));
                    }
                    path.clone()
                }
                TransformStep::Affine(t) => {
                    let path = dir.join(format!("step{idx}_affine.txt"));
                    t.write_itk(&path)
                        .map_err(|e| QcError::transform(e.to_string()))?;
                    path
                }
                TransformStep::Field(f) => {
                    let path = dir.join(format!("step{idx}_warp.nii.gz"));
                    f.save(&path)
                        .map_err(|e| QcError::transform(e.to_string()))?;
                    path
                }
            };
            args.push("--transform".into());
            args.push(path.into_os_string());
        }
        if args.is_empty() {
            args.push("--transform".into());
            args.push("identity".into());
        }
        Ok(args)
    }
}

impl Resampler for AntsResampler {
    fn name(&self) -> &'static str {
        "ants"
    }

    fn resample(
        &self,
        moving: &SpatialVolume,
        chain: &TransformChain,
        target: &VoxelGrid,
        interpolation: Interpolation,
    ) -> QcResult<SpatialVolume> {
        let dir = self.scratch_dir()?;
        let input = dir.path().join("moving.nii.gz");
        let reference = dir.path().join("reference.nii.gz");
        let output = dir.path().join("resampled.nii.gz");

        let write_err = |e: nifti::NiftiError| QcError::transform(e.to_string());
        moving.save(&input).map_err(write_err)?;
        SpatialVolume::from_fn(*target, |_| 0.0)
            .save(&reference)
            .map_err(write_err)?;

        let mut args: Vec<OsString> = vec![
            "--dimensionality".into(),
            "3".into(),
            "--default-value".into(),
            "0".into(),
            "--float".into(),
            "1".into(),
            "--input".into(),
            input.into_os_string(),
            "--reference-image".into(),
            reference.into_os_string(),
            "--output".into(),
            output.clone().into_os_string(),
            "--interpolation".into(),
            interpolation.ants_name().into(),
        ];
        args.extend(Self::transform_args(chain, dir.path())?);

        debug!("antsApplyTransforms through {chain} ({interpolation})");
        self.tool
            .run(&args, dir.path())
            .map_err(|e| QcError::transform(e.to_string()))?;

        let out = SpatialVolume::open(&output).map_err(|e| {
            QcError::transform(format!("cannot read antsApplyTransforms output: {e}"))
        })?;
        // 输出头部经 f32 往返, 统一回目标网格.
        SpatialVolume::new(*target, out.into_raw())
            .map_err(|e| QcError::transform(e.to_string()))
    }
}
