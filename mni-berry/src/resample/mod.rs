//! 把体数据经变换链重采样到目标网格.
//!
//! 整条变换链对每个输出点复合后只插值一次, 不会逐步重采样.
//! 落在输入网格外的输出体素取 0.

use std::fmt;
use std::str::FromStr;

use crate::data::{BinaryMask, SpatialVolume, VoxelGrid};
use crate::error::QcResult;
use crate::transform::TransformChain;

mod ants;
mod auto;
pub mod interp;
mod native;

pub use ants::{AntsResampler, ANTS_APPLY_TRANSFORMS};
pub use auto::AutoResampler;
pub use native::NativeResampler;

/// 插值方式. 调用者必须显式说明意图.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Interpolation {
    /// 三线性, 用于连续值体数据.
    Linear,
    /// 最近邻, 用于掩模.
    NearestNeighbor,
}

impl Interpolation {
    /// ANTs 命令行中的名称.
    pub fn ants_name(self) -> &'static str {
        match self {
            Self::Linear => "Linear",
            Self::NearestNeighbor => "NearestNeighbor",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ants_name())
    }
}

/// 重采样器.
pub trait Resampler: Send + Sync {
    /// 简短名称, 用于日志.
    fn name(&self) -> &'static str;

    /// 把 `moving` 经 `chain` 重采样到 `target` 网格.
    ///
    /// 变换缺失、不可读、格式错误或不被该重采样器支持时返回
    /// [`QcError::TransformApplication`](crate::QcError::TransformApplication).
    fn resample(
        &self,
        moving: &SpatialVolume,
        chain: &TransformChain,
        target: &VoxelGrid,
        interpolation: Interpolation,
    ) -> QcResult<SpatialVolume>;

    /// 以最近邻方式重采样掩模, 结果重新二值化.
    fn resample_mask(
        &self,
        mask: &BinaryMask,
        chain: &TransformChain,
        target: &VoxelGrid,
    ) -> QcResult<BinaryMask> {
        let vol = self.resample(
            &mask.to_volume(),
            chain,
            target,
            Interpolation::NearestNeighbor,
        )?;
        Ok(vol.threshold(|v| v > 0.5))
    }
}

/// 可选的重采样后端.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ResamplerKind {
    /// 含 HDF5 复合变换的链交给 ANTs, 其余在进程内完成.
    #[default]
    Auto,
    /// 进程内实现 (ITK 文本仿射 + 位移场).
    Native,
    /// 调用 `antsApplyTransforms`.
    Ants,
}

impl FromStr for ResamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "ants" => Ok(Self::Ants),
            other => Err(format!("unknown resampler `{other}` (expected auto|native|ants)")),
        }
    }
}
