//! 脑提取: 由连续值体数据得到同网格的脑掩模.

use std::str::FromStr;

use crate::data::{BinaryMask, SpatialVolume};
use crate::error::QcResult;

mod afni;
mod native;
mod smooth;

pub use afni::AfniExtractor;
pub use native::NativeExtractor;

/// 脑提取器.
pub trait Extractor: Send + Sync {
    /// 简短名称, 用于日志.
    fn name(&self) -> &'static str;

    /// 提取脑掩模. 结果与输入位于同一网格.
    ///
    /// 输入退化 (全 0 或全为非有限值)、阈值估计不收敛、结果为空,
    /// 或外部进程失败/超时时返回 [`QcError::Extraction`](crate::QcError::Extraction).
    fn extract(&self, volume: &SpatialVolume) -> QcResult<BinaryMask>;
}

/// 可选的脑提取后端.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ExtractorKind {
    /// 进程内启发式实现.
    #[default]
    Native,
    /// 调用 AFNI `3dAutomask`.
    Afni,
}

impl FromStr for ExtractorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "afni" => Ok(Self::Afni),
            other => Err(format!("unknown extractor `{other}` (expected native|afni)")),
        }
    }
}
