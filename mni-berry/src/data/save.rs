//! 体数据的持久化存储.

use std::path::Path;

use nifti::writer::WriterOptions;
use nifti::NiftiError;

use crate::data::{BinaryMask, GridAttr, SpatialVolume};

/// 表明一个可以按原样保存为 nifti (`.nii` 或 `.nii.gz`) 的体数据.
///
/// 仿射写入 sform; 是否压缩由扩展名决定.
pub trait VolumeWrite {
    /// 将体数据保存到 `path`.
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NiftiError>;
}

impl VolumeWrite for SpatialVolume {
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NiftiError> {
        let header = self.grid().to_header();
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data())
    }
}

impl VolumeWrite for BinaryMask {
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NiftiError> {
        let header = self.grid().to_header();
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data())
    }
}
