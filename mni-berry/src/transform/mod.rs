//! 空间变换链.
//!
//! 每个变换都遵循 ITK 约定: 把 fixed (输出网格一侧) 的物理点映射到
//! moving (输入图像一侧) 的物理点. 变换链按 "图像方向" 保存,
//! 即 `[配准变换, 标准化变换]`; 对输出点做回拉时按相反顺序依次经过每一步.
//!
//! 库内部统一使用 RAS 物理坐标 (与 nifti 仿射一致),
//! 读入的 ITK/ANTs 文件 (LPS) 在解析时完成转换.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use nalgebra::Point3;

use crate::error::{QcError, QcResult};

pub mod affine;
pub mod displacement;

pub use affine::AffineTransform;
pub use displacement::DisplacementField;

/// 物理点映射.
pub trait PointMap {
    /// 把 fixed 一侧的 RAS 物理点映射到 moving 一侧.
    fn map_point(&self, p: &Point3<f64>) -> Point3<f64>;
}

/// 变换文件格式, 由扩展名判断.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransformFormat {
    /// ITK 文本仿射 (`.txt`, `.tfm`).
    ItkText,
    /// ANTs 位移场 (`.nii`, `.nii.gz`).
    DisplacementField,
    /// ITK HDF5 复合变换 (`.h5`). 仅外部重采样器支持.
    Hdf5,
}

impl TransformFormat {
    /// 根据文件名猜测格式. 不认识的扩展名返回 `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".txt") || name.ends_with(".tfm") {
            Some(Self::ItkText)
        } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Some(Self::DisplacementField)
        } else if name.ends_with(".h5") || name.ends_with(".hdf5") {
            Some(Self::Hdf5)
        } else {
            None
        }
    }
}

/// 变换链中的一步.
#[derive(Clone, Debug)]
pub enum TransformStep {
    /// 尚未读取的变换文件.
    File(PathBuf),
    /// 已在内存中的仿射.
    Affine(AffineTransform),
    /// 已在内存中的位移场.
    Field(Arc<DisplacementField>),
}

impl From<PathBuf> for TransformStep {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<AffineTransform> for TransformStep {
    fn from(t: AffineTransform) -> Self {
        Self::Affine(t)
    }
}

impl From<DisplacementField> for TransformStep {
    fn from(f: DisplacementField) -> Self {
        Self::Field(Arc::new(f))
    }
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Affine(_) => f.write_str("<affine>"),
            Self::Field(_) => f.write_str("<displacement field>"),
        }
    }
}

impl TransformStep {
    /// 读取 (如有必要) 并返回可直接映射点的形式.
    fn load(&self) -> QcResult<LoadedStep> {
        match self {
            Self::Affine(t) => Ok(LoadedStep::Affine(*t)),
            Self::Field(f) => Ok(LoadedStep::Field(Arc::clone(f))),
            Self::File(path) => {
                if !path.is_file() {
                    return Err(QcError::transform(format!(
                        "transform file {} does not exist",
                        path.display()
                    )));
                }
                debug!("Reading transform {}", path.display());
                match TransformFormat::from_path(path) {
                    Some(TransformFormat::ItkText) => {
                        Ok(LoadedStep::Affine(AffineTransform::read_itk(path)?))
                    }
                    Some(TransformFormat::DisplacementField) => {
                        Ok(LoadedStep::Field(Arc::new(DisplacementField::open(path)?)))
                    }
                    Some(TransformFormat::Hdf5) => Err(QcError::transform(format!(
                        "{}: HDF5 composite transforms can only be applied by the ANTs resampler",
                        path.display()
                    ))),
                    None => Err(QcError::transform(format!(
                        "{}: unrecognised transform format",
                        path.display()
                    ))),
                }
            }
        }
    }
}

/// 有序变换链. 顺序为图像方向: 先配准, 后标准化.
#[derive(Clone, Debug, Default)]
pub struct TransformChain {
    steps: Vec<TransformStep>,
}

impl TransformChain {
    /// 由若干步骤创建, `steps` 按图像方向排列.
    pub fn new<I, T>(steps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TransformStep>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// 恒等变换链 (不含任何步骤).
    #[inline]
    pub fn identity() -> Self {
        Self::default()
    }

    /// 在链尾追加一步.
    pub fn then<T: Into<TransformStep>>(mut self, step: T) -> Self {
        self.steps.push(step.into());
        self
    }

    /// 所有步骤, 按图像方向.
    #[inline]
    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// 步骤个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 是否为恒等链?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 是否含有只能交给外部工具应用的步骤 (HDF5 复合变换)?
    pub fn needs_external(&self) -> bool {
        self.steps.iter().any(|step| match step {
            TransformStep::File(path) => {
                TransformFormat::from_path(path) == Some(TransformFormat::Hdf5)
            }
            _ => false,
        })
    }

    /// 读取每一步, 返回可以直接回拉点的复合映射.
    pub fn load(&self) -> QcResult<LoadedChain> {
        let mut pull_order = self
            .steps
            .iter()
            .map(TransformStep::load)
            .collect::<QcResult<Vec<_>>>()?;
        pull_order.reverse();
        Ok(LoadedChain { pull_order })
    }
}

impl fmt::Display for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("identity");
        }
        let text = itertools::join(self.steps.iter(), " -> ");
        f.write_str(&text)
    }
}

#[derive(Clone, Debug)]
enum LoadedStep {
    Affine(AffineTransform),
    Field(Arc<DisplacementField>),
}

impl PointMap for LoadedStep {
    #[inline]
    fn map_point(&self, p: &Point3<f64>) -> Point3<f64> {
        match self {
            Self::Affine(t) => t.map_point(p),
            Self::Field(f) => f.map_point(p),
        }
    }
}

/// 已加载的变换链, 可在多线程间共享.
#[derive(Clone, Debug)]
pub struct LoadedChain {
    pull_order: Vec<LoadedStep>,
}

impl PointMap for LoadedChain {
    /// 把输出网格一侧的点依次回拉到输入图像一侧.
    fn map_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.pull_order
            .iter()
            .fold(*p, |cur, step| step.map_point(&cur))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Vector3};

    fn translation(x: f64, y: f64, z: f64) -> AffineTransform {
        AffineTransform::from_ras(Matrix3::identity(), Vector3::new(x, y, z))
    }

    #[test]
    fn test_identity_chain() {
        let chain = TransformChain::identity().load().unwrap();
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_eq!(chain.map_point(&p), p);
        assert_eq!(TransformChain::identity().to_string(), "identity");
    }

    #[test]
    fn test_pull_back_order() {
        // 图像方向: 先缩放 (配准), 后平移 (标准化).
        let scale = AffineTransform::from_ras(Matrix3::identity() * 2.0, Vector3::zeros());
        let chain = TransformChain::new([scale, translation(1.0, 0.0, 0.0)]);
        let loaded = chain.load().unwrap();

        // 回拉: 先平移, 再缩放.
        let q = loaded.map_point(&Point3::new(1.0, 1.0, 1.0));
        assert_eq!(q, Point3::new(4.0, 2.0, 2.0));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TransformChain::new([dir.path().join("nope.txt")]);
        assert!(matches!(
            missing.load(),
            Err(QcError::TransformApplication(_))
        ));

        let h5 = dir.path().join("xfm.h5");
        std::fs::write(&h5, b"\x89HDF").unwrap();
        let err = TransformChain::new([h5]).load().unwrap_err();
        assert!(err.to_string().contains("ANTs"));
    }

    #[test]
    fn test_needs_external() {
        assert!(!TransformChain::identity().needs_external());
        let text = TransformChain::new([PathBuf::from("coreg.txt")]).then(translation(1.0, 0.0, 0.0));
        assert!(!text.needs_external());
        let composite = text.then(PathBuf::from("from-T1w_to-MNI_xfm.h5"));
        assert!(composite.needs_external());
    }

    #[test]
    fn test_format_from_path() {
        let f = |s: &str| TransformFormat::from_path(Path::new(s));
        assert_eq!(f("a_xfm.txt"), Some(TransformFormat::ItkText));
        assert_eq!(f("warp.nii.gz"), Some(TransformFormat::DisplacementField));
        assert_eq!(f("T1w_to_MNI.H5"), Some(TransformFormat::Hdf5));
        assert_eq!(f("readme.md"), None);
    }
}
