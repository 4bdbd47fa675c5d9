//! 视野 (FOV) 约束.
//!
//! 被试只采集了部分脑区时, 采集视野外的参考掩模体素不应被算作 "缺失".
//! 有效参考掩模 = 目标参考掩模 ∩ 被试在标准空间中的采集足迹, 逐个单元重新计算.

use std::path::Path;

use log::debug;

use crate::consts::REFERENCE_LABEL;
use crate::data::{BinaryMask, GridAttr, SpatialVolume, VoxelGrid};
use crate::error::{QcError, QcResult};
use crate::resample::Resampler;
use crate::transform::TransformChain;

/// 目标参考掩模 (标准空间脑掩模). 一次运行只加载一次, 与被试无关.
#[derive(Debug, Clone)]
pub struct TargetReference {
    label: String,
    mask: BinaryMask,
}

impl TargetReference {
    /// 以给定标签包装掩模.
    pub fn new(label: impl Into<String>, mask: BinaryMask) -> Self {
        Self {
            label: label.into(),
            mask,
        }
    }

    /// 读取参考掩模文件, 标签为 `mni152`. 文件缺失或不可读是配置错误.
    pub fn open<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(QcError::configuration(format!(
                "reference mask {} does not exist",
                path.display()
            )));
        }
        let mask = BinaryMask::open(path).map_err(|e| {
            QcError::configuration(format!("cannot read reference mask {}: {e}", path.display()))
        })?;
        if mask.is_empty() {
            return Err(QcError::configuration(format!(
                "reference mask {} is empty",
                path.display()
            )));
        }
        Ok(Self::new(REFERENCE_LABEL, mask))
    }

    /// 标签 (`img2` 列).
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 掩模.
    #[inline]
    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }

    /// 标准空间网格.
    #[inline]
    pub fn grid(&self) -> &VoxelGrid {
        self.mask.grid()
    }
}

/// 某个单元的有效参考掩模. 总是目标参考掩模的子集; 不会持久化.
#[derive(Debug, Clone)]
pub struct EffectiveReferenceMask {
    mask: BinaryMask,
}

impl EffectiveReferenceMask {
    /// 掩模.
    #[inline]
    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }

    /// 掩模内体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.mask.count()
    }
}

/// 采集足迹的来源.
#[derive(Debug, Clone, Copy)]
pub enum FovSource<'a> {
    /// 原生空间参考像; 非零且有限的体素构成足迹.
    Volume(&'a SpatialVolume),
    /// 显式给出的原生空间 FOV 掩模.
    Mask(&'a BinaryMask),
}

/// 体数据的采集足迹: 非零且有限的体素.
pub fn footprint(volume: &SpatialVolume) -> BinaryMask {
    volume.threshold(|v| v.is_finite() && v != 0.0)
}

/// FOV 约束引擎.
pub struct FovConstraint<'a> {
    resampler: &'a dyn Resampler,
}

impl<'a> FovConstraint<'a> {
    /// 使用 `resampler` 把足迹映射到标准空间.
    pub fn new(resampler: &'a dyn Resampler) -> Self {
        Self { resampler }
    }

    /// 计算有效参考掩模.
    ///
    /// 足迹经 `chain` 以最近邻方式重采样到目标网格, 再与目标参考掩模求交.
    pub fn constrain(
        &self,
        target: &TargetReference,
        source: FovSource<'_>,
        chain: &TransformChain,
    ) -> QcResult<EffectiveReferenceMask> {
        let native = match source {
            FovSource::Volume(v) => footprint(v),
            FovSource::Mask(m) => m.clone(),
        };
        let resampled = self.resampler.resample_mask(&native, chain, target.grid())?;
        let mask = target.mask().and(&resampled).ok_or_else(|| {
            QcError::metric("resampled footprint is not on the reference grid")
        })?;
        debug!(
            "FOV footprint keeps {}/{} reference voxels",
            mask.count(),
            target.mask().count()
        );
        Ok(EffectiveReferenceMask { mask })
    }

    /// 无足迹可用时 (预计算掩模模式), 有效参考掩模就是目标参考掩模.
    pub fn unconstrained(target: &TargetReference) -> EffectiveReferenceMask {
        EffectiveReferenceMask {
            mask: target.mask().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VolumeWrite;
    use crate::resample::NativeResampler;
    use crate::transform::AffineTransform;
    use nalgebra::{Matrix3, Vector3};

    fn reference() -> TargetReference {
        let grid = VoxelGrid::isotropic(2.0, (10, 10, 10));
        let mask = BinaryMask::from_fn(grid, |(i, j, k)| {
            (2..8).contains(&i) && (2..8).contains(&j) && (2..8).contains(&k)
        });
        TargetReference::new("mni152", mask)
    }

    #[test]
    fn test_partial_coverage() {
        let target = reference();
        // 只采集了 k < 5 的下半部分
        let bold = SpatialVolume::from_fn(*target.grid(), |(_, _, k)| if k < 5 { 3.0 } else { 0.0 });
        let resampler = NativeResampler::new();
        let eff = FovConstraint::new(&resampler)
            .constrain(&target, FovSource::Volume(&bold), &TransformChain::identity())
            .unwrap();

        assert_eq!(eff.count(), 6 * 6 * 3);
        assert!(eff.mask().is_subset_of(target.mask()));
    }

    #[test]
    fn test_footprint_through_transform() {
        let target = reference();
        let mask = BinaryMask::from_fn(*target.grid(), |(i, _, _)| i < 5);
        // 输出点取自 x + 4 mm 处, 足迹在标准空间左移两个体素.
        let chain = TransformChain::new([AffineTransform::from_ras(
            Matrix3::identity(),
            Vector3::new(4.0, 0.0, 0.0),
        )]);
        let resampler = NativeResampler::new();
        let eff = FovConstraint::new(&resampler)
            .constrain(&target, FovSource::Mask(&mask), &chain)
            .unwrap();
        // 只剩 i = 2 一层
        assert_eq!(eff.count(), 36);
        assert!(eff.mask().is_subset_of(target.mask()));
    }

    #[test]
    fn test_reference_through_identity_chain() {
        use crate::metrics::QualityMetrics;

        let target = reference();
        let chain = TransformChain::identity();
        let resampler = NativeResampler::new();
        let subject = resampler
            .resample_mask(target.mask(), &chain, target.grid())
            .unwrap();
        let eff = FovConstraint::new(&resampler)
            .constrain(&target, FovSource::Mask(target.mask()), &chain)
            .unwrap();
        assert_eq!(eff.count(), target.mask().count());

        let m = QualityMetrics::compute(&subject, &eff, None).unwrap();
        assert_eq!(m.dice, 1.0);
        assert_eq!(m.voxoutmask_pct, 0.0);
        assert!(!m.flagged);
    }

    #[test]
    fn test_footprint_ignores_nan() {
        let grid = VoxelGrid::isotropic(1.0, (2, 2, 2));
        let vol = SpatialVolume::from_fn(grid, |(i, j, _)| match (i, j) {
            (0, 0) => f32::NAN,
            (0, 1) => -1.0,
            (1, 0) => 0.0,
            _ => f32::INFINITY,
        });
        assert_eq!(footprint(&vol).count(), 2);
    }

    #[test]
    fn test_open_reference() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TargetReference::open(dir.path().join("nope.nii.gz"));
        assert!(matches!(missing, Err(QcError::Configuration(_))));

        let path = dir.path().join("ref.nii.gz");
        reference().mask().save(&path).unwrap();
        let loaded = TargetReference::open(&path).unwrap();
        assert_eq!(loaded.label(), "mni152");
        assert_eq!(loaded.mask().count(), 216);
        assert!(FovConstraint::unconstrained(&loaded).mask().same_grid(loaded.mask()));
    }
}
