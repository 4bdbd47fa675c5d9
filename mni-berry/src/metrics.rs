//! 质量指标.
//!
//! `A` 为被试在标准空间中的脑掩模, `B` 为有效参考掩模. 二者必须位于同一网格.

use crate::consts::thresholds::EXTREME_VALUE;
use crate::data::{BinaryMask, SpatialVolume};
use crate::error::{QcError, QcResult};
use crate::fov::EffectiveReferenceMask;
use crate::flag::is_flagged;

/// 重叠计数.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct OverlapCounts {
    /// `|A|`.
    pub subject: usize,
    /// `|B|`.
    pub reference: usize,
    /// `|A ∩ B|`.
    pub intersection: usize,
}

impl OverlapCounts {
    /// 统计两个掩模的重叠. 网格不一致时返回错误.
    pub fn between(subject: &BinaryMask, reference: &BinaryMask) -> QcResult<Self> {
        let intersection = subject.intersection_count(reference).ok_or_else(|| {
            QcError::metric("subject mask and reference mask are on different grids")
        })?;
        Ok(Self {
            subject: subject.count(),
            reference: reference.count(),
            intersection,
        })
    }
}

/// `2|A∩B| / (|A|+|B|)`; 两者都为空时为 0.
pub fn dice(c: &OverlapCounts) -> f64 {
    let total = c.subject + c.reference;
    if total == 0 {
        0.0
    } else {
        2.0 * c.intersection as f64 / total as f64
    }
}

/// `(掩模内百分比, 掩模外百分比)`. `A` 为空时两者均为 0.
pub fn inout_pct(c: &OverlapCounts) -> (f64, f64) {
    if c.subject == 0 {
        return (0.0, 0.0);
    }
    let inside = c.intersection as f64 / c.subject as f64 * 100.0;
    (inside, 100.0 - inside)
}

/// 掩模内外比值; 掩模外为 0 时为 `+∞`.
pub fn inout_ratio(inside: f64, outside: f64) -> f64 {
    if outside == 0.0 {
        f64::INFINITY
    } else {
        inside / outside
    }
}

/// 绝对值超过 `1e10` 的体素个数. `±∞` 计入, `NaN` 不计入.
pub fn count_extreme(volume: &SpatialVolume) -> u64 {
    volume.count_where(|v| f64::from(v).abs() > EXTREME_VALUE) as u64
}

/// 单个单元的质量指标.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct QualityMetrics {
    /// Dice 系数, `[0, 1]`.
    pub dice: f64,
    /// 被试掩模落在参考掩模内的百分比.
    pub voxinmask_pct: f64,
    /// 被试掩模落在参考掩模外的百分比.
    pub voxoutmask_pct: f64,
    /// 内外比值, 可能为 `+∞`.
    pub ratio_inout: f64,
    /// 极端值体素个数. 预计算掩模模式下缺失.
    pub extreme_voxel_count: Option<u64>,
    /// 是否被标记.
    pub flagged: bool,
}

impl QualityMetrics {
    /// 由重叠计数与极端值计数得到全部指标.
    pub fn from_counts(counts: &OverlapCounts, extreme_voxel_count: Option<u64>) -> Self {
        let dice = dice(counts);
        let (voxinmask_pct, voxoutmask_pct) = inout_pct(counts);
        Self {
            dice,
            voxinmask_pct,
            voxoutmask_pct,
            ratio_inout: inout_ratio(voxinmask_pct, voxoutmask_pct),
            extreme_voxel_count,
            flagged: is_flagged(dice, voxoutmask_pct, extreme_voxel_count),
        }
    }

    /// 计算被试掩模相对有效参考掩模的指标.
    ///
    /// `resampled` 为重采样到标准空间的连续值体数据, 用于统计极端值;
    /// 预计算掩模模式下为 `None`.
    pub fn compute(
        subject: &BinaryMask,
        effective: &EffectiveReferenceMask,
        resampled: Option<&SpatialVolume>,
    ) -> QcResult<Self> {
        let counts = OverlapCounts::between(subject, effective.mask())?;
        Ok(Self::from_counts(&counts, resampled.map(count_extreme)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VoxelGrid;
    use crate::fov::{FovConstraint, TargetReference};

    fn counts(subject: usize, reference: usize, intersection: usize) -> OverlapCounts {
        OverlapCounts {
            subject,
            reference,
            intersection,
        }
    }

    #[test]
    fn test_dice_properties() {
        assert_eq!(dice(&counts(0, 0, 0)), 0.0);
        assert_eq!(dice(&counts(40, 40, 40)), 1.0);
        assert_eq!(dice(&counts(30, 70, 20)), dice(&counts(70, 30, 20)));
        for (a, b, i) in [(10, 20, 5), (1, 1000, 1), (500, 500, 0)] {
            let d = dice(&counts(a, b, i));
            assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn test_in_out_sum_to_hundred() {
        for (a, i) in [(3, 1), (7, 7), (1000, 333), (9, 0)] {
            let (inside, outside) = inout_pct(&counts(a, 50, i));
            assert!((inside + outside - 100.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_empty_subject() {
        let m = QualityMetrics::from_counts(&counts(0, 100, 0), Some(0));
        assert_eq!(m.voxinmask_pct, 0.0);
        assert_eq!(m.voxoutmask_pct, 0.0);
        assert_eq!(m.ratio_inout, f64::INFINITY);
        assert_eq!(m.dice, 0.0);
        assert!(m.flagged);
    }

    fn reference() -> TargetReference {
        let grid = VoxelGrid::isotropic(2.0, (10, 10, 1));
        TargetReference::new("mni152", BinaryMask::from_fn(grid, |_| true))
    }

    #[test]
    fn test_identity_on_reference() {
        // 参考掩模与自身比较
        let target = reference();
        let eff = FovConstraint::unconstrained(&target);
        let m = QualityMetrics::compute(target.mask(), &eff, None).unwrap();
        assert_eq!(m.dice, 1.0);
        assert_eq!(m.voxoutmask_pct, 0.0);
        assert_eq!(m.ratio_inout, f64::INFINITY);
        assert!(!m.flagged);
    }

    #[test]
    fn test_half_subset() {
        let target = reference();
        let eff = FovConstraint::unconstrained(&target);
        let subject = BinaryMask::from_fn(*target.grid(), |(i, _, _)| i < 5);
        let m = QualityMetrics::compute(&subject, &eff, None).unwrap();
        assert_eq!(m.voxoutmask_pct, 0.0);
        assert!((m.dice - 2.0 * 50.0 / 150.0).abs() < 1e-12);
        assert!(m.flagged);
    }

    #[test]
    fn test_disjoint() {
        let grid = VoxelGrid::isotropic(2.0, (10, 10, 1));
        let target = TargetReference::new(
            "mni152",
            BinaryMask::from_fn(grid, |(i, _, _)| i < 5),
        );
        let eff = FovConstraint::unconstrained(&target);
        let subject = BinaryMask::from_fn(grid, |(i, _, _)| i >= 5);
        let m = QualityMetrics::compute(&subject, &eff, Some(&SpatialVolume::from_fn(grid, |_| 1.0)))
            .unwrap();
        assert_eq!(m.dice, 0.0);
        assert_eq!(m.voxoutmask_pct, 100.0);
        assert_eq!(m.ratio_inout, 0.0);
        assert_eq!(m.extreme_voxel_count, Some(0));
        assert!(m.flagged);
    }

    #[test]
    fn test_single_extreme_voxel() {
        let target = reference();
        let eff = FovConstraint::unconstrained(&target);
        let vol = SpatialVolume::from_fn(*target.grid(), |p| if p == (3, 3, 0) { 2e10 } else { 7.0 });
        let m = QualityMetrics::compute(target.mask(), &eff, Some(&vol)).unwrap();
        assert_eq!(m.extreme_voxel_count, Some(1));
        assert_eq!(m.dice, 1.0);
        assert!(m.flagged);
    }

    #[test]
    fn test_infinite_voxels_are_extreme() {
        let grid = VoxelGrid::isotropic(1.0, (4, 4, 4));
        let vol = SpatialVolume::from_fn(grid, |p| match p {
            (0, 0, 0) => f32::INFINITY,
            (3, 3, 3) => f32::NEG_INFINITY,
            (1, 2, 3) => f32::NAN,
            _ => 1.0,
        });
        assert_eq!(count_extreme(&vol), 2);
    }

    #[test]
    fn test_grid_mismatch_is_metric_error() {
        let target = reference();
        let eff = FovConstraint::unconstrained(&target);
        let other = BinaryMask::from_fn(VoxelGrid::isotropic(1.0, (10, 10, 1)), |_| true);
        assert!(matches!(
            QualityMetrics::compute(&other, &eff, None),
            Err(QcError::MetricComputation(_))
        ));
    }
}
