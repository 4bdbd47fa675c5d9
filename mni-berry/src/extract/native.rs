use log::debug;
use ndarray::{Array3, Zip};
use ordered_float::OrderedFloat;

use super::{smooth, Extractor};
use crate::data::{BinaryMask, GridAttr, SpatialVolume};
use crate::error::{QcError, QcResult};

/// 进程内脑提取.
///
/// 1. 偏置场校正: 以归一化高斯平滑估计低频偏置场, 再用原图除以它;
/// 2. 迭代估计截断阈值 (clip level): 取高于当前阈值体素的中位数乘以 `clfrac`,
///    直到不动点;
/// 3. 阈值化, 保留最大 6-连通区域, 填充内部空洞, 最后膨胀 `dilate` 个体素.
#[derive(Copy, Clone, Debug)]
pub struct NativeExtractor {
    clfrac: f64,
    dilate: usize,
    bias_sigma_mm: Option<f64>,
    max_iterations: usize,
}

impl Default for NativeExtractor {
    fn default() -> Self {
        Self {
            clfrac: 0.5,
            dilate: 1,
            bias_sigma_mm: Some(20.0),
            max_iterations: 20,
        }
    }
}

impl NativeExtractor {
    /// 默认参数: `clfrac = 0.5`, 膨胀 1 体素, 偏置场平滑 20 mm.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置截断比例. 必须在 `(0, 1)` 内, 否则程序 panic.
    pub fn with_clfrac(mut self, clfrac: f64) -> Self {
        assert!(clfrac > 0.0 && clfrac < 1.0);
        self.clfrac = clfrac;
        self
    }

    /// 设置最终膨胀次数.
    pub fn with_dilate(mut self, dilate: usize) -> Self {
        self.dilate = dilate;
        self
    }

    /// 设置偏置场平滑尺度 (毫米); `None` 表示跳过偏置场校正.
    pub fn with_bias_sigma(mut self, sigma_mm: Option<f64>) -> Self {
        self.bias_sigma_mm = sigma_mm;
        self
    }

    /// 偏置场校正. 返回非负、有限的强度.
    fn bias_correct(&self, volume: &SpatialVolume, raw: &Array3<f64>) -> Array3<f64> {
        let Some(sigma_mm) = self.bias_sigma_mm else {
            return raw.clone();
        };
        let sigma = volume.grid().spacing().map(|s| sigma_mm / s);
        let support = raw.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let num = smooth::gaussian(raw, sigma);
        let den = smooth::gaussian(&support, sigma);

        // 偏置场在支撑集上的均值, 用于保持整体强度尺度.
        let mut field_sum = 0.0;
        let mut field_n = 0usize;
        let mut bias = Array3::<f64>::zeros(raw.dim());
        Zip::from(&mut bias)
            .and(&num)
            .and(&den)
            .and(&support)
            .for_each(|b, n, d, s| {
                if *d > 1e-6 && *s > 0.0 {
                    *b = n / d;
                    field_sum += *b;
                    field_n += 1;
                }
            });
        let scale = if field_n > 0 {
            field_sum / field_n as f64
        } else {
            1.0
        };

        Zip::from(raw).and(&bias).map_collect(|v, b| {
            if *b > 0.0 {
                v / b * scale
            } else {
                0.0
            }
        })
    }

    /// 迭代估计截断阈值.
    fn clip_level(&self, data: &Array3<f64>) -> QcResult<f64> {
        let mut vals: Vec<OrderedFloat<f64>> = data
            .iter()
            .filter(|v| **v > 0.0)
            .map(|v| OrderedFloat(*v))
            .collect();
        if vals.is_empty() {
            return Err(QcError::extraction("no positive voxels after bias correction"));
        }
        vals.sort_unstable();

        let mut clip = self.clfrac * median(&vals);
        for iteration in 0..self.max_iterations {
            let start = vals.partition_point(|v| v.0 < clip);
            let next = self.clfrac * median(&vals[start..]);
            if (next - clip).abs() <= 1e-6 * clip.abs().max(f64::MIN_POSITIVE) {
                debug!("Clip level {next} after {} iterations", iteration + 1);
                return Ok(next);
            }
            clip = next;
        }
        Err(QcError::extraction(format!(
            "clip level did not converge in {} iterations",
            self.max_iterations
        )))
    }
}

/// 有序切片的中位数. 切片非空.
fn median(sorted: &[OrderedFloat<f64>]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2].0
    } else {
        (sorted[n / 2 - 1].0 + sorted[n / 2].0) / 2.0
    }
}

impl Extractor for NativeExtractor {
    fn name(&self) -> &'static str {
        "native"
    }

    fn extract(&self, volume: &SpatialVolume) -> QcResult<BinaryMask> {
        if volume.is_blank() {
            return Err(QcError::extraction(
                "input volume is all zero or non-finite",
            ));
        }
        // 非有限值与负值视为背景
        let raw = volume
            .data()
            .mapv(|v| if v.is_finite() && v > 0.0 { f64::from(v) } else { 0.0 });
        if raw.iter().all(|v| *v == 0.0) {
            return Err(QcError::extraction("input volume has no positive voxels"));
        }

        let corrected = self.bias_correct(volume, &raw);
        let clip = self.clip_level(&corrected)?;

        let thresholded = SpatialVolume::new(
            *volume.grid(),
            corrected.mapv(|v| v as f32),
        )
        .map_err(|e| QcError::extraction(e.to_string()))?
        .threshold(|v| f64::from(v) >= clip && v > 0.0);

        let mask = thresholded
            .largest_component()
            .fill_holes()
            .dilate(self.dilate);
        if mask.is_empty() {
            return Err(QcError::extraction("brain mask is empty"));
        }
        debug!(
            "Extracted {} voxels (clip level {clip:.4})",
            mask.count()
        );
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VoxelGrid;
    use crate::Idx3d;

    fn dist2((i, j, k): Idx3d, c: f64) -> f64 {
        let d = |x: usize| x as f64 - c;
        d(i).powi(2) + d(j).powi(2) + d(k).powi(2)
    }

    /// 20^3 网格上的亮球 (半径 6), 背景为 0.
    fn phantom() -> SpatialVolume {
        let grid = VoxelGrid::isotropic(2.0, (20, 20, 20));
        SpatialVolume::from_fn(grid, |p| if dist2(p, 9.5) <= 36.0 { 100.0 } else { 0.0 })
    }

    #[test]
    fn test_sphere_is_recovered() {
        let vol = phantom();
        let sphere = vol.threshold(|v| v > 50.0);
        let mask = NativeExtractor::new().extract(&vol).unwrap();

        assert!(sphere.is_subset_of(&mask));
        // 只多出膨胀的一层
        assert!(mask.is_subset_of(&sphere.dilate(1)));
        assert!(mask.get((0, 0, 0)) == Some(false));
    }

    #[test]
    fn test_dim_blob_is_clipped() {
        let grid = VoxelGrid::isotropic(2.0, (20, 20, 20));
        let vol = SpatialVolume::from_fn(grid, |p @ (i, j, k)| {
            if dist2(p, 9.5) <= 36.0 {
                100.0
            } else if i < 3 && j < 3 && k < 3 {
                10.0
            } else {
                0.0
            }
        });
        let sphere = vol.threshold(|v| v > 50.0);
        let mask = NativeExtractor::new()
            .with_bias_sigma(None)
            .with_dilate(0)
            .extract(&vol)
            .unwrap();
        assert_eq!(mask.count(), sphere.count());
        assert_eq!(mask.get((1, 1, 1)), Some(false));
    }

    #[test]
    fn test_interior_hole_is_filled() {
        let grid = VoxelGrid::isotropic(2.0, (20, 20, 20));
        let vol = SpatialVolume::from_fn(grid, |p| {
            let r2 = dist2(p, 9.5);
            if r2 <= 36.0 && r2 > 2.0 {
                100.0
            } else {
                0.0
            }
        });
        let mask = NativeExtractor::new()
            .with_bias_sigma(None)
            .with_dilate(0)
            .extract(&vol)
            .unwrap();
        assert_eq!(mask.get((9, 9, 9)), Some(true));
    }

    #[test]
    fn test_degenerate_inputs() {
        let grid = VoxelGrid::isotropic(2.0, (8, 8, 8));
        let zeros = SpatialVolume::from_fn(grid, |_| 0.0);
        assert!(matches!(
            NativeExtractor::new().extract(&zeros),
            Err(QcError::Extraction(_))
        ));
        let nan = SpatialVolume::from_fn(grid, |_| f32::NAN);
        assert!(NativeExtractor::new().extract(&nan).is_err());
        let negative = SpatialVolume::from_fn(grid, |_| -3.0);
        assert!(NativeExtractor::new().extract(&negative).is_err());
    }

    #[test]
    fn test_median() {
        let v: Vec<_> = [1.0, 2.0, 3.0, 10.0].map(OrderedFloat).to_vec();
        assert_eq!(median(&v), 2.5);
        assert_eq!(median(&v[1..]), 3.0);
    }
}
