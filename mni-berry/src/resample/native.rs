use log::debug;
use nalgebra::Point3;
use ndarray::{Array3, ArrayViewMut2, Axis};

use super::{interp, Interpolation, Resampler};
use crate::data::{GridAttr, SpatialVolume, VoxelGrid};
use crate::error::{QcError, QcResult};
use crate::transform::{LoadedChain, PointMap, TransformChain};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 进程内重采样器.
///
/// 支持 ITK 文本仿射与 ANTs 位移场; HDF5 复合变换需要 [`AntsResampler`](super::AntsResampler).
/// 启用 `rayon` 特性时按输出网格第一轴并行.
#[derive(Copy, Clone, Debug, Default)]
pub struct NativeResampler;

impl NativeResampler {
    /// 创建.
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Resampler for NativeResampler {
    fn name(&self) -> &'static str {
        "native"
    }

    fn resample(
        &self,
        moving: &SpatialVolume,
        chain: &TransformChain,
        target: &VoxelGrid,
        interpolation: Interpolation,
    ) -> QcResult<SpatialVolume> {
        if moving.size() == 0 || target.is_empty() {
            return Err(QcError::transform("cannot resample an empty grid"));
        }
        let loaded = chain.load()?;
        debug!("Resampling through {chain} with {interpolation}");

        let mut out = Array3::<f32>::zeros(target.shape());
        let fill = |i: usize, plane: ArrayViewMut2<f32>| {
            fill_plane(i, plane, moving, &loaded, target, interpolation)
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                out.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(i, plane)| fill(i, plane));
            } else {
                out.axis_iter_mut(Axis(0))
                    .enumerate()
                    .for_each(|(i, plane)| fill(i, plane));
            }
        }

        SpatialVolume::new(*target, out).map_err(|e| QcError::transform(e.to_string()))
    }
}

/// 填充输出网格第 `i` 层.
fn fill_plane(
    i: usize,
    mut plane: ArrayViewMut2<f32>,
    moving: &SpatialVolume,
    chain: &LoadedChain,
    target: &VoxelGrid,
    interpolation: Interpolation,
) {
    let src = moving.grid();
    let shape = moving.shape();
    for ((j, k), v) in plane.indexed_iter_mut() {
        let world = target.index_to_world((i, j, k));
        let c: Point3<f64> = src.world_to_continuous(&chain.map_point(&world));
        *v = match interpolation {
            Interpolation::NearestNeighbor => {
                interp::nearest(shape, &c).map_or(0.0, |pos| moving[pos])
            }
            Interpolation::Linear => {
                interp::trilinear(shape, &c, |pos| moving[pos]).map_or(0.0, |x| x as f32)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BinaryMask;
    use crate::transform::AffineTransform;
    use nalgebra::{Matrix3, Matrix4, Vector3};

    fn shifted(dx: f64) -> AffineTransform {
        AffineTransform::from_ras(Matrix3::identity(), Vector3::new(dx, 0.0, 0.0))
    }

    #[test]
    fn test_identity_on_same_grid() {
        let grid = VoxelGrid::isotropic(2.0, (6, 5, 4));
        let vol = SpatialVolume::from_fn(grid, |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        for interp in [Interpolation::Linear, Interpolation::NearestNeighbor] {
            let out = NativeResampler
                .resample(&vol, &TransformChain::identity(), &grid, interp)
                .unwrap();
            assert_eq!(out.data(), vol.data());
        }
    }

    #[test]
    fn test_translation_pulls_from_moving() {
        let grid = VoxelGrid::isotropic(1.0, (8, 3, 3));
        let vol = SpatialVolume::from_fn(grid, |(i, _, _)| i as f32);
        // 输出点 x 取自输入点 x + 2.
        let chain = TransformChain::new([shifted(2.0)]);
        let out = NativeResampler
            .resample(&vol, &chain, &grid, Interpolation::Linear)
            .unwrap();
        assert_eq!(out[(0, 1, 1)], 2.0);
        assert_eq!(out[(5, 1, 1)], 7.0);
        // 越界取 0
        assert_eq!(out[(6, 1, 1)], 0.0);
        assert_eq!(out[(7, 1, 1)], 0.0);
    }

    #[test]
    fn test_resample_onto_coarser_grid() {
        let fine = VoxelGrid::isotropic(1.0, (8, 8, 8));
        let affine = Matrix4::new_nonuniform_scaling(&Vector3::new(2.0, 2.0, 2.0));
        let coarse = VoxelGrid::new(affine, (4, 4, 4)).unwrap();
        let mask = BinaryMask::from_fn(fine, |(i, _, _)| i < 4);

        let out = NativeResampler
            .resample_mask(&mask, &TransformChain::identity(), &coarse)
            .unwrap();
        assert!(out.same_grid(&BinaryMask::empty(coarse)));
        // 粗网格 i = 0, 1 对应细网格 i = 0, 2
        assert_eq!(out.count(), 2 * 16);
    }

    #[test]
    fn test_composed_chain_interpolates_once() {
        let grid = VoxelGrid::isotropic(1.0, (10, 3, 3));
        let vol = SpatialVolume::from_fn(grid, |(i, _, _)| (i * i) as f32);
        let two_steps = TransformChain::new([shifted(0.5), shifted(0.5)]);
        let one_step = TransformChain::new([shifted(1.0)]);
        let a = NativeResampler
            .resample(&vol, &two_steps, &grid, Interpolation::Linear)
            .unwrap();
        let b = NativeResampler
            .resample(&vol, &one_step, &grid, Interpolation::Linear)
            .unwrap();
        assert_eq!(a.data(), b.data());
    }
}
