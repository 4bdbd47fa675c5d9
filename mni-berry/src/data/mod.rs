use std::ops::Index;
use std::path::Path;

use ndarray::{Array3, ArrayD, ArrayView, Axis, Ix3, Zip};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use thiserror::Error;

use crate::consts::mask::*;
use crate::Idx3d;

pub mod grid;
pub mod morph_3d;
pub mod save;

pub use grid::VoxelGrid;
pub use save::VolumeWrite;

/// 加载 nifti 体数据时的错误.
#[derive(Error, Debug)]
pub enum LoadError {
    /// 底层 nifti 读取错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 数据维度不是 3 (或首帧可用的 4).
    #[error("expected a 3-D volume, found {0} dimensions")]
    Dimensionality(usize),

    /// header 中的仿射不可逆.
    #[error("voxel-to-world affine is singular")]
    SingularAffine,

    /// 数据形状与网格不一致.
    #[error("data shape {actual:?} does not match grid shape {expected:?}")]
    Shape {
        /// 网格形状.
        expected: Idx3d,
        /// 数据形状.
        actual: Idx3d,
    },
}

/// 读取 nifti 文件, 返回网格和 `(i, j, k)` 标准布局的 `f32` 数据.
///
/// 4D 数据只保留第一帧.
fn read_volume(path: &Path) -> Result<(VoxelGrid, Array3<f32>), LoadError> {
    let obj = ReaderOptions::new().read_file(path)?;
    let grid = VoxelGrid::from_header(obj.header()).ok_or(LoadError::SingularAffine)?;
    let data: ArrayD<f32> = obj.into_volume().into_ndarray::<f32>()?;

    let data = match data.ndim() {
        3 => data,
        4 => data.index_axis_move(Axis(3), 0),
        n => return Err(LoadError::Dimensionality(n)),
    };
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| LoadError::Dimensionality(3))?;

    // nifti 数据在内存中是列优先的.
    let data = data.as_standard_layout().into_owned();
    check_shape(&grid, data.dim())?;
    Ok((grid, data))
}

#[inline]
fn check_shape(grid: &VoxelGrid, actual: Idx3d) -> Result<(), LoadError> {
    if grid.shape() == actual {
        Ok(())
    } else {
        Err(LoadError::Shape {
            expected: grid.shape(),
            actual,
        })
    }
}

/// 带网格的 3D 数据的共用属性.
pub trait GridAttr {
    /// 获取网格.
    fn grid(&self) -> &VoxelGrid;

    /// 获取数据形状 `(i, j, k)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        self.grid().shape()
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        self.grid().len()
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (i0, j0, k0): &Idx3d) -> bool {
        let (i, j, k) = self.shape();
        *i0 < i && *j0 < j && *k0 < k
    }

    /// 获取单个体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.grid().spacing().iter().product()
    }

    /// 与 `other` 是否位于同一体素网格?
    #[inline]
    fn same_grid<G: GridAttr + ?Sized>(&self, other: &G) -> bool {
        self.grid().matches(other.grid())
    }
}

/// 连续值 3D 体数据 (例如 BOLD 参考像). 体素值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct SpatialVolume {
    grid: VoxelGrid,
    data: Array3<f32>,
}

impl GridAttr for SpatialVolume {
    #[inline]
    fn grid(&self) -> &VoxelGrid {
        &self.grid
    }
}

impl Index<Idx3d> for SpatialVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl SpatialVolume {
    /// 打开 nii / nii.gz 文件. 4D 数据只保留第一帧.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let (grid, data) = read_volume(path.as_ref())?;
        Ok(Self { grid, data })
    }

    /// 由网格和数据直接创建. 形状不一致时返回 `Err`.
    pub fn new(grid: VoxelGrid, data: Array3<f32>) -> Result<Self, LoadError> {
        check_shape(&grid, data.dim())?;
        Ok(Self { grid, data })
    }

    /// 以 `f(index)` 填充整个网格.
    pub fn from_fn<F: FnMut(Idx3d) -> f32>(grid: VoxelGrid, f: F) -> Self {
        let data = Array3::from_shape_fn(grid.shape(), f);
        Self { grid, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<f32> {
        self.data
    }

    /// 获取给定索引的体素值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx3d) -> Option<f32> {
        self.data.get(pos).copied()
    }

    /// 满足谓词的体素个数.
    pub fn count_where<F: Fn(f32) -> bool>(&self, pred: F) -> usize {
        self.data.iter().filter(|v| pred(**v)).count()
    }

    /// 是否所有体素都为 0 或非有限值?
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|v| *v == 0.0 || !v.is_finite())
    }

    /// 以谓词二值化, 得到同网格的新掩模.
    pub fn threshold<F: Fn(f32) -> bool>(&self, pred: F) -> BinaryMask {
        BinaryMask {
            grid: self.grid,
            data: self.data.mapv(|v| if pred(v) { INSIDE } else { OUTSIDE }),
        }
    }
}

/// 二值掩模. 体素值只能为 [`INSIDE`] 或 [`OUTSIDE`].
///
/// 掩模不会被原地修改; 所有运算都产生新的掩模.
#[derive(Debug, Clone)]
pub struct BinaryMask {
    grid: VoxelGrid,
    data: Array3<u8>,
}

impl GridAttr for BinaryMask {
    #[inline]
    fn grid(&self) -> &VoxelGrid {
        &self.grid
    }
}

impl Index<Idx3d> for BinaryMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl BinaryMask {
    /// 打开 nii / nii.gz 掩模文件. 有限且大于 0 的体素视为掩模内.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let (grid, data) = read_volume(path.as_ref())?;
        Ok(SpatialVolume { grid, data }.threshold(|v| v.is_finite() && v > 0.0))
    }

    /// 由网格和任意 `u8` 数据创建; 非 0 值被规范为 [`INSIDE`].
    pub fn new(grid: VoxelGrid, data: Array3<u8>) -> Result<Self, LoadError> {
        check_shape(&grid, data.dim())?;
        let data = data.mapv(|p| if p != OUTSIDE { INSIDE } else { OUTSIDE });
        Ok(Self { grid, data })
    }

    /// 以谓词 `f(index)` 生成掩模.
    pub fn from_fn<F: FnMut(Idx3d) -> bool>(grid: VoxelGrid, mut f: F) -> Self {
        let data = Array3::from_shape_fn(grid.shape(), |p| if f(p) { INSIDE } else { OUTSIDE });
        Self { grid, data }
    }

    /// 全部在掩模外的掩模.
    #[inline]
    pub fn empty(grid: VoxelGrid) -> Self {
        Self {
            grid,
            data: Array3::from_elem(grid.shape(), OUTSIDE),
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获取给定索引是否在掩模内. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx3d) -> Option<bool> {
        self.data.get(pos).map(|p| is_inside(*p))
    }

    /// 掩模内体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|p| is_inside(**p)).count()
    }

    /// 掩模是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.iter().copied().all(is_outside)
    }

    /// 收集掩模内所有体素的索引, 结果按行优先存储.
    pub fn positions(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, p)| is_inside(*p).then_some(pos))
            .collect()
    }

    /// 转换为 0.0 / 1.0 取值的连续体数据, 用于重采样.
    pub fn to_volume(&self) -> SpatialVolume {
        SpatialVolume {
            grid: self.grid,
            data: self.data.mapv(f32::from),
        }
    }

    /// 体素级逻辑与. 网格不一致时返回 `None`.
    pub fn and(&self, other: &BinaryMask) -> Option<BinaryMask> {
        self.combine(other, |a, b| a && b)
    }

    /// 体素级 `self AND NOT other`. 网格不一致时返回 `None`.
    pub fn and_not(&self, other: &BinaryMask) -> Option<BinaryMask> {
        self.combine(other, |a, b| a && !b)
    }

    /// 两个掩模的交集体素数. 网格不一致时返回 `None`.
    pub fn intersection_count(&self, other: &BinaryMask) -> Option<usize> {
        if !self.same_grid(other) {
            return None;
        }
        let mut n = 0usize;
        Zip::from(&self.data).and(&other.data).for_each(|a, b| {
            if is_inside(*a) && is_inside(*b) {
                n += 1;
            }
        });
        Some(n)
    }

    /// `self` 是否是 `other` 的子集 (体素级)? 网格不一致时返回 `false`.
    pub fn is_subset_of(&self, other: &BinaryMask) -> bool {
        self.and_not(other).is_some_and(|m| m.is_empty())
    }

    fn combine<F: Fn(bool, bool) -> bool>(&self, other: &BinaryMask, op: F) -> Option<BinaryMask> {
        if !self.same_grid(other) {
            return None;
        }
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|a, b| {
                if op(is_inside(*a), is_inside(*b)) {
                    INSIDE
                } else {
                    OUTSIDE
                }
            });
        Some(BinaryMask {
            grid: self.grid,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> VoxelGrid {
        VoxelGrid::isotropic(2.0, (4, 4, 4))
    }

    #[test]
    fn test_threshold_and_count() {
        let v = SpatialVolume::from_fn(grid(), |(i, _, _)| i as f32);
        let m = v.threshold(|x| x > 1.5);
        assert_eq!(m.count(), 2 * 16);
        assert!(!v.is_blank());
        assert!(SpatialVolume::from_fn(grid(), |_| 0.0).is_blank());
    }

    #[test]
    fn test_mask_logic() {
        let a = BinaryMask::from_fn(grid(), |(i, _, _)| i < 2);
        let b = BinaryMask::from_fn(grid(), |(i, _, _)| i < 3);
        assert_eq!(a.intersection_count(&b), Some(32));
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert_eq!(b.and_not(&a).unwrap().count(), 16);
        assert_eq!(a.and(&b).unwrap().count(), a.count());
    }

    #[test]
    fn test_grid_mismatch() {
        let a = BinaryMask::from_fn(grid(), |_| true);
        let b = BinaryMask::from_fn(VoxelGrid::isotropic(1.0, (4, 4, 4)), |_| true);
        assert!(a.and(&b).is_none());
        assert!(a.intersection_count(&b).is_none());
        assert!(!a.is_subset_of(&b));
    }

    #[test]
    fn test_new_normalizes_values() {
        let data = Array3::from_shape_fn((4, 4, 4), |(i, _, _)| (i * 7) as u8);
        let m = BinaryMask::new(grid(), data).unwrap();
        assert_eq!(m.count(), 48);
        assert!(m.data().iter().all(|p| *p <= INSIDE));

        let bad = Array3::<u8>::zeros((4, 4, 3));
        assert!(matches!(
            BinaryMask::new(grid(), bad),
            Err(LoadError::Shape { .. })
        ));
    }
}
