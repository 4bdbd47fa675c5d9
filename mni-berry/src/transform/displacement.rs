//! ANTs 位移场.
//!
//! 以 5D nifti 保存, `dim = [nx, ny, nz, 1, 3]`, 每个体素是一个 LPS 位移向量.
//! 点映射为 `q = p + d(p)`, `d` 在场的网格上三线性插值, 场外位移为 0.

use std::path::Path;

use nalgebra::{Point3, Vector3};
use ndarray::{Array4, Axis, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use super::PointMap;
use crate::data::VoxelGrid;
use crate::error::{QcError, QcResult};
use crate::resample::interp;

/// 稠密位移场.
#[derive(Debug, Clone)]
pub struct DisplacementField {
    grid: VoxelGrid,
    /// `(i, j, k, c)`, `c` 为 LPS 分量.
    data: Array4<f32>,
}

impl DisplacementField {
    /// 由网格和 LPS 位移创建. `data` 形状必须为 `(nx, ny, nz, 3)`.
    pub fn new(grid: VoxelGrid, data: Array4<f32>) -> QcResult<Self> {
        let (nx, ny, nz) = grid.shape();
        if data.dim() != (nx, ny, nz, 3) {
            return Err(QcError::transform(format!(
                "displacement data shape {:?} does not match grid {:?} x 3",
                data.dim(),
                grid.shape()
            )));
        }
        Ok(Self { grid, data })
    }

    /// 读取 ANTs 位移场文件.
    pub fn open<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let path = path.as_ref();
        let err = |msg: String| QcError::transform(format!("{}: {msg}", path.display()));

        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| err(e.to_string()))?;
        let grid = VoxelGrid::from_header(obj.header())
            .ok_or_else(|| err("singular affine".into()))?;
        let raw = obj
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|e| err(e.to_string()))?;

        let dims = raw.shape().to_vec();
        let raw = match dims.as_slice() {
            [_, _, _, 1, 3] => raw.index_axis_move(Axis(3), 0),
            [_, _, _, 3] => raw,
            other => {
                return Err(err(format!(
                    "expected a [x, y, z, 1, 3] vector field, found {other:?}"
                )))
            }
        };
        let data = raw
            .into_dimensionality::<Ix4>()
            .map_err(|e| err(e.to_string()))?
            .as_standard_layout()
            .into_owned();
        Self::new(grid, data).map_err(|e| err(e.to_string()))
    }

    /// 位移场所在网格.
    #[inline]
    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    /// 以 ANTs 可读的 5D 向量场格式保存.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), nifti::NiftiError> {
        let mut header = self.grid.to_header();
        // NIFTI_INTENT_VECTOR
        header.intent_code = 1007;
        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data.view().insert_axis(Axis(3)))
    }

    /// RAS 点处的位移向量 (RAS). 场外为 0.
    pub fn displacement_at(&self, p: &Point3<f64>) -> Vector3<f64> {
        let c = self.grid.world_to_continuous(p);
        let shape = self.grid.shape();
        let component = |axis: usize| {
            interp::trilinear(shape, &c, |(i, j, k)| self.data[(i, j, k, axis)]).unwrap_or(0.0)
        };
        // LPS -> RAS
        Vector3::new(-component(0), -component(1), component(2))
    }
}

impl PointMap for DisplacementField {
    #[inline]
    fn map_point(&self, p: &Point3<f64>) -> Point3<f64> {
        p + self.displacement_at(p)
    }
}
