//! 体素网格: 形状 + 体素到物理坐标 (RAS, 毫米) 的仿射映射.

use nalgebra::{Matrix4, Point3};
use nifti::NiftiHeader;

use crate::Idx3d;

/// 两个网格的仿射在该容差内视为相同. header 以 `f32` 存储仿射,
/// 同一模板多次写读会产生微小误差.
const AFFINE_TOLERANCE: f64 = 1e-4;

/// 体素网格.
///
/// 索引顺序与 nifti 一致, 即 `(i, j, k)`, 仿射作用于 `[i, j, k, 1]`.
/// 该结构是只读的, 构造时即缓存逆仿射.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VoxelGrid {
    affine: Matrix4<f64>,
    inverse: Matrix4<f64>,
    shape: Idx3d,
}

impl VoxelGrid {
    /// 由仿射和形状构建网格. 仿射不可逆时返回 `None`.
    pub fn new(affine: Matrix4<f64>, shape: Idx3d) -> Option<Self> {
        let inverse = affine.try_inverse()?;
        Some(Self {
            affine,
            inverse,
            shape,
        })
    }

    /// 原点在 `(0, 0, 0)`, 体素边长为 `spacing` 毫米的轴对齐网格.
    ///
    /// `spacing` 必须为正, 否则程序 panic.
    pub fn isotropic(spacing: f64, shape: Idx3d) -> Self {
        assert!(spacing > 0.0);
        let s = nalgebra::Vector3::new(spacing, spacing, spacing);
        Self {
            affine: Matrix4::new_nonuniform_scaling(&s),
            inverse: Matrix4::new_nonuniform_scaling(&s.map(|v| 1.0 / v)),
            shape,
        }
    }

    /// 从 nifti header 读取网格.
    ///
    /// 优先使用 sform, 其次 qform, 都缺失时仅按 `pixdim` 缩放.
    /// `dim` 的前三个空间维度作为形状; 更高维度被忽略.
    pub fn from_header(h: &NiftiHeader) -> Option<Self> {
        let [_, i, j, k, ..] = h.dim;
        let shape = (i.max(1) as usize, j.max(1) as usize, k.max(1) as usize);
        Self::new(affine_from_header(h), shape)
    }

    /// 体素到物理坐标的仿射.
    #[inline]
    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    /// 网格形状 `(i, j, k)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 体素总数.
    #[inline]
    pub fn len(&self) -> usize {
        let (i, j, k) = self.shape;
        i * j * k
    }

    /// 网格是否不含体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 三个轴方向的体素边长, 以毫米为单位.
    pub fn spacing(&self) -> [f64; 3] {
        let m = &self.affine;
        [0, 1, 2].map(|c| m.fixed_view::<3, 1>(0, c).norm())
    }

    /// 整数体素索引对应的物理坐标.
    #[inline]
    pub fn index_to_world(&self, (i, j, k): Idx3d) -> Point3<f64> {
        self.continuous_to_world(&Point3::new(i as f64, j as f64, k as f64))
    }

    /// 连续体素索引对应的物理坐标.
    #[inline]
    pub fn continuous_to_world(&self, idx: &Point3<f64>) -> Point3<f64> {
        self.affine.transform_point(idx)
    }

    /// 物理坐标对应的连续体素索引. 结果可能越界.
    #[inline]
    pub fn world_to_continuous(&self, p: &Point3<f64>) -> Point3<f64> {
        self.inverse.transform_point(p)
    }

    /// 两个网格是否描述同一体素格点 (形状相同, 仿射在容差内一致)?
    pub fn matches(&self, other: &VoxelGrid) -> bool {
        self.shape == other.shape
            && self
                .affine
                .iter()
                .zip(other.affine.iter())
                .all(|(a, b)| (a - b).abs() <= AFFINE_TOLERANCE)
    }

    /// 写入 nifti 时使用的 header. 仿射写入 sform, qform 置空.
    pub fn to_header(&self) -> NiftiHeader {
        let mut header = NiftiHeader::default();
        let m = &self.affine;
        let row = |r: usize| [0, 1, 2, 3].map(|c| m[(r, c)] as f32);
        header.srow_x = row(0);
        header.srow_y = row(1);
        header.srow_z = row(2);
        header.sform_code = 2;
        header.qform_code = 0;

        let [sx, sy, sz] = self.spacing();
        header.pixdim = [1.0, sx as f32, sy as f32, sz as f32, 1.0, 1.0, 1.0, 1.0];
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        // mm + sec
        header.xyzt_units = 2 | 8;
        header
    }
}

/// 按 NIfTI-1 标准从 header 构建 4x4 仿射.
fn affine_from_header(h: &NiftiHeader) -> Matrix4<f64> {
    if h.sform_code > 0 {
        let [x, y, z] = [h.srow_x, h.srow_y, h.srow_z].map(|r| r.map(f64::from));
        return Matrix4::new(
            x[0], x[1], x[2], x[3], //
            y[0], y[1], y[2], y[3], //
            z[0], z[1], z[2], z[3], //
            0.0, 0.0, 0.0, 1.0,
        );
    }

    let [dx, dy, dz] = [h.pixdim[1], h.pixdim[2], h.pixdim[3]].map(f64::from);
    if h.qform_code > 0 {
        let (b, c, d) = (
            f64::from(h.quatern_b),
            f64::from(h.quatern_c),
            f64::from(h.quatern_d),
        );
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;
        let (qx, qy, qz) = (
            f64::from(h.quatern_x),
            f64::from(h.quatern_y),
            f64::from(h.quatern_z),
        );
        return Matrix4::new(
            (a * a + b * b - c * c - d * d) * dx,
            (2.0 * b * c - 2.0 * a * d) * dy,
            (2.0 * b * d + 2.0 * a * c) * dz,
            qx,
            (2.0 * b * c + 2.0 * a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            (2.0 * c * d - 2.0 * a * b) * dz,
            qy,
            (2.0 * b * d - 2.0 * a * c) * dx,
            (2.0 * c * d + 2.0 * a * b) * dy,
            (a * a + d * d - c * c - b * b) * dz,
            qz,
            0.0,
            0.0,
            0.0,
            1.0,
        );
    }

    // 仅 pixdim. 非法的 0 边长按 1 处理.
    let fix = |v: f64| if v > 0.0 { v } else { 1.0 };
    Matrix4::new_nonuniform_scaling(&nalgebra::Vector3::new(fix(dx), fix(dy), fix(dz)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// MNI152NLin2009cAsym 2mm 模板的仿射.
    fn mni_2mm() -> VoxelGrid {
        let affine = Matrix4::new(
            2.0, 0.0, 0.0, -96.0, //
            0.0, 2.0, 0.0, -132.0, //
            0.0, 0.0, 2.0, -78.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        VoxelGrid::new(affine, (97, 115, 97)).unwrap()
    }

    #[test]
    fn test_index_world_round_trip() {
        let g = mni_2mm();
        let w = g.index_to_world((48, 66, 39));
        assert!(close(w.x, 0.0) && close(w.y, 0.0) && close(w.z, 0.0));

        let back = g.world_to_continuous(&Point3::new(1.0, -3.0, 5.0));
        assert!(close(back.x, 48.5) && close(back.y, 64.5) && close(back.z, 41.5));
        assert_eq!(g.spacing(), [2.0, 2.0, 2.0]);
        assert_eq!(g.len(), 97 * 115 * 97);
    }

    #[test]
    fn test_singular_affine() {
        assert!(VoxelGrid::new(Matrix4::zeros(), (2, 2, 2)).is_none());
    }

    #[test]
    fn test_header_round_trip() {
        let g = mni_2mm();
        let mut header = g.to_header();
        let [_, d1, d2, d3, ..] = &mut header.dim;
        (*d1, *d2, *d3) = (97, 115, 97);
        let back = VoxelGrid::from_header(&header).unwrap();
        assert!(back.matches(&g));
    }

    #[test]
    fn test_qform_identity_quaternion() {
        let mut header = NiftiHeader::default();
        header.dim = [3, 4, 5, 6, 1, 1, 1, 1];
        header.pixdim = [1.0, 3.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0];
        header.sform_code = 0;
        header.qform_code = 1;
        (header.quatern_b, header.quatern_c, header.quatern_d) = (0.0, 0.0, 0.0);
        (header.quatern_x, header.quatern_y, header.quatern_z) = (10.0, 20.0, 30.0);

        let g = VoxelGrid::from_header(&header).unwrap();
        assert_eq!(g.shape(), (4, 5, 6));
        let w = g.index_to_world((1, 1, 1));
        assert!(close(w.x, 13.0) && close(w.y, 23.0) && close(w.z, 34.0));
    }

    #[test]
    fn test_matches_tolerance() {
        let g = mni_2mm();
        let mut affine = *g.affine();
        affine[(0, 3)] += 1e-6;
        let h = VoxelGrid::new(affine, g.shape()).unwrap();
        assert!(g.matches(&h));

        affine[(0, 3)] += 1.0;
        let h = VoxelGrid::new(affine, g.shape()).unwrap();
        assert!(!g.matches(&h));
        assert!(!g.matches(&VoxelGrid::new(*g.affine(), (97, 115, 96)).unwrap()));
    }
}
