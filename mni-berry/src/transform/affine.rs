//! ITK 文本格式的仿射变换.
//!
//! 文件形如
//!
//! ```text
//! #Insight Transform File V1.0
//! #Transform 0
//! Transform: AffineTransform_double_3_3
//! Parameters: m00 m01 m02 m10 m11 m12 m20 m21 m22 tx ty tz
//! FixedParameters: cx cy cz
//! ```
//!
//! 点映射为 `y = M (x - c) + t + c`, 坐标系为 LPS.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use super::PointMap;
use crate::error::{QcError, QcResult};

const MAGIC: &str = "#Insight Transform File V1.0";

/// 支持的仿射类型名 (不含维度与精度后缀).
const AFFINE_KINDS: [&str; 2] = ["AffineTransform_", "MatrixOffsetTransformBase_"];

/// LPS <-> RAS 的坐标轴符号.
const LPS_SIGN: [f64; 3] = [-1.0, -1.0, 1.0];

/// 3D 仿射变换, 在 RAS 物理坐标下把 fixed 点映射到 moving 点.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AffineTransform {
    forward: Matrix4<f64>,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self {
            forward: Matrix4::identity(),
        }
    }
}

impl PointMap for AffineTransform {
    #[inline]
    fn map_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.forward.transform_point(p)
    }
}

impl AffineTransform {
    /// 由 RAS 下的线性部分和平移创建: `y = m x + offset`.
    pub fn from_ras(m: Matrix3<f64>, offset: Vector3<f64>) -> Self {
        let mut forward = m.to_homogeneous();
        forward.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);
        Self { forward }
    }

    /// 由 ITK 参数 (LPS) 创建.
    ///
    /// `params` 为行优先的 3x3 矩阵后接平移, `center` 为旋转中心.
    pub fn from_itk(params: &[f64; 12], center: &[f64; 3]) -> Self {
        let m = Matrix3::from_row_slice(&params[..9]);
        let t = Vector3::from_row_slice(&params[9..]);
        let c = Vector3::from_row_slice(center);
        let offset = t + c - m * c;
        Self::from_ras(flip_matrix(&m), flip_vector(&offset))
    }

    /// 转换回以原点为中心的 ITK 参数 (LPS).
    pub fn to_itk(&self) -> [f64; 12] {
        let m = flip_matrix(&self.forward.fixed_view::<3, 3>(0, 0).into_owned());
        let t = flip_vector(&self.forward.fixed_view::<3, 1>(0, 3).into_owned());
        let mut params = [0.0; 12];
        for r in 0..3 {
            for c in 0..3 {
                params[3 * r + c] = m[(r, c)];
            }
            params[9 + r] = t[r];
        }
        params
    }

    /// RAS 下的 4x4 齐次矩阵.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.forward
    }

    /// 读取 ITK 文本变换文件.
    pub fn read_itk<P: AsRef<Path>>(path: P) -> QcResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            QcError::transform(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse_itk(&text)
            .map_err(|e| QcError::transform(format!("{}: {e}", path.display())))
    }

    /// 解析 ITK 文本变换. 只接受恰好一个仿射变换.
    ///
    /// 错误信息不含文件名, 由调用者补充.
    pub fn parse_itk(text: &str) -> Result<Self, String> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some(MAGIC) {
            return Err("missing ITK transform file header".into());
        }

        let mut kind: Option<&str> = None;
        let mut params: Option<Vec<f64>> = None;
        let mut fixed: Option<Vec<f64>> = None;
        for line in lines {
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(format!("malformed line `{line}`"));
            };
            let value = value.trim();
            match key.trim() {
                "Transform" if value.starts_with("CompositeTransform_") => {}
                "Transform" => {
                    if kind.is_some() {
                        return Err("more than one transform in file".into());
                    }
                    if !AFFINE_KINDS.iter().any(|k| value.starts_with(k)) {
                        return Err(format!("unsupported transform type `{value}`"));
                    }
                    if !value.ends_with("_3_3") {
                        return Err(format!("`{value}` is not a 3-D transform"));
                    }
                    kind = Some(value);
                }
                "Parameters" => params = Some(parse_numbers(value)?),
                "FixedParameters" => fixed = Some(parse_numbers(value)?),
                other => return Err(format!("unknown key `{other}`")),
            }
        }

        if kind.is_none() {
            return Err("no transform found".into());
        }
        let params: [f64; 12] = params
            .ok_or("missing Parameters")?
            .try_into()
            .map_err(|p: Vec<f64>| format!("expected 12 parameters, found {}", p.len()))?;
        let center: [f64; 3] = match fixed {
            None => [0.0; 3],
            Some(v) => v
                .try_into()
                .map_err(|p: Vec<f64>| format!("expected 3 fixed parameters, found {}", p.len()))?,
        };
        Ok(Self::from_itk(&params, &center))
    }

    /// 序列化为 ITK 文本格式 (中心为原点).
    pub fn to_itk_string(&self) -> String {
        let params = self.to_itk();
        let mut s = String::with_capacity(256);
        let _ = writeln!(s, "{MAGIC}");
        let _ = writeln!(s, "#Transform 0");
        let _ = writeln!(s, "Transform: AffineTransform_double_3_3");
        let _ = writeln!(s, "Parameters: {}", itertools::join(params, " "));
        let _ = writeln!(s, "FixedParameters: 0 0 0");
        s
    }

    /// 保存为 ITK 文本变换文件.
    pub fn write_itk<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        fs::write(path, self.to_itk_string())
    }
}

fn parse_numbers(value: &str) -> Result<Vec<f64>, String> {
    value
        .split_whitespace()
        .map(|s| s.parse::<f64>().map_err(|_| format!("invalid number `{s}`")))
        .collect()
}

/// `F m F`, `F = diag(-1, -1, 1)`. 自逆.
fn flip_matrix(m: &Matrix3<f64>) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| m[(r, c)] * LPS_SIGN[r] * LPS_SIGN[c])
}

/// `F v`. 自逆.
fn flip_vector(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::from_fn(|r, _| v[r] * LPS_SIGN[r])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &Point3<f64>, b: &Point3<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn test_identity_file() {
        let text = "#Insight Transform File V1.0\n#Transform 0\n\
                    Transform: MatrixOffsetTransformBase_double_3_3\n\
                    Parameters: 1 0 0 0 1 0 0 0 1 0 0 0\n\
                    FixedParameters: 0 0 0\n";
        let t = AffineTransform::parse_itk(text).unwrap();
        assert_eq!(t, AffineTransform::default());
    }

    #[test]
    fn test_lps_translation_becomes_ras() {
        // LPS 平移 (+5, +3, +2) 等价于 RAS 平移 (-5, -3, +2).
        let t = AffineTransform::from_itk(
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 5.0, 3.0, 2.0],
            &[0.0; 3],
        );
        let q = t.map_point(&Point3::new(10.0, 10.0, 10.0));
        assert!(close(&q, &Point3::new(5.0, 7.0, 12.0)));
    }

    #[test]
    fn test_center_of_rotation() {
        // 绕 LPS z 轴旋转 90 度, 中心 (10, 0, 0). 中心是不动点.
        let params = [0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let t = AffineTransform::from_itk(&params, &[10.0, 0.0, 0.0]);
        let center_ras = Point3::new(-10.0, 0.0, 0.0);
        assert!(close(&t.map_point(&center_ras), &center_ras));
    }

    #[test]
    fn test_itk_text_round_trip_preserves_mapping() {
        let params = [1.1, 0.1, 0.0, -0.05, 0.9, 0.2, 0.0, 0.0, 1.0, 3.0, -4.0, 7.5];
        let t = AffineTransform::from_itk(&params, &[1.0, 2.0, 3.0]);
        let back = AffineTransform::parse_itk(&t.to_itk_string()).unwrap();
        let p = Point3::new(12.0, -30.0, 4.0);
        assert!(close(&t.map_point(&p), &back.map_point(&p)));
    }

    #[test]
    fn test_malformed_files() {
        assert!(AffineTransform::parse_itk("hello").is_err());
        let short = "#Insight Transform File V1.0\nTransform: AffineTransform_double_3_3\n\
                     Parameters: 1 0 0\n";
        assert!(AffineTransform::parse_itk(short)
            .unwrap_err()
            .contains("12 parameters"));
        let bspline = "#Insight Transform File V1.0\nTransform: BSplineTransform_double_3_3\n";
        assert!(AffineTransform::parse_itk(bspline)
            .unwrap_err()
            .contains("unsupported"));
        let two_d = "#Insight Transform File V1.0\nTransform: AffineTransform_double_2_2\n";
        assert!(AffineTransform::parse_itk(two_d).is_err());
    }
}
