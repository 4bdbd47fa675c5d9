//! 连续体素索引上的插值.
//!
//! 连续索引 `c` 在某轴上合法, 当且仅当 `-0.5 <= c < n - 0.5`;
//! 越界的采样由调用者处理 (一般取默认值 0).

use nalgebra::Point3;

use crate::Idx3d;

#[inline]
fn axis_inside(c: f64, n: usize) -> bool {
    c.is_finite() && c >= -0.5 && c < n as f64 - 0.5
}

/// 连续索引是否落在网格内?
#[inline]
pub fn inside(shape: Idx3d, c: &Point3<f64>) -> bool {
    let (ni, nj, nk) = shape;
    axis_inside(c.x, ni) && axis_inside(c.y, nj) && axis_inside(c.z, nk)
}

/// 最近邻体素. 越界时返回 `None`.
#[inline]
pub fn nearest(shape: Idx3d, c: &Point3<f64>) -> Option<Idx3d> {
    if !inside(shape, c) {
        return None;
    }
    let (ni, nj, nk) = shape;
    let r = |v: f64, n: usize| (v.round().max(0.0) as usize).min(n - 1);
    Some((r(c.x, ni), r(c.y, nj), r(c.z, nk)))
}

/// 三线性插值. 越界时返回 `None`; 边缘半个体素内按边缘值外推.
pub fn trilinear<F>(shape: Idx3d, c: &Point3<f64>, sample: F) -> Option<f64>
where
    F: Fn(Idx3d) -> f32,
{
    if !inside(shape, c) {
        return None;
    }
    let (ni, nj, nk) = shape;
    let split = |v: f64, n: usize| {
        let lo = v.floor();
        let t = v - lo;
        let clamp = |x: f64| (x.max(0.0) as usize).min(n - 1);
        (clamp(lo), clamp(lo + 1.0), t)
    };
    let (i0, i1, ti) = split(c.x, ni);
    let (j0, j1, tj) = split(c.y, nj);
    let (k0, k1, tk) = split(c.z, nk);

    let s = |i, j, k| f64::from(sample((i, j, k)));
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

    let c00 = lerp(s(i0, j0, k0), s(i1, j0, k0), ti);
    let c10 = lerp(s(i0, j1, k0), s(i1, j1, k0), ti);
    let c01 = lerp(s(i0, j0, k1), s(i1, j0, k1), ti);
    let c11 = lerp(s(i0, j1, k1), s(i1, j1, k1), ti);
    let c0 = lerp(c00, c10, tj);
    let c1 = lerp(c01, c11, tj);
    Some(lerp(c0, c1, tk))
}
