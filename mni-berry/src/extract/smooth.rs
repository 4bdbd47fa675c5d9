//! 以多次盒式滤波近似的高斯平滑.

use ndarray::{Array3, Axis};

/// 盒式滤波次数.
const PASSES: usize = 3;

/// 用 `n` 个盒式滤波近似标准差为 `sigma` (体素) 的高斯, 返回每次的盒宽 (奇数).
pub(crate) fn box_sizes(sigma: f64, n: usize) -> Vec<usize> {
    if sigma <= 0.0 || n == 0 {
        return vec![1; n];
    }
    let ideal = (12.0 * sigma * sigma / n as f64 + 1.0).sqrt();
    let mut lower = ideal.floor() as usize;
    if lower % 2 == 0 {
        lower = lower.saturating_sub(1).max(1);
    }
    let upper = lower + 2;

    let (w, nf) = (lower as f64, n as f64);
    let m = ((12.0 * sigma * sigma - nf * w * w - 4.0 * nf * w - 3.0 * nf) / (-4.0 * w - 4.0))
        .round()
        .clamp(0.0, nf) as usize;
    (0..n).map(|i| if i < m { lower } else { upper }).collect()
}

/// 一维盒式滤波 (原地). 两端窗口收缩, 只对实际覆盖的元素取平均.
fn box_filter_line(line: &mut [f64], width: usize) {
    let n = line.len();
    let r = width / 2;
    if r == 0 || n < 2 {
        return;
    }
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for v in line.iter() {
        let last = *prefix.last().unwrap_or(&0.0);
        prefix.push(last + v);
    }
    for (i, v) in line.iter_mut().enumerate() {
        let lo = i.saturating_sub(r);
        let hi = (i + r + 1).min(n);
        *v = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
    }
}

/// 三维高斯平滑. `sigma` 以体素为单位, 每轴独立.
///
/// 盒宽不超过该轴长度的一半.
pub(crate) fn gaussian(data: &Array3<f64>, sigma: [f64; 3]) -> Array3<f64> {
    let mut out = data.clone();
    let dims = [out.dim().0, out.dim().1, out.dim().2];
    for (axis, s) in sigma.into_iter().enumerate() {
        let limit = (dims[axis] / 2).max(1);
        let limit = if limit % 2 == 0 { limit - 1 } else { limit };
        let widths: Vec<usize> = box_sizes(s, PASSES)
            .into_iter()
            .map(|w| w.min(limit))
            .collect();

        let mut buf = Vec::with_capacity(dims[axis]);
        for mut lane in out.lanes_mut(Axis(axis)) {
            buf.clear();
            buf.extend(lane.iter().copied());
            for w in &widths {
                box_filter_line(&mut buf, *w);
            }
            for (dst, src) in lane.iter_mut().zip(&buf) {
                *dst = *src;
            }
        }
    }
    out
}
