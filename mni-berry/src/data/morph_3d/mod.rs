//! 3D 二值形态学操作.
//!
//! 所有连通性均按 6-相邻 (菱形邻域) 定义.

use std::collections::VecDeque;

use ndarray::Array3;

use crate::consts::mask::*;
use crate::data::{BinaryMask, GridAttr};
use crate::Idx3d;

/// 一个连通区域内的所有体素索引.
pub type Area3d = Vec<Idx3d>;

/// 多个连通区域.
pub type Areas3d = Vec<Area3d>;

impl BinaryMask {
    /// 获取 `pos` 上下前后左右六个点的坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    pub(crate) fn diamond_neighbours(&self, (i, j, k): Idx3d) -> Vec<Idx3d> {
        [
            (i.wrapping_sub(1), j, k),
            (i.saturating_add(1), j, k),
            (i, j.wrapping_sub(1), k),
            (i, j.saturating_add(1), k),
            (i, j, k.wrapping_sub(1)),
            (i, j, k.saturating_add(1)),
        ]
        .into_iter()
        .filter(|p| self.check(p))
        .collect()
    }

    /// 按照 6-相邻规则获取所有满足 `pred` 的区域.
    ///
    /// 两个体素属于同一区域, 当且仅当存在一条连接它们的 6-相邻路径,
    /// 且路径上所有体素都满足 `pred`. 区域按首个体素的行优先顺序排列.
    pub fn areas(&self, pred: fn(u8) -> bool) -> Areas3d {
        let mut visited = Array3::from_elem(self.shape(), false);
        let mut bfs_q = VecDeque::with_capacity(64);
        let mut ans = Areas3d::new();

        for (pos, p) in self.data.indexed_iter() {
            if visited[pos] || !pred(*p) {
                continue;
            }
            visited[pos] = true;
            bfs_q.push_back(pos);
            let mut this_area = Area3d::with_capacity(1);
            while let Some(cur) = bfs_q.pop_front() {
                this_area.push(cur);
                for neigh in self.diamond_neighbours(cur) {
                    if !visited[neigh] && pred(self[neigh]) {
                        visited[neigh] = true;
                        bfs_q.push_back(neigh);
                    }
                }
            }
            ans.push(this_area);
        }
        ans
    }

    /// 只保留最大的前景连通区域. 前景为空时返回空掩模.
    ///
    /// 多个区域同样大时保留行优先顺序中最先出现的那个.
    pub fn largest_component(&self) -> BinaryMask {
        let mut out = BinaryMask::empty(*self.grid());
        if let Some(area) = max_area(self.areas(is_inside)) {
            for pos in area {
                out.data[pos] = INSIDE;
            }
        }
        out
    }

    /// 填充被前景完全包围的背景空洞.
    ///
    /// 所有背景区域中, 只有接触体数据边界的区域被视为真正的背景;
    /// 其余区域被填充为前景.
    /// 若没有任何背景区域接触边界, 则保留最大的背景区域.
    pub fn fill_holes(&self) -> BinaryMask {
        let bg_areas = self.areas(is_outside);
        let touches_border = |area: &Area3d| area.iter().any(|p| self.on_border(p));
        let keep_largest = !bg_areas.iter().any(touches_border);

        let mut out = self.clone();
        let largest = if keep_largest {
            largest_index(&bg_areas)
        } else {
            None
        };
        for (idx, area) in bg_areas.iter().enumerate() {
            let keep = if keep_largest {
                Some(idx) == largest
            } else {
                touches_border(area)
            };
            if !keep {
                for pos in area {
                    out.data[*pos] = INSIDE;
                }
            }
        }
        out
    }

    /// 以 6-相邻结构元膨胀 `iterations` 次.
    pub fn dilate(&self, iterations: usize) -> BinaryMask {
        let mut cur = self.clone();
        for _ in 0..iterations {
            let mut next = cur.clone();
            for (pos, p) in cur.data.indexed_iter() {
                if is_inside(*p) {
                    for neigh in cur.diamond_neighbours(pos) {
                        next.data[neigh] = INSIDE;
                    }
                }
            }
            cur = next;
        }
        cur
    }

    /// `pos` 是否位于体数据的边界面上?
    #[inline]
    fn on_border(&self, &(i, j, k): &Idx3d) -> bool {
        let (ni, nj, nk) = self.shape();
        i == 0 || j == 0 || k == 0 || i + 1 == ni || j + 1 == nj || k + 1 == nk
    }
}

/// 最大区域的下标. 并列时取最先出现的.
fn largest_index(areas: &Areas3d) -> Option<usize> {
    areas
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (idx, a)| match best {
            Some((_, n)) if n >= a.len() => best,
            _ => Some((idx, a.len())),
        })
        .map(|(idx, _)| idx)
}

fn max_area(mut areas: Areas3d) -> Option<Area3d> {
    let idx = largest_index(&areas)?;
    Some(areas.swap_remove(idx))
}
