//! 模板目录.

use std::path::{Path, PathBuf};

use crate::consts::REFERENCE_MASK_FILE;

/// 获取 `{用户主目录}/dataset/templateflow` 目录.
pub fn home_template_dir() -> Option<PathBuf> {
    home_template_dir_with::<&str, _>([])
}

/// 获取 `{用户主目录}/dataset/templateflow` 目录下给定继续项组成的全路径.
pub fn home_template_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.push("templateflow");
    ans.extend(it);
    Some(ans)
}

/// 掩模目录下的 2mm MNI152NLin2009cAsym 脑掩模路径.
#[inline]
pub fn reference_mask_in<P: AsRef<Path>>(mask_dir: P) -> PathBuf {
    mask_dir.as_ref().join(REFERENCE_MASK_FILE)
}
