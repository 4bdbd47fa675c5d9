//! 对 `mni-berry::templates` 的更一层封装. 提供参考掩模目录的定位.

use mni_berry::templates;
use std::env;
use std::path::{Path, PathBuf};

/// 指定参考掩模目录的环境变量.
pub const MASK_DIR_ENV: &str = "MNI_MASK_DIR";

/// 获取参考掩模目录.
///
/// 1. 若环境变量 `$MNI_MASK_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/templateflow/tpl-MNI152NLin2009cAsym`.
pub fn mask_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(MASK_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => templates::home_template_dir_with(["tpl-MNI152NLin2009cAsym"]),
    }
}

/// 命令行显式给出时使用之, 否则见 [`mask_dir_from_env_or_home`].
pub fn resolve_mask_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(mask_dir_from_env_or_home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let p = Path::new("/somewhere/masks");
        assert_eq!(resolve_mask_dir(Some(p)).as_deref(), Some(p));
    }
}
