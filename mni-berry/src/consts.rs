//! 通用常量.

/// 二值掩模体素取值.
pub mod mask {
    /// 掩模外.
    pub const OUTSIDE: u8 = 0;

    /// 掩模内.
    pub const INSIDE: u8 = 1;

    /// 体素是否在掩模内?
    #[inline]
    pub const fn is_inside(p: u8) -> bool {
        matches!(p, INSIDE)
    }

    /// 体素是否在掩模外?
    #[inline]
    pub const fn is_outside(p: u8) -> bool {
        matches!(p, OUTSIDE)
    }
}

/// 判定规则阈值. 这些阈值是设计常量, 不随调用改变.
pub mod thresholds {
    /// Dice 低于该值即标记.
    pub const MIN_DICE: f64 = 0.80;

    /// 掩模外体素百分比高于该值即标记.
    pub const MAX_VOXOUT_PCT: f64 = 20.0;

    /// 绝对值超过该值的体素被视为重采样爆炸.
    pub const EXTREME_VALUE: f64 = 1e10;
}

/// 标准空间名称 (BIDS `space-` 实体取值).
pub const TEMPLATE_SPACE: &str = "MNI152NLin2009cAsym";

/// 结果表中参考掩模的标签 (`img2` 列).
pub const REFERENCE_LABEL: &str = "mni152";

/// 模板目录下的 2mm 脑掩模文件名.
pub const REFERENCE_MASK_FILE: &str = "tpl-MNI152NLin2009cAsym_res-02_desc-brain_mask.nii.gz";

/// TSV 中缺失值的写法 (BIDS 约定).
pub const MISSING: &str = "n/a";

/// 结果表固定列.
pub const COLUMNS: [&str; 9] = [
    "img1",
    "img1name",
    "img2",
    "dice",
    "voxinmask",
    "voxoutmask",
    "ratio_inoutmask",
    "numvox_grtr_1e10",
    "flagged",
];
