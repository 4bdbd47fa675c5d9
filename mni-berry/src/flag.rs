//! 异常标记规则.
//!
//! 满足任一条件即标记:
//! - `dice < 0.80`;
//! - 掩模外体素百分比 `> 20`;
//! - 存在绝对值超过 `1e10` 的体素 (计数缺失时该条件不成立).

use std::fmt;

use crate::consts::thresholds::*;

/// 被标记的原因.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FlagReason {
    /// Dice 过低.
    LowDice(f64),
    /// 掩模外体素过多.
    VoxelsOutside(f64),
    /// 存在极端值体素.
    ExtremeVoxels(u64),
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowDice(d) => write!(f, "dice {d:.3} < {MIN_DICE}"),
            Self::VoxelsOutside(p) => write!(f, "{p:.1}% outside mask > {MAX_VOXOUT_PCT}%"),
            Self::ExtremeVoxels(n) => write!(f, "{n} voxels exceed |{EXTREME_VALUE:e}|"),
        }
    }
}

/// 收集所有触发的标记原因. 结果为空表示未被标记.
pub fn flag_reasons(dice: f64, voxoutmask_pct: f64, extreme: Option<u64>) -> Vec<FlagReason> {
    let mut reasons = Vec::with_capacity(3);
    if dice < MIN_DICE {
        reasons.push(FlagReason::LowDice(dice));
    }
    if voxoutmask_pct > MAX_VOXOUT_PCT {
        reasons.push(FlagReason::VoxelsOutside(voxoutmask_pct));
    }
    if let Some(n) = extreme.filter(|n| *n > 0) {
        reasons.push(FlagReason::ExtremeVoxels(n));
    }
    reasons
}

/// 是否标记? 对相同输入总是给出相同结果.
#[inline]
pub fn is_flagged(dice: f64, voxoutmask_pct: f64, extreme: Option<u64>) -> bool {
    dice < MIN_DICE || voxoutmask_pct > MAX_VOXOUT_PCT || extreme.is_some_and(|n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_strict() {
        assert!(!is_flagged(0.80, 20.0, Some(0)));
        assert!(is_flagged(0.7999, 0.0, Some(0)));
        assert!(is_flagged(1.0, 20.0001, None));
        assert!(is_flagged(1.0, 0.0, Some(1)));
        assert!(!is_flagged(0.95, 5.0, None));
    }

    #[test]
    fn test_reasons_agree_with_rule() {
        let cases = [
            (0.5, 50.0, Some(3)),
            (0.9, 10.0, None),
            (0.9, 25.0, Some(0)),
            (0.0, 100.0, None),
        ];
        for (d, out, ext) in cases {
            assert_eq!(is_flagged(d, out, ext), !flag_reasons(d, out, ext).is_empty());
        }
        assert_eq!(flag_reasons(0.5, 50.0, Some(3)).len(), 3);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(FlagReason::ExtremeVoxels(2).to_string(), "2 voxels exceed |1e10|");
        assert_eq!(FlagReason::LowDice(0.5).to_string(), "dice 0.500 < 0.8");
    }
}
