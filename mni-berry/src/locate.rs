//! 在 fMRIPrep 衍生物目录中发现处理单元.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, warn};
use walkdir::WalkDir;

use crate::consts::TEMPLATE_SPACE;
use crate::error::{QcError, QcResult};
use crate::unit::{BidsName, Locator, SubjectRunUnit, UnitInputs, UnitLabel};

/// 衍生物类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum DerivativeMode {
    /// 最小衍生物: 只有配准变换与 boldref, 需要重采样和脑提取.
    #[default]
    Minimal,
    /// 完整衍生物: 直接评估标准空间脑掩模.
    Nonminimal,
}

impl DerivativeMode {
    /// 输出文件名中使用的名称.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Nonminimal => "nonminimal",
        }
    }
}

impl fmt::Display for DerivativeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DerivativeMode {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "nonminimal" | "non-minimal" | "full" => Ok(Self::Nonminimal),
            other => Err(QcError::configuration(format!(
                "unknown derivative type `{other}`, expected `minimal` or `nonminimal`"
            ))),
        }
    }
}

/// 一个已解析的衍生物文件.
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    name: BidsName,
}

impl Entry {
    #[inline]
    fn is(&self, suffix: &str, extensions: &[&str]) -> bool {
        self.name.suffix() == suffix && extensions.contains(&self.name.extension())
    }

    #[inline]
    fn has(&self, key: &str, value: &str) -> bool {
        self.name.get(key) == Some(value)
    }

    /// 与 `label` 的 sub/ses/task/run 实体完全一致?
    fn same_run(&self, label: &UnitLabel) -> bool {
        UnitLabel::from_bids(&self.name).as_ref() == Some(label)
    }
}

const NIFTI: &[&str] = &[".nii.gz", ".nii"];

/// 基于目录遍历的衍生物定位器.
///
/// 最小衍生物模式下, 每个 `desc-coreg_boldref` 构成一个单元, 其配准变换为同一 run 的
/// `desc-coreg_from-boldref_to-T1w_mode-image_xfm.txt`, 标准化变换为该被试的
/// `from-T1w_to-MNI152NLin2009cAsym_mode-image_xfm` (优先同一会话, 否则按路径取第一个).
/// 变换缺失不会丢弃单元, 而是在处理阶段记为不可测量.
///
/// 完整衍生物模式下, 每个 `space-MNI152NLin2009cAsym_res-2_desc-brain_mask` 构成一个单元.
#[derive(Debug, Clone)]
pub struct DerivativesLocator {
    root: PathBuf,
    mode: DerivativeMode,
}

impl DerivativesLocator {
    /// 在 `root` 下按 `mode` 查找.
    pub fn new<P: AsRef<Path>>(root: P, mode: DerivativeMode) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            mode,
        }
    }

    /// 衍生物类型.
    #[inline]
    pub fn mode(&self) -> DerivativeMode {
        self.mode
    }

    /// 遍历目录, 收集所有带 `sub` 实体的文件, 按路径排序.
    fn scan(&self) -> QcResult<Vec<Entry>> {
        if !self.root.is_dir() {
            return Err(QcError::configuration(format!(
                "derivatives path {} is not a directory",
                self.root.display()
            )));
        }
        let mut entries: Vec<Entry> = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!("skipping unreadable entry: {err}");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let path = e.into_path();
                let name = BidsName::from_path(&path);
                Entry { path, name }
            })
            .filter(|e| e.name.get("sub").is_some())
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("found {} BIDS files under {}", entries.len(), self.root.display());
        Ok(entries)
    }

    fn minimal_units(entries: &[Entry]) -> Vec<SubjectRunUnit> {
        let boldrefs = entries
            .iter()
            .filter(|e| e.is("boldref", NIFTI) && e.has("desc", "coreg"));

        let mut units = Vec::new();
        for boldref in boldrefs {
            let Some(label) = UnitLabel::from_bids(&boldref.name) else {
                continue;
            };
            let coreg_xfm = entries
                .iter()
                .find(|e| {
                    e.is("xfm", &[".txt"])
                        && e.has("desc", "coreg")
                        && e.has("to", "T1w")
                        && e.has("mode", "image")
                        && e.same_run(&label)
                })
                .map(|e| e.path.clone());

            let std_candidates: Vec<&Entry> = entries
                .iter()
                .filter(|e| {
                    e.is("xfm", &[".h5", ".txt", ".nii.gz", ".nii"])
                        && e.has("from", "T1w")
                        && e.has("to", TEMPLATE_SPACE)
                        && e.has("mode", "image")
                        && e.has("sub", &label.subject)
                })
                .collect();
            let std_xfm = std_candidates
                .iter()
                .find(|e| e.name.get("ses") == label.session.as_deref())
                .or_else(|| std_candidates.first())
                .map(|e| e.path.clone());

            if coreg_xfm.is_none() || std_xfm.is_none() {
                debug!("{label}: incomplete transform set");
            }
            units.push(SubjectRunUnit {
                label,
                inputs: UnitInputs::Minimal {
                    boldref: boldref.path.clone(),
                    coreg_xfm,
                    std_xfm,
                    fov_mask: None,
                },
            });
        }
        units
    }

    fn nonminimal_units(entries: &[Entry]) -> Vec<SubjectRunUnit> {
        entries
            .iter()
            .filter(|e| {
                e.is("mask", &[".nii.gz"])
                    && e.has("space", TEMPLATE_SPACE)
                    && matches!(e.name.get("res"), Some("2" | "02"))
                    && e.has("desc", "brain")
            })
            .filter_map(|e| {
                Some(SubjectRunUnit {
                    label: UnitLabel::from_bids(&e.name)?,
                    inputs: UnitInputs::Precomputed {
                        brain_mask: e.path.clone(),
                    },
                })
            })
            .collect()
    }
}

impl Locator for DerivativesLocator {
    fn locate(&self) -> QcResult<Vec<SubjectRunUnit>> {
        let entries = self.scan()?;
        let mut units = match self.mode {
            DerivativeMode::Minimal => Self::minimal_units(&entries),
            DerivativeMode::Nonminimal => Self::nonminimal_units(&entries),
        };
        // 同一标签下按文件名稳定排序
        units.sort_by(|a, b| {
            a.label
                .cmp(&b.label)
                .then_with(|| a.inputs.assessed_name().cmp(&b.inputs.assessed_name()))
        });
        Ok(units)
    }
}
