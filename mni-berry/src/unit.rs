//! 处理单元: 一个被试/会话/任务/run 组合, 以及定位其输入文件的接口.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::consts::TEMPLATE_SPACE;
use crate::error::QcResult;

/// 解析后的 BIDS 文件名: `key-value` 实体, 后缀与扩展名.
///
/// 例如 `sub-01_task-rest_run-1_desc-coreg_boldref.nii.gz` 解析为实体
/// `{sub: 01, task: rest, run: 1, desc: coreg}`, 后缀 `boldref`, 扩展名 `.nii.gz`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BidsName {
    entities: BTreeMap<String, String>,
    suffix: String,
    extension: String,
}

impl BidsName {
    /// 解析文件名 (不含目录). 不符合 BIDS 命名的部分被忽略.
    pub fn parse(file_name: &str) -> Self {
        let (stem, extension) = match file_name.find('.') {
            Some(dot) => file_name.split_at(dot),
            None => (file_name, ""),
        };
        let mut entities = BTreeMap::new();
        let mut suffix = String::new();
        for part in stem.split('_') {
            match part.split_once('-') {
                Some((k, v)) if !k.is_empty() && !v.is_empty() => {
                    entities.insert(k.to_owned(), v.to_owned());
                }
                _ => suffix = part.to_owned(),
            }
        }
        Self {
            entities,
            suffix,
            extension: extension.to_owned(),
        }
    }

    /// 解析路径的文件名部分.
    pub fn from_path(path: &Path) -> Self {
        path.file_name()
            .and_then(|s| s.to_str())
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// 实体取值.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    /// 后缀, 如 `boldref`, `mask`, `xfm`.
    #[inline]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// 扩展名, 含前导点, 如 `.nii.gz`.
    #[inline]
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// 单元标签.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UnitLabel {
    /// 被试.
    pub subject: String,
    /// 会话.
    pub session: Option<String>,
    /// 任务.
    pub task: Option<String>,
    /// run 编号, 无前导零.
    pub run: Option<String>,
}

impl UnitLabel {
    /// 只含被试的标签.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            session: None,
            task: None,
            run: None,
        }
    }

    /// 从 BIDS 文件名取标签. 缺少 `sub` 实体时返回 `None`.
    pub fn from_bids(name: &BidsName) -> Option<Self> {
        Some(Self {
            subject: name.get("sub")?.to_owned(),
            session: name.get("ses").map(str::to_owned),
            task: name.get("task").map(str::to_owned),
            run: name.get("run").map(normalize_run),
        })
    }

    /// 设置会话.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// 设置任务.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// 设置 run.
    pub fn with_run(mut self, run: impl AsRef<str>) -> Self {
        self.run = Some(normalize_run(run.as_ref()));
        self
    }
}

/// run 实体按整数书写: `01` -> `1`. 非数字原样保留.
fn normalize_run(run: &str) -> String {
    if !run.is_empty() && run.bytes().all(|b| b.is_ascii_digit()) {
        let trimmed = run.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_owned()
        } else {
            trimmed.to_owned()
        }
    } else {
        run.to_owned()
    }
}

impl fmt::Display for UnitLabel {
    /// `subject-XX_session-YY_task-ZZ_run-N`, 缺失部分省略.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject-{}", self.subject)?;
        let rest = [
            ("session", &self.session),
            ("task", &self.task),
            ("run", &self.run),
        ];
        for (key, value) in rest {
            if let Some(v) = value {
                write!(f, "_{key}-{v}")?;
            }
        }
        Ok(())
    }
}

/// 单元的输入文件.
#[derive(Clone, Debug, PartialEq)]
pub enum UnitInputs {
    /// 最小衍生物: 原生空间参考像 + 两步变换. 变换可能缺失.
    Minimal {
        /// 已配准的 BOLD 参考像.
        boldref: PathBuf,
        /// boldref -> T1w 配准变换.
        coreg_xfm: Option<PathBuf>,
        /// T1w -> 标准空间变换.
        std_xfm: Option<PathBuf>,
        /// 显式的 FOV 掩模 (若有).
        fov_mask: Option<PathBuf>,
    },
    /// 完整衍生物: 已在标准空间中的脑掩模.
    Precomputed {
        /// 标准空间脑掩模.
        brain_mask: PathBuf,
    },
}

impl UnitInputs {
    /// 结果表 `img1name` 列: 被评估掩模的文件名.
    ///
    /// 最小衍生物模式下为中间掩模的名字
    /// `<boldref 主干>_space-MNI152NLin2009cAsym_brain_mask.nii.gz`.
    pub fn assessed_name(&self) -> String {
        match self {
            Self::Minimal { boldref, .. } => {
                let name = boldref
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stem = name
                    .strip_suffix(".nii.gz")
                    .or_else(|| name.strip_suffix(".nii"))
                    .unwrap_or(&name);
                format!("{stem}_space-{TEMPLATE_SPACE}_brain_mask.nii.gz")
            }
            Self::Precomputed { brain_mask } => brain_mask
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// 一个被试-run 处理单元.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectRunUnit {
    /// 标签.
    pub label: UnitLabel,
    /// 输入文件.
    pub inputs: UnitInputs,
}

/// 在衍生物目录中发现处理单元.
pub trait Locator {
    /// 列出全部单元, 按标签排序.
    fn locate(&self) -> QcResult<Vec<SubjectRunUnit>>;
}
