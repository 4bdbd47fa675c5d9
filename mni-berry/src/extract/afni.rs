use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use super::Extractor;
use crate::data::{BinaryMask, GridAttr, SpatialVolume, VolumeWrite};
use crate::error::{QcError, QcResult};
use crate::external::ExternalTool;

/// 默认可执行文件名.
pub const AUTOMASK: &str = "3dAutomask";

/// 调用 AFNI `3dAutomask -dilate N` 的脑提取器.
#[derive(Clone, Debug)]
pub struct AfniExtractor {
    tool: ExternalTool,
    dilate: usize,
    scratch: Option<PathBuf>,
}

impl AfniExtractor {
    /// 使用 `PATH` 中的 `3dAutomask`, 膨胀 1 体素, 每次调用限时 `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            tool: ExternalTool::new(AUTOMASK, timeout),
            dilate: 1,
            scratch: None,
        }
    }

    /// 指定可执行文件.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.tool = ExternalTool::new(program, self.tool.timeout());
        self
    }

    /// 设置膨胀次数.
    pub fn with_dilate(mut self, dilate: usize) -> Self {
        self.dilate = dilate;
        self
    }

    /// 临时目录创建在 `dir` 中.
    pub fn with_scratch<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch = Some(dir.into());
        self
    }
}

impl Extractor for AfniExtractor {
    fn name(&self) -> &'static str {
        "afni"
    }

    fn extract(&self, volume: &SpatialVolume) -> QcResult<BinaryMask> {
        if volume.is_blank() {
            return Err(QcError::extraction(
                "input volume is all zero or non-finite",
            ));
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("automask-");
        let dir = match &self.scratch {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| QcError::extraction(format!("cannot create scratch directory: {e}")))?;

        let input = dir.path().join("input.nii.gz");
        let output = dir.path().join("mask.nii.gz");
        volume
            .save(&input)
            .map_err(|e| QcError::extraction(e.to_string()))?;

        let dilate = self.dilate.to_string();
        let args: [&OsStr; 6] = [
            OsStr::new("-q"),
            OsStr::new("-dilate"),
            OsStr::new(&dilate),
            OsStr::new("-prefix"),
            output.as_os_str(),
            input.as_os_str(),
        ];
        debug!("3dAutomask -dilate {dilate}");
        self.tool
            .run(args, dir.path())
            .map_err(|e| QcError::extraction(e.to_string()))?;

        let mask = BinaryMask::open(&output)
            .map_err(|e| QcError::extraction(format!("cannot read 3dAutomask output: {e}")))?;
        if mask.shape() != volume.shape() {
            return Err(QcError::extraction(format!(
                "3dAutomask output shape {:?} differs from input {:?}",
                mask.shape(),
                volume.shape()
            )));
        }
        // 头部经 f32 往返, 统一回输入网格.
        let mask = BinaryMask::new(*volume.grid(), mask.data().to_owned())
            .map_err(|e| QcError::extraction(e.to_string()))?;
        if mask.is_empty() {
            return Err(QcError::extraction("brain mask is empty"));
        }
        Ok(mask)
    }
}
