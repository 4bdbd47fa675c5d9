//! 结果记录与 TSV 结果表.
//!
//! 表头固定为
//! `img1 img1name img2 dice voxinmask voxoutmask ratio_inoutmask numvox_grtr_1e10 flagged`
//! (制表符分隔). 浮点数以最短往返精度输出, 无穷大写作 `inf`;
//! `flagged` 写作 `1`/`0`; 缺失值与不可测量单元的数值列写作 `n/a`.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::consts::{COLUMNS, MISSING};
use crate::error::ErrorKind;
use crate::metrics::QualityMetrics;

/// 单元的测量结果.
#[derive(Clone, Debug, PartialEq)]
pub enum Measurement {
    /// 成功计算了全部指标.
    Measured(QualityMetrics),
    /// 某一阶段失败, 无法测量.
    Unmeasurable {
        /// 失败类别.
        kind: ErrorKind,
        /// 失败原因.
        reason: String,
    },
}

impl Measurement {
    /// 是否可测量?
    #[inline]
    pub fn is_measured(&self) -> bool {
        matches!(self, Self::Measured(_))
    }

    /// 是否被标记? 不可测量的单元不带标记.
    #[inline]
    pub fn is_flagged(&self) -> bool {
        matches!(self, Self::Measured(m) if m.flagged)
    }
}

/// 结果表中的一行.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    /// 单元标签.
    pub img1: String,
    /// 被评估掩模的文件名.
    pub img1name: String,
    /// 参考掩模标签.
    pub img2: String,
    /// 测量结果.
    pub outcome: Measurement,
}

#[inline]
fn cell<T: Display>(v: Option<T>) -> String {
    v.map_or_else(|| MISSING.to_owned(), |v| v.to_string())
}

impl ResultRecord {
    /// 按列顺序给出 9 个字段.
    pub fn fields(&self) -> [String; 9] {
        let m = match &self.outcome {
            Measurement::Measured(m) => Some(m),
            Measurement::Unmeasurable { .. } => None,
        };
        [
            self.img1.clone(),
            self.img1name.clone(),
            self.img2.clone(),
            cell(m.map(|m| m.dice)),
            cell(m.map(|m| m.voxinmask_pct)),
            cell(m.map(|m| m.voxoutmask_pct)),
            cell(m.map(|m| m.ratio_inout)),
            cell(m.and_then(|m| m.extreme_voxel_count)),
            cell(m.map(|m| u8::from(m.flagged))),
        ]
    }
}

/// 只追加的 TSV 结果表. 创建时即写入表头.
pub struct TsvSink<W: Write> {
    writer: BufWriter<W>,
    rows: usize,
}

impl TsvSink<File> {
    /// 创建 (覆盖) 结果文件.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> TsvSink<W> {
    /// 包装任意输出并写入表头.
    pub fn new(inner: W) -> io::Result<Self> {
        let mut writer = BufWriter::new(inner);
        writeln!(writer, "{}", COLUMNS.join("\t"))?;
        Ok(Self { writer, rows: 0 })
    }

    /// 追加一行.
    pub fn append(&mut self, record: &ResultRecord) -> io::Result<()> {
        writeln!(self.writer, "{}", record.fields().join("\t"))?;
        self.rows += 1;
        Ok(())
    }

    /// 已写入的数据行数 (不含表头).
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// 刷新缓冲.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// 刷新并取回底层输出.
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}
