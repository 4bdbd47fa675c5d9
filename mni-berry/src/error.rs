//! 运行时错误.
//!
//! 配置错误是致命的, 会在处理任何被试之前终止运行;
//! 其余三类错误只影响单个 [`SubjectRunUnit`](crate::unit::SubjectRunUnit),
//! 对应的记录会被标记为 "不可测量" 并继续处理下一个单元.

use thiserror::Error;

/// 质量检查流程中的错误.
#[derive(Error, Debug)]
pub enum QcError {
    /// 路径缺失或不合法. 致命.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 变换文件不可读、格式错误、维度不兼容, 或外部重采样进程失败/超时.
    #[error("transform application error: {0}")]
    TransformApplication(String),

    /// 脑提取失败 (退化输入、阈值迭代不收敛、空结果或外部进程超时).
    #[error("extraction error: {0}")]
    Extraction(String),

    /// 掩模网格不一致等导致指标无法计算.
    #[error("metric computation error: {0}")]
    MetricComputation(String),

    /// 写结果表时的底层 I/O 错误. 致命.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 质量检查流程结果类型.
pub type QcResult<T> = Result<T, QcError>;

/// 错误类别, 用于日志与批处理统计.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// 见 [`QcError::Configuration`].
    Configuration,
    /// 见 [`QcError::TransformApplication`].
    TransformApplication,
    /// 见 [`QcError::Extraction`].
    Extraction,
    /// 见 [`QcError::MetricComputation`].
    MetricComputation,
    /// 见 [`QcError::Io`].
    Io,
}

impl QcError {
    /// 创建配置错误.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 创建变换应用错误.
    pub fn transform(msg: impl Into<String>) -> Self {
        Self::TransformApplication(msg.into())
    }

    /// 创建脑提取错误.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// 创建指标计算错误.
    pub fn metric(msg: impl Into<String>) -> Self {
        Self::MetricComputation(msg.into())
    }

    /// 错误类别.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::TransformApplication(_) => ErrorKind::TransformApplication,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::MetricComputation(_) => ErrorKind::MetricComputation,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// 该错误是否只影响单个单元 (批处理应继续).
    #[inline]
    pub fn is_per_unit(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransformApplication | ErrorKind::Extraction | ErrorKind::MetricComputation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QcError::extraction("all-zero volume");
        assert_eq!(err.to_string(), "extraction error: all-zero volume");
    }

    #[test]
    fn test_per_unit_kinds() {
        assert!(QcError::transform("x").is_per_unit());
        assert!(QcError::extraction("x").is_per_unit());
        assert!(QcError::metric("x").is_per_unit());
        assert!(!QcError::configuration("x").is_per_unit());

        let io = QcError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(!io.is_per_unit());
    }
}
