//! 外部命令行工具 (ANTs, AFNI) 的调用.
//!
//! 子进程在给定工作目录中运行, stderr 写入工作目录中的日志文件.
//! 超过期限的子进程会被杀死.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

/// 轮询子进程状态的间隔.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 失败时保留的 stderr 尾部字节数.
const STDERR_TAIL: usize = 2048;

/// 外部工具调用错误.
#[derive(Error, Debug)]
pub enum ToolError {
    /// 无法启动 (通常是可执行文件不在 `PATH` 中).
    #[error("cannot launch `{program}`: {source}")]
    Spawn {
        /// 程序名.
        program: String,
        /// 底层错误.
        source: io::Error,
    },

    /// 超时, 子进程已被杀死.
    #[error("`{program}` timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// 程序名.
        program: String,
        /// 期限.
        timeout: Duration,
    },

    /// 非零退出.
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        /// 程序名.
        program: String,
        /// 退出状态.
        status: ExitStatus,
        /// stderr 尾部.
        stderr: String,
    },

    /// 等待子进程或读写日志时出错.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 一个带期限的外部工具.
#[derive(Clone, Debug)]
pub struct ExternalTool {
    program: String,
    timeout: Duration,
}

impl ExternalTool {
    /// 创建. `program` 可以是 `PATH` 中的名称或绝对路径.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// 程序名.
    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// 期限.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 在 `workdir` 中运行并等待结束.
    pub fn run<I, S>(&self, args: I, workdir: &Path) -> Result<(), ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let log_path = workdir.join(format!("{}.stderr", self.log_stem()));
        let log = File::create(&log_path)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));
        debug!("Running {cmd:?}");

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // 进程可能恰好已退出, 忽略 kill 的错误.
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                program: self.program.clone(),
                status,
                stderr: stderr_tail(&log_path),
            })
        }
    }

    fn log_stem(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tool".to_owned())
    }
}

fn stderr_tail(path: &Path) -> String {
    let text = fs::read_to_string(path).unwrap_or_default();
    let text = text.trim();
    let start = text.len().saturating_sub(STDERR_TAIL);
    let start = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(text.len());
    text[start..].to_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok = ExternalTool::new("sh", Duration::from_secs(10));
        ok.run(["-c", "echo hi > out.txt"], dir.path()).unwrap();
        assert!(dir.path().join("out.txt").is_file());

        let err = ok.run(["-c", "echo broken >&2; exit 3"], dir.path());
        match err {
            Err(ToolError::Failed { stderr, .. }) => assert_eq!(stderr, "broken"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let slow = ExternalTool::new("sleep", Duration::from_millis(200));
        let started = Instant::now();
        let err = slow.run(["5"], dir.path()).unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExternalTool::new("definitely-not-a-real-tool-xyz", Duration::from_secs(1));
        assert!(matches!(
            tool.run(Vec::<String>::new(), dir.path()),
            Err(ToolError::Spawn { .. })
        ));
    }
}
