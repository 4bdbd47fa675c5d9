//! 运行结果.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use mni_berry::pipeline::BatchSummary;

/// 将一次运行的汇总写进 `w` 中.
fn describe_into<W: Write>(r: &RunReport, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn pct(part: usize, total: usize) -> String {
        if total == 0 {
            "/".to_string()
        } else {
            format!("{:.1}%", part as f64 / total as f64 * 100.0)
        }
    }

    let s = &r.summary;
    writeln!(w, "Study `{}`:", r.study)?;
    writeln!(w, "{S4}Units: {}", s.total)?;
    writeln!(w, "{S4}Measured: {} ({})", s.measured, pct(s.measured, s.total))?;
    writeln!(w, "{S4}Flagged: {} ({})", s.flagged, pct(s.flagged, s.measured))?;
    writeln!(
        w,
        "{S4}Unmeasurable: {} ({})",
        s.unmeasurable,
        pct(s.unmeasurable, s.total)
    )?;
    writeln!(w, "{S4}Elapsed: {:.1} s", r.elapsed.as_secs_f64())?;
    write!(w, "{S4}Results: {}", r.output.display())?;
    Ok(())
}

/// 一次运行的最终结果.
#[derive(Debug)]
pub struct RunReport {
    /// 研究编号.
    pub study: String,
    /// 结果表路径.
    pub output: PathBuf,
    /// 批处理汇总.
    pub summary: BatchSummary,
    /// 总耗时.
    pub elapsed: Duration,
}

impl RunReport {
    /// 打印运行结果.
    pub fn analyze(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        utils::sep_to(&mut out)?;
        describe_into(self, &mut out)?;
        writeln!(out)?;
        utils::sep_to(&mut out)
    }
}
