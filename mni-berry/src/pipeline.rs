//! 单元级质量检查流水线与批处理.
//!
//! 每个单元依次经过 变换链重采样 -> 脑提取 -> FOV 约束 -> 指标 -> 标记,
//! 得到恰好一行结果. 单元级错误只会让该行成为 "不可测量", 不会中断批处理.
//! 结果经通道交给唯一的写线程, 行之间不会交错.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread;

use log::{debug, info, warn};

use crate::config::QcConfig;
use crate::data::{BinaryMask, SpatialVolume};
use crate::error::{QcError, QcResult};
use crate::extract::Extractor;
use crate::flag::flag_reasons;
use crate::fov::{FovConstraint, FovSource, TargetReference};
use crate::locate::DerivativesLocator;
use crate::metrics::QualityMetrics;
use crate::record::{Measurement, ResultRecord, TsvSink};
use crate::resample::{Interpolation, Resampler};
use crate::transform::TransformChain;
use crate::unit::{Locator, SubjectRunUnit, UnitInputs};

/// 单元级流水线. 只借用共享组件, 可在多个线程间共享.
pub struct QcPipeline<'a> {
    target: &'a TargetReference,
    resampler: &'a dyn Resampler,
    extractor: &'a dyn Extractor,
}

impl<'a> QcPipeline<'a> {
    /// 组装流水线.
    pub fn new(
        target: &'a TargetReference,
        resampler: &'a dyn Resampler,
        extractor: &'a dyn Extractor,
    ) -> Self {
        Self {
            target,
            resampler,
            extractor,
        }
    }

    /// 目标参考掩模.
    #[inline]
    pub fn target(&self) -> &TargetReference {
        self.target
    }

    /// 计算单元的质量指标.
    pub fn measure(&self, unit: &SubjectRunUnit) -> QcResult<QualityMetrics> {
        match &unit.inputs {
            UnitInputs::Minimal {
                boldref,
                coreg_xfm,
                std_xfm,
                fov_mask,
            } => {
                let coreg = coreg_xfm
                    .as_ref()
                    .ok_or_else(|| QcError::transform("coregistration transform not found"))?;
                let standard = std_xfm
                    .as_ref()
                    .ok_or_else(|| QcError::transform("standard-space transform not found"))?;
                let chain = TransformChain::new([coreg.clone(), standard.clone()]);
                self.measure_native(boldref, &chain, fov_mask.as_deref())
            }
            UnitInputs::Precomputed { brain_mask } => self.measure_precomputed(brain_mask),
        }
    }

    fn measure_native(
        &self,
        boldref: &Path,
        chain: &TransformChain,
        fov_mask: Option<&Path>,
    ) -> QcResult<QualityMetrics> {
        let moving = SpatialVolume::open(boldref).map_err(|e| {
            QcError::transform(format!("cannot read {}: {e}", boldref.display()))
        })?;
        debug!(
            "resampling {} through {chain} with {}",
            boldref.display(),
            self.resampler.name()
        );
        let resampled =
            self.resampler
                .resample(&moving, chain, self.target.grid(), Interpolation::Linear)?;
        let subject = self.extractor.extract(&resampled)?;

        let fov = match fov_mask {
            Some(p) => Some(BinaryMask::open(p).map_err(|e| {
                QcError::transform(format!("cannot read FOV mask {}: {e}", p.display()))
            })?),
            None => None,
        };
        let source = match &fov {
            Some(m) => FovSource::Mask(m),
            None => FovSource::Volume(&moving),
        };
        let effective = FovConstraint::new(self.resampler).constrain(self.target, source, chain)?;
        QualityMetrics::compute(&subject, &effective, Some(&resampled))
    }

    fn measure_precomputed(&self, brain_mask: &Path) -> QcResult<QualityMetrics> {
        let subject = BinaryMask::open(brain_mask).map_err(|e| {
            QcError::metric(format!("cannot read {}: {e}", brain_mask.display()))
        })?;
        // 没有原生空间足迹可用
        let effective = FovConstraint::unconstrained(self.target);
        QualityMetrics::compute(&subject, &effective, None)
    }

    /// 处理单元, 总是得到一行记录.
    pub fn process(&self, unit: &SubjectRunUnit) -> ResultRecord {
        let label = unit.label.to_string();
        info!("{label}: start");
        let outcome = match self.measure(unit) {
            Ok(m) => {
                let reasons = flag_reasons(m.dice, m.voxoutmask_pct, m.extreme_voxel_count);
                if reasons.is_empty() {
                    info!("{label}: dice {:.4}, ok", m.dice);
                } else {
                    info!(
                        "{label}: dice {:.4}, flagged ({})",
                        m.dice,
                        itertools::join(&reasons, "; ")
                    );
                }
                Measurement::Measured(m)
            }
            Err(e) => {
                warn!("{label}: unmeasurable: {e}");
                Measurement::Unmeasurable {
                    kind: e.kind(),
                    reason: e.to_string(),
                }
            }
        };
        ResultRecord {
            img1: label,
            img1name: unit.inputs.assessed_name(),
            img2: self.target.label().to_owned(),
            outcome,
        }
    }
}

/// 批处理汇总.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BatchSummary {
    /// 写出的行数.
    pub total: usize,
    /// 可测量的单元数.
    pub measured: usize,
    /// 被标记的单元数.
    pub flagged: usize,
    /// 不可测量的单元数.
    pub unmeasurable: usize,
}

impl BatchSummary {
    fn add(&mut self, record: &ResultRecord) {
        self.total += 1;
        if record.outcome.is_measured() {
            self.measured += 1;
        } else {
            self.unmeasurable += 1;
        }
        if record.outcome.is_flagged() {
            self.flagged += 1;
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units: {} measured ({} flagged), {} unmeasurable",
            self.total, self.measured, self.flagged, self.unmeasurable
        )
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// 在 `workers` 个线程上处理全部单元.
        fn dispatch(
            pipeline: &QcPipeline<'_>,
            units: &[SubjectRunUnit],
            workers: usize,
            tx: Sender<ResultRecord>,
        ) -> QcResult<()> {
            use rayon::prelude::*;

            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers.max(1))
                .thread_name(|i| format!("boldqc-worker-{i}"))
                .build()
                .map_err(|e| QcError::configuration(format!("cannot start worker pool: {e}")))?;
            pool.install(|| {
                units.par_iter().for_each_with(tx, |tx, unit| {
                    // 写线程已退出时其错误会在汇合时返回
                    let _ = tx.send(pipeline.process(unit));
                });
            });
            Ok(())
        }
    } else {
        /// 顺序处理全部单元.
        fn dispatch(
            pipeline: &QcPipeline<'_>,
            units: &[SubjectRunUnit],
            _workers: usize,
            tx: Sender<ResultRecord>,
        ) -> QcResult<()> {
            for unit in units {
                if tx.send(pipeline.process(unit)).is_err() {
                    break;
                }
            }
            Ok(())
        }
    }
}

/// 处理 `units` 并把每条记录写入 `sink`. 行按完成顺序写出.
///
/// 单元级错误不会中断; 只有写入失败或线程池启动失败会返回错误.
pub fn run_units<W: Write + Send>(
    pipeline: &QcPipeline<'_>,
    units: &[SubjectRunUnit],
    workers: usize,
    mut sink: TsvSink<W>,
) -> QcResult<(BatchSummary, TsvSink<W>)> {
    let (tx, rx) = mpsc::channel::<ResultRecord>();
    thread::scope(|s| -> QcResult<(BatchSummary, TsvSink<W>)> {
        let writer = s.spawn(move || -> std::io::Result<(BatchSummary, TsvSink<W>)> {
            let mut summary = BatchSummary::default();
            for record in rx {
                sink.append(&record)?;
                summary.add(&record);
            }
            sink.flush()?;
            Ok((summary, sink))
        });

        let dispatched = dispatch(pipeline, units, workers, tx);
        let written = writer
            .join()
            .unwrap_or_else(|e| std::panic::resume_unwind(e));
        dispatched?;
        Ok(written?)
    })
}

/// 按配置运行一次完整的批处理.
///
/// 配置错误 (参考掩模缺失、目录不可用、未发现任何单元) 在处理任何单元前返回.
pub fn run_batch(config: &QcConfig) -> QcResult<BatchSummary> {
    config.prepare()?;
    let target = TargetReference::open(config.reference_mask_path())?;
    let units = DerivativesLocator::new(config.derivs(), config.mode()).locate()?;
    if units.is_empty() {
        return Err(QcError::configuration(format!(
            "no {} derivatives found under {}",
            config.mode(),
            config.derivs().display()
        )));
    }
    info!(
        "study {}: {} units, {} workers",
        config.study(),
        units.len(),
        config.workers()
    );

    let resampler = config.build_resampler();
    let extractor = config.build_extractor();
    let pipeline = QcPipeline::new(&target, resampler.as_ref(), extractor.as_ref());

    let output = config.output_path();
    let sink = TsvSink::create(&output)?;
    let (summary, _) = run_units(&pipeline, &units, config.workers(), sink)?;
    info!("{summary}; results in {}", output.display());
    Ok(summary)
}
