//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{BinaryMask, GridAttr, SpatialVolume, VolumeWrite, VoxelGrid};
pub use crate::{ErrorKind, QcError, QcResult};

pub use crate::config::QcConfig;
pub use crate::extract::{Extractor, ExtractorKind};
pub use crate::fov::{EffectiveReferenceMask, FovConstraint, FovSource, TargetReference};
pub use crate::locate::{DerivativeMode, DerivativesLocator};
pub use crate::metrics::QualityMetrics;
pub use crate::pipeline::{run_batch, BatchSummary, QcPipeline};
pub use crate::record::{Measurement, ResultRecord, TsvSink};
pub use crate::resample::{AutoResampler, Interpolation, Resampler, ResamplerKind};
pub use crate::transform::{AffineTransform, DisplacementField, TransformChain};
pub use crate::unit::{Locator, SubjectRunUnit, UnitInputs, UnitLabel};
