#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 检查 fMRIPrep 衍生数据中的 BOLD 参考像在映射到 MNI152NLin2009cAsym (2mm)
//! 标准空间后, 是否与标准脑掩模在空间上一致.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 内部坐标一律为 RAS 物理坐标 (mm). ITK/ANTs 变换文件使用 LPS, 读写时转换.
//! 2. 变换链按图像方向存储 (`[配准, 标准化]`), 对输出点按逆序拉回, 只插值一次.
//! 3. 单元级错误不会中断批处理: 每个单元都恰好写出一行, 失败的单元数值列为 `n/a`.
//!
//! # 组成
//!
//! ### 体数据与掩模 ✅
//!
//! NIfTI 读写, 体素网格, 三维连通域/填洞/膨胀.
//!
//! 实现位于 `mni-berry/src/data`.
//!
//! ### 变换链 ✅
//!
//! ITK 文本仿射与 ANTs 位移场在进程内应用; 默认的 `auto` 后端把含 `.h5` 复合变换的链
//! 交给 `antsApplyTransforms`.
//!
//! 实现位于 `mni-berry/src/transform`, `mni-berry/src/resample`.
//!
//! ### 脑提取 ✅
//!
//! 偏置场校正 + 迭代截断阈值 + 最大连通域 + 填洞 + 膨胀; 或调用 AFNI `3dAutomask`.
//!
//! 实现位于 `mni-berry/src/extract`.
//!
//! ### FOV 约束, 指标与标记 ✅
//!
//! 有效参考掩模 = 参考掩模 ∩ 被试采集足迹. Dice, 掩模内外百分比与比值, 极端值计数.
//!
//! 实现位于 `mni-berry/src/fov.rs`, `metrics.rs`, `flag.rs`.
//!
//! ### 结果表与批处理 ✅
//!
//! 有界线程池 + 单一写线程, 输出 `study-<id>_check-bold_fmriprep-<mode>.tsv`.
//!
//! 实现位于 `mni-berry/src/record.rs`, `pipeline.rs`.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

/// NIfTI 体数据与二值掩模.
pub mod data;

pub use data::{BinaryMask, GridAttr, LoadError, SpatialVolume, VolumeWrite, VoxelGrid};

mod error;

pub use error::{ErrorKind, QcError, QcResult};

pub mod config;
pub mod external;
pub mod extract;
pub mod flag;
pub mod fov;
pub mod locate;
pub mod metrics;
pub mod pipeline;
pub mod prelude;
pub mod record;
pub mod resample;
pub mod templates;
pub mod transform;
pub mod unit;
