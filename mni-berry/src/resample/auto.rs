use log::debug;

use super::{AntsResampler, Interpolation, NativeResampler, Resampler};
use crate::data::{SpatialVolume, VoxelGrid};
use crate::error::QcResult;
use crate::transform::TransformChain;

/// 按变换链选择后端的重采样器.
///
/// 链中含有 HDF5 复合变换 (fMRIPrep 的 T1w → MNI 变换即是) 时交给
/// [`AntsResampler`], 其余情况在进程内完成.
#[derive(Clone, Debug)]
pub struct AutoResampler {
    native: NativeResampler,
    ants: AntsResampler,
}

impl AutoResampler {
    /// 以 `ants` 作为外部后端.
    pub fn new(ants: AntsResampler) -> Self {
        Self {
            native: NativeResampler::new(),
            ants,
        }
    }

    /// 实际处理 `chain` 的后端.
    pub fn backend_for(&self, chain: &TransformChain) -> &dyn Resampler {
        if chain.needs_external() {
            &self.ants
        } else {
            &self.native
        }
    }
}

impl Resampler for AutoResampler {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn resample(
        &self,
        moving: &SpatialVolume,
        chain: &TransformChain,
        target: &VoxelGrid,
        interpolation: Interpolation,
    ) -> QcResult<SpatialVolume> {
        let backend = self.backend_for(chain);
        debug!("Routing {chain} to the {} resampler", backend.name());
        backend.resample(moving, chain, target, interpolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QcError;
    use std::path::PathBuf;
    use std::time::Duration;

    fn auto() -> AutoResampler {
        AutoResampler::new(
            AntsResampler::new(Duration::from_secs(5)).with_program("antsApplyTransforms-missing-xyz"),
        )
    }

    #[test]
    fn test_backend_choice() {
        let r = auto();
        let text = TransformChain::new([PathBuf::from("coreg.txt"), PathBuf::from("std.nii.gz")]);
        assert_eq!(r.backend_for(&text).name(), "native");
        let composite = TransformChain::new([PathBuf::from("coreg.txt"), PathBuf::from("std.h5")]);
        assert_eq!(r.backend_for(&composite).name(), "ants");
        assert_eq!(r.backend_for(&TransformChain::identity()).name(), "native");
    }

    #[test]
    fn test_text_chain_stays_in_process() {
        let grid = VoxelGrid::isotropic(2.0, (4, 4, 4));
        let vol = SpatialVolume::from_fn(grid, |(i, _, _)| i as f32);
        let out = auto()
            .resample(&vol, &TransformChain::identity(), &grid, Interpolation::Linear)
            .unwrap();
        assert_eq!(out.data(), vol.data());
    }

    #[test]
    fn test_composite_chain_goes_to_ants() {
        let dir = tempfile::tempdir().unwrap();
        let h5 = dir.path().join("from-T1w_to-MNI152NLin2009cAsym_mode-image_xfm.h5");
        std::fs::write(&h5, b"\x89HDF").unwrap();
        let grid = VoxelGrid::isotropic(2.0, (4, 4, 4));
        let vol = SpatialVolume::from_fn(grid, |_| 1.0);

        let err = auto()
            .resample(&vol, &TransformChain::new([h5]), &grid, Interpolation::Linear)
            .unwrap_err();
        // 失败来自外部工具的启动, 而不是进程内读取
        assert!(matches!(err, QcError::TransformApplication(_)));
        assert!(err.to_string().contains("antsApplyTransforms-missing-xyz"));
    }
}
