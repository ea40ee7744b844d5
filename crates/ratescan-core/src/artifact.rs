//! Per-rate latency distribution files

use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{RatescanError, Result};
use crate::histogram::LatencyHistogram;

/// Percentile resolution of the dumps
const TICKS_PER_HALF_DISTANCE: u32 = 10;

/// Writes `lat_<rate>.txt` per probe and promotes the winner to `lat_<rate>_best.txt`.
///
/// Any I/O failure is fatal to the run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Use `dir` for artifacts, creating it when missing
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| RatescanError::Artifact {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Path of the distribution file for `rate`
    pub fn path_for(&self, rate: u32) -> PathBuf {
        self.dir.join(format!("lat_{rate}.txt"))
    }

    /// Path of the promoted distribution file for `rate`
    pub fn best_path_for(&self, rate: u32) -> PathBuf {
        self.dir.join(format!("lat_{rate}_best.txt"))
    }

    /// Dump the histogram of the probe at `rate`
    pub fn write(&self, rate: u32, histogram: &LatencyHistogram) -> Result<PathBuf> {
        let path = self.path_for(rate);
        let wrap = |source| RatescanError::Artifact {
            path: path.clone(),
            source,
        };

        let file = fs::File::create(&path).map_err(wrap)?;
        let mut out = BufWriter::new(file);
        histogram
            .write_percentiles(&mut out, TICKS_PER_HALF_DISTANCE, 1.0)
            .map_err(wrap)?;
        out.flush().map_err(wrap)?;

        debug!("wrote latency distribution to {}", path.display());
        Ok(path)
    }

    /// Mark the distribution of `rate` as the final result
    pub fn promote_best(&self, rate: u32) -> Result<PathBuf> {
        let from = self.path_for(rate);
        let to = self.best_path_for(rate);
        fs::rename(&from, &to).map_err(|source| RatescanError::Artifact {
            path: from.clone(),
            source,
        })?;

        info!("best latency distribution saved to {}", to.display());
        Ok(to)
    }
}
