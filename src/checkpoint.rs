/*!
Persisting trained predictors

A checkpoint is two files: the libtorch weights at the checkpoint path, and a JSON sidecar next to
it (`<path>.json`) holding everything needed to rebuild and use the weights. The sidecar records a
hash of the weights it was written with, and loading rejects a weights file with any other hash, so
a sidecar is never paired with weights from another save.

Both files are written to temporary files first. The previous weights are kept aside until the new
sidecar is in place and are put back if committing fails.
*/
use crate::data::scale::Normalizer;
use crate::lstm::{AirLSTMDesc, Predictor};
use crate::metrics::Metrics;
use crate::train::LossHistory;
use crate::util::stable_hash;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tch::Device;

/// Sidecar layout version
pub const FORMAT_VERSION: u32 = 1;

/// What is known about how a model was trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    /// The city whose series the model was trained on
    pub city: String,
    /// When training finished
    pub trained_at: DateTime<Utc>,
    /// Per-epoch losses
    pub history: LossHistory,
    /// The epoch whose parameters were kept
    pub best_epoch: usize,
    /// Validation metrics in physical units
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    version: u32,
    weights_hash: u64,
    desc: AirLSTMDesc,
    normalizer: Normalizer,
    meta: ModelMeta,
}

/// A loaded checkpoint
#[derive(Debug)]
pub struct Checkpoint {
    /// The trained predictor
    pub predictor: Predictor,
    /// The normalizer its training data was standardized with
    pub normalizer: Normalizer,
    /// Training metadata
    pub meta: ModelMeta,
}

/// The sidecar path for a checkpoint
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

// Keeps the extension, which selects libtorch's on-disk format
fn hidden_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let mut name = OsString::from(".");
    name.push(stem);
    name.push(".");
    name.push(tag);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    hidden_path(path, "partial")
}

fn backup_path(path: &Path) -> PathBuf {
    hidden_path(path, "previous")
}

fn write_temp<F>(path: &Path, write: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = temp_path(path);
    if let Err(err) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(tmp)
}

/// Whether a complete checkpoint exists at `path`
pub fn exists(path: &Path) -> bool {
    path.is_file() && sidecar_path(path).is_file()
}

/// Save a trained predictor with the normalizer of its training data
pub fn save(
    path: &Path,
    predictor: &Predictor,
    normalizer: &Normalizer,
    meta: &ModelMeta,
) -> Result<()> {
    if !predictor.is_trained() {
        return Err(Error::NotReady);
    }
    normalizer.validate()?;
    if normalizer.features() != predictor.desc().features {
        return Err(Error::shape(predictor.desc().features, normalizer.features()));
    }
    let weights_tmp = write_temp(path, |tmp| Ok(predictor.var_store().save(tmp)?))?;
    let sidecar = match fs::read(&weights_tmp) {
        Ok(bytes) => Sidecar {
            version: FORMAT_VERSION,
            weights_hash: stable_hash(&bytes),
            desc: predictor.desc().clone(),
            normalizer: normalizer.clone(),
            meta: meta.clone(),
        },
        Err(err) => {
            let _ = fs::remove_file(&weights_tmp);
            return Err(err.into());
        }
    };
    let sidecar_tmp = match write_temp(&sidecar_path(path), |tmp| {
        let mut writer = BufWriter::new(File::create(tmp)?);
        serde_json::to_writer_pretty(&mut writer, &sidecar)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }) {
        Ok(tmp) => tmp,
        Err(err) => {
            let _ = fs::remove_file(&weights_tmp);
            return Err(err);
        }
    };
    if let Err(err) = commit(path, &weights_tmp, &sidecar_tmp) {
        let _ = fs::remove_file(&weights_tmp);
        let _ = fs::remove_file(&sidecar_tmp);
        return Err(err);
    }
    tracing::info!(path = %path.display(), city = %meta.city, "checkpoint written");
    Ok(())
}

fn commit(path: &Path, weights_tmp: &Path, sidecar_tmp: &Path) -> Result<()> {
    let backup = backup_path(path);
    let had_weights = path.is_file();
    if had_weights {
        fs::rename(path, &backup)?;
    }
    let restore = |err: std::io::Error| -> Error {
        if had_weights {
            if let Err(restore_err) = fs::rename(&backup, path) {
                tracing::error!(
                    path = %path.display(),
                    error = %restore_err,
                    "could not restore the previous weights"
                );
            }
        }
        err.into()
    };
    fs::rename(weights_tmp, path).map_err(restore)?;
    fs::rename(sidecar_tmp, sidecar_path(path)).map_err(restore)?;
    if had_weights {
        let _ = fs::remove_file(&backup);
    }
    Ok(())
}

/// Load a checkpoint onto a device
///
/// Fails with [`Error::CheckpointMismatch`] when the weights on disk are not the ones the sidecar
/// was written with.
pub fn load(path: &Path, device: Device) -> Result<Checkpoint> {
    let reader = BufReader::new(File::open(sidecar_path(path))?);
    let sidecar: Sidecar = serde_json::from_reader(reader)?;
    if sidecar.version != FORMAT_VERSION {
        return Err(Error::Configuration(format!(
            "unsupported checkpoint version {} (expected {})",
            sidecar.version, FORMAT_VERSION
        )));
    }
    sidecar.normalizer.validate()?;
    if sidecar.normalizer.features() != sidecar.desc.features {
        return Err(Error::shape(sidecar.desc.features, sidecar.normalizer.features()));
    }
    let weights_hash = stable_hash(&fs::read(path)?);
    if weights_hash != sidecar.weights_hash {
        return Err(Error::CheckpointMismatch {
            path: path.display().to_string(),
            expected: sidecar.weights_hash,
            actual: weights_hash,
        });
    }
    let mut predictor = Predictor::new(sidecar.desc, device)?;
    predictor.var_store_mut().load(path)?;
    predictor.mark_trained();
    tracing::info!(
        path = %path.display(),
        city = %sidecar.meta.city,
        trained_at = %sidecar.meta.trained_at,
        "checkpoint loaded"
    );
    Ok(Checkpoint {
        predictor,
        normalizer: sidecar.normalizer,
        meta: sidecar.meta,
    })
}
