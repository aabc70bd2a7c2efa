//! Checkpoint save/load for training resumption.
//!
//! A checkpoint is a directory holding:
//! - `metadata.json`: progress counters and the validation accuracy
//! - `config.json`: the training configuration
//! - `model.json` / `model.bin`: name-keyed model parameters
//! - `optimizer.json` / `optimizer.bin`: name-keyed momentum buffers
//!
//! Tensor archives are a JSON index of `{name, shape, offset, len}` entries
//! plus raw little-endian f32 data. The directory is written under a
//! temporary name and renamed into place.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::{DescriptorError, Result};
use crate::matching::MatchingAccuracy;
use crate::nn::{ParamSnapshot, ParamTensor};

/// Checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

const CHECKPOINT_PREFIX: &str = "checkpoint_model_epoch_";
const METADATA_FILE: &str = "metadata.json";
const CONFIG_FILE: &str = "config.json";
const MODEL_ARCHIVE: &str = "model";
const OPTIMIZER_ARCHIVE: &str = "optimizer";

/// Checkpoint metadata stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Checkpoint version for compatibility.
    pub version: u32,
    /// Epoch to resume from (the saved epoch plus one).
    pub epoch: usize,
    /// Applied optimizer steps.
    pub global_step: usize,
    /// Validation batches evaluated.
    pub validation_step: usize,
    /// Validation accuracy of the saved epoch.
    pub accuracy: MatchingAccuracy,
}

impl CheckpointMetadata {
    /// Metadata for a checkpoint written at the end of `epoch`.
    pub fn new(
        epoch: usize,
        global_step: usize,
        validation_step: usize,
        accuracy: MatchingAccuracy,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            epoch: epoch + 1,
            global_step,
            validation_step,
            accuracy,
        }
    }

    /// Primary validation metric (tight accuracy).
    pub fn primary_metric(&self) -> f32 {
        self.accuracy.tight
    }
}

/// Everything a checkpoint stores besides the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Progress and accuracy.
    pub metadata: CheckpointMetadata,
    /// Model parameters by name.
    pub model: ParamSnapshot,
    /// Optimizer momentum buffers by name.
    pub optimizer: ParamSnapshot,
}

/// Directory name of the checkpoint written at the end of `epoch`.
pub fn checkpoint_name(epoch: usize, accuracy: &MatchingAccuracy) -> String {
    format!(
        "{}{}_{:.4}_{:.4}_{:.4}",
        CHECKPOINT_PREFIX, epoch, accuracy.tight, accuracy.nominal, accuracy.loose
    )
}

/// Save a checkpoint below `run_dir` and return its directory.
///
/// The saved epoch is `checkpoint.metadata.epoch - 1`.
pub fn save_checkpoint(
    run_dir: &Path,
    checkpoint: &Checkpoint,
    config: &TrainingConfig,
) -> Result<PathBuf> {
    let saved_epoch = checkpoint.metadata.epoch.saturating_sub(1);
    let name = checkpoint_name(saved_epoch, &checkpoint.metadata.accuracy);
    let target = run_dir.join(&name);
    let staging = run_dir.join(format!(".{}.partial", name));

    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let metadata_file = BufWriter::new(File::create(staging.join(METADATA_FILE))?);
    serde_json::to_writer_pretty(metadata_file, &checkpoint.metadata)?;
    config.save(staging.join(CONFIG_FILE))?;
    write_archive(&staging, MODEL_ARCHIVE, &checkpoint.model)?;
    write_archive(&staging, OPTIMIZER_ARCHIVE, &checkpoint.optimizer)?;

    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::rename(&staging, &target)?;

    log::info!(
        "Saved checkpoint to {} (epoch {}, step {}, accuracy {:.4})",
        target.display(),
        saved_epoch,
        checkpoint.metadata.global_step,
        checkpoint.metadata.primary_metric()
    );

    Ok(target)
}

/// Load a checkpoint directory.
pub fn load_checkpoint(dir: &Path) -> Result<Checkpoint> {
    if !checkpoint_exists(dir) {
        return Err(DescriptorError::CheckpointNotFound {
            path: dir.to_path_buf(),
        });
    }

    let metadata_file = BufReader::new(File::open(dir.join(METADATA_FILE))?);
    let metadata: CheckpointMetadata = serde_json::from_reader(metadata_file)?;
    if metadata.version > CHECKPOINT_VERSION {
        return Err(DescriptorError::checkpoint(format!(
            "unsupported checkpoint version {} (expected at most {})",
            metadata.version, CHECKPOINT_VERSION
        )));
    }

    let model = read_archive(dir, MODEL_ARCHIVE)?;
    let optimizer = if archive_exists(dir, OPTIMIZER_ARCHIVE) {
        read_archive(dir, OPTIMIZER_ARCHIVE)?
    } else {
        log::warn!("Checkpoint {} has no optimizer state", dir.display());
        ParamSnapshot::new()
    };

    log::info!(
        "Loaded checkpoint from {} (resuming at epoch {}, step {})",
        dir.display(),
        metadata.epoch,
        metadata.global_step
    );

    Ok(Checkpoint {
        metadata,
        model,
        optimizer,
    })
}

/// Load the training configuration stored with a checkpoint.
pub fn load_checkpoint_config(dir: &Path) -> Result<TrainingConfig> {
    TrainingConfig::load(dir.join(CONFIG_FILE)).map_err(|e| {
        DescriptorError::checkpoint(format!("cannot read {}: {}", CONFIG_FILE, e))
    })
}

/// Check if a complete checkpoint exists at the given path.
pub fn checkpoint_exists(dir: &Path) -> bool {
    dir.join(METADATA_FILE).exists() && archive_exists(dir, MODEL_ARCHIVE)
}

/// Get the checkpoint with the highest epoch below `run_dir`.
///
/// Looks for directories named `checkpoint_model_epoch_{epoch}_...`.
pub fn find_latest_checkpoint(run_dir: &Path) -> Option<PathBuf> {
    let mut latest: Option<(usize, PathBuf)> = None;

    for entry in fs::read_dir(run_dir).ok()?.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(epoch) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(CHECKPOINT_PREFIX))
            .and_then(|rest| rest.split('_').next())
            .and_then(|epoch| epoch.parse::<usize>().ok())
        else {
            continue;
        };
        let newer = latest.as_ref().map_or(true, |(best, _)| epoch > *best);
        if newer && checkpoint_exists(&path) {
            latest = Some((epoch, path));
        }
    }

    latest.map(|(_, path)| path)
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveEntry {
    name: String,
    shape: Vec<usize>,
    offset: usize,
    len: usize,
}

fn archive_exists(dir: &Path, stem: &str) -> bool {
    dir.join(format!("{}.json", stem)).exists() && dir.join(format!("{}.bin", stem)).exists()
}

fn write_archive(dir: &Path, stem: &str, snapshot: &ParamSnapshot) -> Result<()> {
    let mut entries = Vec::with_capacity(snapshot.len());
    let mut data = BufWriter::new(File::create(dir.join(format!("{}.bin", stem)))?);
    let mut offset = 0;

    for (name, tensor) in snapshot {
        let bytes: Vec<u8> = tensor.values.iter().flat_map(|v| v.to_le_bytes()).collect();
        data.write_all(&bytes)?;
        entries.push(ArchiveEntry {
            name: name.clone(),
            shape: tensor.shape.clone(),
            offset,
            len: tensor.values.len(),
        });
        offset += tensor.values.len();
    }
    data.flush()?;

    let index = BufWriter::new(File::create(dir.join(format!("{}.json", stem)))?);
    serde_json::to_writer_pretty(index, &entries)?;
    Ok(())
}

fn read_archive(dir: &Path, stem: &str) -> Result<ParamSnapshot> {
    let index = BufReader::new(File::open(dir.join(format!("{}.json", stem)))?);
    let entries: Vec<ArchiveEntry> = serde_json::from_reader(index)?;

    let mut bytes = Vec::new();
    BufReader::new(File::open(dir.join(format!("{}.bin", stem)))?).read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(DescriptorError::InvalidData(format!(
            "{}.bin holds {} bytes, not a whole number of f32 values",
            stem,
            bytes.len()
        )));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let mut snapshot = ParamSnapshot::new();
    for entry in entries {
        let end = entry.offset + entry.len;
        if end > values.len() || entry.shape.iter().product::<usize>() != entry.len {
            return Err(DescriptorError::InvalidData(format!(
                "archive entry {} of {} is out of range or has an inconsistent shape",
                entry.name, stem
            )));
        }
        snapshot.insert(
            entry.name,
            ParamTensor {
                shape: entry.shape,
                values: values[entry.offset..end].to_vec(),
            },
        );
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn accuracy() -> MatchingAccuracy {
        MatchingAccuracy {
            tight: 0.5,
            nominal: 0.75,
            loose: 1.0,
        }
    }

    fn snapshot() -> ParamSnapshot {
        let mut snapshot = ParamSnapshot::new();
        snapshot.insert(
            "stem.weight".to_string(),
            ParamTensor {
                shape: vec![2, 2],
                values: vec![1.0, -2.0, 3.5, 0.25],
            },
        );
        snapshot.insert(
            "stem.bias".to_string(),
            ParamTensor {
                shape: vec![2],
                values: vec![0.5, -0.5],
            },
        );
        snapshot
    }

    #[test]
    fn test_checkpoint_name() {
        assert_eq!(
            checkpoint_name(3, &accuracy()),
            "checkpoint_model_epoch_3_0.5000_0.7500_1.0000"
        );
    }

    #[test]
    fn test_checkpoint_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata::new(4, 120, 30, accuracy()),
            model: snapshot(),
            optimizer: snapshot(),
        };

        let dir = save_checkpoint(temp_dir.path(), &checkpoint, &TrainingConfig::default()).unwrap();
        assert!(checkpoint_exists(&dir));
        assert!(dir.ends_with(checkpoint_name(4, &accuracy())));

        let loaded = load_checkpoint(&dir).unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.metadata.epoch, 5);
        assert_eq!(loaded.metadata.primary_metric(), 0.5);

        let config = load_checkpoint_config(&dir).unwrap();
        assert_eq!(config.seed, 10086);

        // No staging directory is left behind.
        let entries = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_missing_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            load_checkpoint(&temp_dir.path().join("absent")),
            Err(DescriptorError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn test_find_latest_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config = TrainingConfig::default();

        for epoch in [5, 10, 3] {
            let checkpoint = Checkpoint {
                metadata: CheckpointMetadata::new(epoch, epoch * 10, epoch, accuracy()),
                model: snapshot(),
                optimizer: ParamSnapshot::new(),
            };
            save_checkpoint(temp_dir.path(), &checkpoint, &config).unwrap();
        }
        // Incomplete directory with a higher epoch is ignored.
        fs::create_dir_all(temp_dir.path().join("checkpoint_model_epoch_15_0_0_0")).unwrap();

        let latest = find_latest_checkpoint(temp_dir.path()).unwrap();
        assert!(latest.ends_with(checkpoint_name(10, &accuracy())));
    }

    #[test]
    fn test_corrupted_archive_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata::new(1, 1, 1, accuracy()),
            model: snapshot(),
            optimizer: ParamSnapshot::new(),
        };
        let dir = save_checkpoint(temp_dir.path(), &checkpoint, &TrainingConfig::default()).unwrap();
        fs::write(dir.join("model.bin"), [0u8; 6]).unwrap();

        assert!(matches!(
            load_checkpoint(&dir),
            Err(DescriptorError::InvalidData(_))
        ));
    }
}
