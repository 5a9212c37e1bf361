//! Checkpoint persistence for callback state.
//!
//! A checkpoint holds the loop counters and every callback's saved state,
//! keyed by callback name, plus a content hash checked on load.

use crate::callbacks::CallbackState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use timebox_core::persistence::{atomic_write_json, load_json};
use timebox_core::{Result, TimeboxError};

const LATEST_FILE: &str = "latest.json";

/// A training checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    /// Next epoch to run when resuming.
    pub epoch: usize,
    pub global_step: usize,
    pub callbacks: BTreeMap<String, CallbackState>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        global_step: usize,
        callbacks: BTreeMap<String, CallbackState>,
    ) -> Result<Self> {
        let hash = content_hash(epoch, global_step, &callbacks)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            epoch,
            global_step,
            callbacks,
            hash,
            created_at: Utc::now(),
        })
    }

    /// State saved by the callback called `name`, if any.
    pub fn callback_state(&self, name: &str) -> Option<&CallbackState> {
        self.callbacks.get(name)
    }

    /// Check the stored hash against the content.
    pub fn verify(&self) -> Result<()> {
        let expected = content_hash(self.epoch, self.global_step, &self.callbacks)?;
        if expected != self.hash {
            return Err(TimeboxError::checkpoint(format!(
                "hash mismatch for checkpoint {}",
                self.id
            )));
        }
        Ok(())
    }
}

fn content_hash(
    epoch: usize,
    global_step: usize,
    callbacks: &BTreeMap<String, CallbackState>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update((epoch as u64).to_le_bytes());
    hasher.update((global_step as u64).to_le_bytes());
    hasher.update(serde_json::to_vec(callbacks)?);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    id: String,
}

/// Stores checkpoints as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Write `checkpoint` and make it the latest one.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.path_for(&checkpoint.id);
        atomic_write_json(&path, checkpoint)?;
        atomic_write_json(
            &self.base_dir.join(LATEST_FILE),
            &LatestPointer {
                id: checkpoint.id.clone(),
            },
        )?;
        tracing::info!(
            id = %checkpoint.id,
            epoch = checkpoint.epoch,
            global_step = checkpoint.global_step,
            "Checkpoint saved"
        );
        Ok(path)
    }

    /// Load and verify a checkpoint by id.
    pub fn load(&self, id: &str) -> Result<Checkpoint> {
        let checkpoint: Checkpoint = load_json(&self.path_for(id))?
            .ok_or_else(|| TimeboxError::not_found(format!("checkpoint {id}")))?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }

    /// Load the most recently saved checkpoint, if there is one.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        match load_json::<LatestPointer>(&self.base_dir.join(LATEST_FILE))? {
            None => Ok(None),
            Some(pointer) => self.load(&pointer.id).map(Some),
        }
    }
}
