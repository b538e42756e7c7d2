use std::{
    fs, io, iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use machine_learning::{
    CheckpointMeta, CheckpointSlot, MlErr, ParamLayout, Parameters, checkpoint,
};
use parking_lot::Mutex;

use crate::Result;

/// An exponential moving average seeded with its first sample.
#[derive(Debug, Clone, Copy)]
pub struct MovingAverage {
    decay: f32,
    value: Option<f32>,
}

impl MovingAverage {
    pub const DEFAULT_DECAY: f32 = 0.99;

    pub fn new(decay: f32) -> Self {
        Self { decay, value: None }
    }

    /// Folds a sample into the average.
    ///
    /// # Returns
    /// The updated average.
    pub fn update(&mut self, sample: f32) -> f32 {
        let value = match self.value {
            Some(ma) => self.decay * ma + (1. - self.decay) * sample,
            None => sample,
        };

        self.value = Some(value);
        value
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DECAY)
    }
}

/// What happened to the checkpoints after an episode ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointOutcome {
    pub moving_average: f32,
    /// The rotation slot written, if the episode fell on the checkpoint cadence.
    pub slot: Option<usize>,
    /// Whether the best checkpoint was overwritten.
    pub best: bool,
}

#[derive(Debug)]
struct RotationState {
    completed: usize,
    next_slot: usize,
    moving_average: MovingAverage,
    best: f32,
}

/// Rotates periodic checkpoints through a fixed set of slots and keeps the best one.
///
/// Shared by every worker of a run. Episodes are accounted for one at a time under the state
/// lock, file writes are serialized by a second lock. A writer takes the write lock before
/// releasing the state lock, so writes land in the order their episodes were accounted for while
/// episodes that aren't due a checkpoint never wait on the disk.
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    layout: Arc<ParamLayout>,
    num_checkpoints: NonZeroUsize,
    cadence: usize,
    state: Mutex<RotationState>,
    writes: Mutex<()>,
}

impl CheckpointManager {
    /// Creates a new `CheckpointManager`.
    ///
    /// # Arguments
    /// * `dir` - The directory checkpoints are written to, it must exist.
    /// * `layout` - The layout of the parameters being checkpointed.
    /// * `num_checkpoints` - The amount of rotation slots.
    /// * `max_episodes` - The episode budget of the run, which sets the checkpoint cadence.
    ///
    /// # Returns
    /// A new `CheckpointManager` instance.
    pub fn new(
        dir: impl Into<PathBuf>,
        layout: Arc<ParamLayout>,
        num_checkpoints: NonZeroUsize,
        max_episodes: usize,
    ) -> Self {
        Self {
            dir: dir.into(),
            layout,
            num_checkpoints,
            cadence: (max_episodes / num_checkpoints.get()).max(1),
            state: Mutex::new(RotationState {
                completed: 0,
                next_slot: 0,
                moving_average: MovingAverage::default(),
                best: f32::NEG_INFINITY,
            }),
            writes: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the amount of completed episodes between two checkpoints.
    pub fn cadence(&self) -> usize {
        self.cadence
    }

    pub fn moving_average(&self) -> Option<f32> {
        self.state.lock().moving_average.value()
    }

    /// Returns the moving average of the best checkpoint, if one was written.
    pub fn best_moving_average(&self) -> Option<f32> {
        let best = self.state.lock().best;
        best.is_finite().then_some(best)
    }

    /// Accounts for a completed episode and writes the checkpoints it's due.
    ///
    /// # Arguments
    /// * `episode` - The index of the episode.
    /// * `reward` - The total reward of the episode.
    /// * `snapshot` - Takes an independent copy of the shared parameters, only called when a
    ///   checkpoint is due.
    ///
    /// # Returns
    /// The updated moving average and the checkpoints written.
    pub fn on_episode_end<F>(&self, episode: usize, reward: f32, snapshot: F) -> Result<CheckpointOutcome>
    where
        F: FnOnce() -> Vec<f32>,
    {
        let mut state = self.state.lock();
        state.completed += 1;
        let moving_average = state.moving_average.update(reward);

        let mut outcome = CheckpointOutcome {
            moving_average,
            slot: None,
            best: false,
        };

        if state.completed % self.cadence != 0 {
            return Ok(outcome);
        }

        let values = snapshot();
        let slot = state.next_slot;
        state.next_slot = (slot + 1) % self.num_checkpoints.get();
        outcome.slot = Some(slot);

        if moving_average > state.best {
            state.best = moving_average;
            outcome.best = true;
        }

        let _writing = self.writes.lock();
        drop(state);

        let params = Parameters::new(Arc::clone(&self.layout), values)?;
        let meta = CheckpointMeta {
            episode: Some(episode),
            moving_average: Some(moving_average),
        };

        self.write(CheckpointSlot::Index(slot), &params, &meta)?;
        if outcome.best {
            self.write(CheckpointSlot::Best, &params, &meta)?;
            info!(episode = episode, moving_average = moving_average; "new best checkpoint");
        }

        Ok(outcome)
    }

    /// Writes the final parameters of the run.
    ///
    /// # Arguments
    /// * `values` - The parameters to persist.
    /// * `episodes` - The amount of episodes the run completed.
    pub fn save_final(&self, values: Vec<f32>, episodes: usize) -> Result<()> {
        let meta = CheckpointMeta {
            episode: Some(episodes),
            moving_average: self.moving_average(),
        };
        let params = Parameters::new(Arc::clone(&self.layout), values)?;

        let _writing = self.writes.lock();
        self.write(CheckpointSlot::Final, &params, &meta)
    }

    /// Removes every checkpoint file this manager could write, so a directory reused across
    /// runs only holds the checkpoints of the current one.
    ///
    /// # Returns
    /// The amount of files removed.
    pub fn clear(&self) -> Result<usize> {
        let _writing = self.writes.lock();
        let slots = (0..self.num_checkpoints.get())
            .map(CheckpointSlot::Index)
            .chain(iter::once(CheckpointSlot::Best))
            .chain(iter::once(CheckpointSlot::Final));

        let mut removed = 0;
        for slot in slots {
            match fs::remove_file(slot.path(&self.dir)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(MlErr::from(e).into()),
            }
        }

        if removed > 0 {
            info!(removed = removed; "removed stale checkpoints from {}", self.dir.display());
        }

        Ok(removed)
    }

    fn write(&self, slot: CheckpointSlot, params: &Parameters, meta: &CheckpointMeta) -> Result<()> {
        let path = slot.path(&self.dir);
        checkpoint::save(&path, params, meta)?;
        debug!("wrote checkpoint {slot}");
        Ok(())
    }
}
