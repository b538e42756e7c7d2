use std::{
    collections::HashMap,
    fmt::{self, Display},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;
use safetensors::{Dtype, SafeTensors, serialize, tensor::TensorView};

use crate::{MlErr, ParamLayout, Parameters, Result};

const EPISODE_KEY: &str = "episode";
const MOVING_AVERAGE_KEY: &str = "moving_average";

/// Where a checkpoint lives among the files of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointSlot {
    /// One of the rotating slots.
    Index(usize),
    /// The parameters with the best reward moving average so far.
    Best,
    /// The parameters at the end of the run.
    Final,
}

impl CheckpointSlot {
    pub fn file_name(&self) -> String {
        format!("checkpoint_{self}.safetensors")
    }

    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl Display for CheckpointSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointSlot::Index(i) => write!(f, "{i}"),
            CheckpointSlot::Best => f.write_str("best"),
            CheckpointSlot::Final => f.write_str("final"),
        }
    }
}

/// The training progress stored alongside the parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckpointMeta {
    pub episode: Option<usize>,
    pub moving_average: Option<f32>,
}

/// Writes the parameters as a safetensors file, one `F32` tensor per layout entry.
///
/// The file is written next to its destination and renamed into place, so readers never see a
/// partial checkpoint.
///
/// # Arguments
/// * `path` - The destination file.
/// * `params` - The parameters to persist.
/// * `meta` - The training progress to store in the header.
pub fn save(path: &Path, params: &Parameters, meta: &CheckpointMeta) -> Result<()> {
    let values = params.values();
    let mut tensors = Vec::with_capacity(params.layout().tensors().len());

    for spec in params.layout().tensors() {
        let bytes: &[u8] = bytemuck::cast_slice(&values[spec.range()]);
        let view = TensorView::new(Dtype::F32, spec.shape().to_vec(), bytes)?;
        tensors.push((spec.name().to_string(), view));
    }

    let mut header = HashMap::new();
    if let Some(episode) = meta.episode {
        header.insert(EPISODE_KEY.to_string(), episode.to_string());
    }
    if let Some(moving_average) = meta.moving_average {
        header.insert(MOVING_AVERAGE_KEY.to_string(), moving_average.to_string());
    }

    let bytes = serialize(tensors, &Some(header))?;

    let tmp = path.with_extension("safetensors.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;

    debug!("saved checkpoint {}", path.display());
    Ok(())
}

/// Reads a checkpoint written by `save`, checking it against the given layout.
///
/// # Arguments
/// * `path` - The checkpoint file.
/// * `layout` - The layout the parameters must follow.
///
/// # Returns
/// The parameters and the stored progress, `CheckpointMissing` if the file doesn't exist or an
/// error if any tensor is missing or shaped differently than in the layout.
pub fn load(path: &Path, layout: &Arc<ParamLayout>) -> Result<(Parameters, CheckpointMeta)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MlErr::CheckpointMissing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut values = Vec::with_capacity(layout.len());

    for spec in layout.tensors() {
        let Ok(view) = tensors.tensor(spec.name()) else {
            return Err(MlErr::CheckpointTensor {
                name: spec.name().to_string(),
                reason: "is missing",
            });
        };

        if view.dtype() != Dtype::F32 || view.shape() != spec.shape() {
            return Err(MlErr::CheckpointTensor {
                name: spec.name().to_string(),
                reason: "doesn't match the model layout",
            });
        }

        values.extend(
            view.data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
    }

    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let meta = match header.metadata() {
        Some(map) => CheckpointMeta {
            episode: map.get(EPISODE_KEY).and_then(|s| s.parse().ok()),
            moving_average: map.get(MOVING_AVERAGE_KEY).and_then(|s| s.parse().ok()),
        },
        None => CheckpointMeta::default(),
    };

    let params = Parameters::new(Arc::clone(layout), values)?;
    Ok((params, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActorCriticModel;

    fn params(model: &ActorCriticModel) -> Parameters {
        let values = (0..model.size()).map(|i| i as f32 * 0.25 - 3.).collect();
        Parameters::new(Arc::clone(model.layout()), values).unwrap()
    }

    #[test]
    fn slots_are_named_after_their_index() {
        let dir = Path::new("out");

        assert_eq!(
            CheckpointSlot::Index(3).path(dir),
            dir.join("checkpoint_3.safetensors")
        );
        assert_eq!(
            CheckpointSlot::Best.file_name(),
            "checkpoint_best.safetensors"
        );
    }

    #[test]
    fn saved_checkpoints_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = CheckpointSlot::Best.path(dir.path());
        let model = ActorCriticModel::new(4, 2, 6);
        let params = params(&model);
        let meta = CheckpointMeta {
            episode: Some(12),
            moving_average: Some(17.5),
        };

        save(&path, &params, &meta).unwrap();
        let (loaded, loaded_meta) = load(&path, model.layout()).unwrap();

        assert_eq!(loaded, params);
        assert_eq!(loaded_meta, meta);
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = CheckpointSlot::Index(0).path(dir.path());
        let model = ActorCriticModel::new(4, 2, 6);

        assert!(matches!(
            load(&path, model.layout()),
            Err(MlErr::CheckpointMissing(p)) if p == path
        ));
    }

    #[test]
    fn layout_mismatches_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = CheckpointSlot::Final.path(dir.path());
        let model = ActorCriticModel::new(4, 2, 6);
        let wider = ActorCriticModel::new(4, 2, 8);

        save(&path, &params(&model), &CheckpointMeta::default()).unwrap();

        assert!(matches!(
            load(&path, wider.layout()),
            Err(MlErr::CheckpointTensor { .. })
        ));
    }
}
