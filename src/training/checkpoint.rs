/// Model checkpointing with safetensors
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;

/// Checkpoint metadata, stored as a JSON sidecar next to the tensors
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    /// Epoch (1-based) the parameters were captured at
    pub epoch: usize,
    /// Validation loss at checkpoint
    pub val_loss: Option<f64>,
    /// Model configuration (as JSON string)
    pub config: Option<String>,
}

/// Model checkpoint
pub struct Checkpoint {
    /// Model parameters
    pub tensors: HashMap<String, Tensor>,
    /// Metadata
    pub metadata: CheckpointMetadata,
}

/// `model.safetensors` -> `model.safetensors.json`
pub fn metadata_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

impl Checkpoint {
    /// Create new checkpoint
    pub fn new(tensors: HashMap<String, Tensor>, metadata: CheckpointMetadata) -> Self {
        Self { tensors, metadata }
    }

    /// Snapshot every variable of a VarMap
    ///
    /// Tensors are copied so later optimizer steps do not alter the snapshot.
    pub fn from_varmap(varmap: &VarMap, metadata: CheckpointMetadata) -> crate::Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| crate::SeqError::Checkpoint(format!("VarMap lock poisoned: {}", e)))?;

        let mut tensors = HashMap::with_capacity(data.len());
        for (name, var) in data.iter() {
            tensors.insert(name.clone(), var.as_tensor().copy()?);
        }

        Ok(Self { tensors, metadata })
    }

    /// Save checkpoint to file
    ///
    /// # Arguments
    /// * `path` - Path of the safetensors file; metadata goes to `<path>.json`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        candle_core::safetensors::save(&self.tensors, path)?;

        let metadata_json = serde_json::to_string_pretty(&self.metadata)?;
        std::fs::write(metadata_path(path), metadata_json.as_bytes())?;

        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Arguments
    /// * `path` - Path to checkpoint file
    /// * `device` - Device to load tensors on
    ///
    /// # Returns
    /// Loaded checkpoint; metadata defaults when the sidecar is absent
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::SeqError::Checkpoint(format!(
                "Checkpoint not found: {}",
                path.display()
            )));
        }

        let tensors = candle_core::safetensors::load(path, device)?;

        let sidecar = metadata_path(path);
        let metadata: CheckpointMetadata = if sidecar.exists() {
            serde_json::from_slice(&std::fs::read(&sidecar)?)?
        } else {
            log::warn!("{} not found, using default metadata", sidecar.display());
            CheckpointMetadata::default()
        };

        Ok(Self { tensors, metadata })
    }

    /// Write the stored tensors back into the matching variables
    ///
    /// Every variable must have a tensor of identical shape.
    pub fn restore_into(&self, varmap: &VarMap) -> crate::Result<()> {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| crate::SeqError::Checkpoint(format!("VarMap lock poisoned: {}", e)))?;

        for (name, var) in data.iter() {
            let tensor = self.tensors.get(name).ok_or_else(|| {
                crate::SeqError::Checkpoint(format!("Missing tensor '{}' in checkpoint", name))
            })?;

            if tensor.dims() != var.as_tensor().dims() {
                return Err(crate::SeqError::Checkpoint(format!(
                    "Shape mismatch for '{}': checkpoint {:?} != model {:?}",
                    name,
                    tensor.dims(),
                    var.as_tensor().dims()
                )));
            }

            let tensor = if tensor.dtype() != var.dtype() {
                tensor.to_dtype(var.dtype())?
            } else {
                tensor.clone()
            };
            var.set(&tensor)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};

    fn varmap_with_weight(device: &Device) -> candle_core::Result<VarMap> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        vb.get_with_hints((5, 5), "weight", Init::Const(1.0))?;
        vb.get_with_hints(5, "bias", Init::Const(0.0))?;
        Ok(varmap)
    }

    fn weight_sum(varmap: &VarMap) -> f32 {
        let data = varmap.data().lock().unwrap();
        let sum = data["weight"].as_tensor().sum_all().unwrap().to_scalar::<f32>().unwrap();
        sum
    }

    #[test]
    fn test_metadata_path() {
        assert_eq!(
            metadata_path(Path::new("ckpt/best.safetensors")),
            PathBuf::from("ckpt/best.safetensors.json")
        );
    }

    #[test]
    fn test_save_load_roundtrip() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = varmap_with_weight(&device)?;
        let metadata = CheckpointMetadata {
            epoch: 3,
            val_loss: Some(0.25),
            config: Some("{}".to_string()),
        };

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("best.safetensors");
        Checkpoint::from_varmap(&varmap, metadata.clone())?.save(&path)?;

        let loaded = Checkpoint::load(&path, &device)?;
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.tensors.len(), 2);
        assert_eq!(loaded.tensors["weight"].dims(), &[5, 5]);
        Ok(())
    }

    #[test]
    fn test_snapshot_is_independent_of_later_updates() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = varmap_with_weight(&device)?;
        let checkpoint = Checkpoint::from_varmap(&varmap, CheckpointMetadata::default())?;

        let zeros = Tensor::zeros((5, 5), DType::F32, &device)?;
        varmap.data().lock().unwrap()["weight"].set(&zeros)?;
        assert_eq!(weight_sum(&varmap), 0.0);

        checkpoint.restore_into(&varmap)?;
        assert_eq!(weight_sum(&varmap), 25.0);
        Ok(())
    }

    #[test]
    fn test_restore_rejects_mismatches() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = varmap_with_weight(&device)?;

        let mut tensors = HashMap::new();
        tensors.insert("weight".to_string(), Tensor::ones((5, 5), DType::F32, &device)?);
        let missing_bias = Checkpoint::new(tensors.clone(), CheckpointMetadata::default());
        assert!(matches!(
            missing_bias.restore_into(&varmap),
            Err(crate::SeqError::Checkpoint(_))
        ));

        tensors.insert("bias".to_string(), Tensor::ones(4, DType::F32, &device)?);
        let wrong_shape = Checkpoint::new(tensors, CheckpointMetadata::default());
        assert!(matches!(
            wrong_shape.restore_into(&varmap),
            Err(crate::SeqError::Checkpoint(_))
        ));
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let result = Checkpoint::load("no_such_checkpoint.safetensors", &Device::Cpu);
        assert!(matches!(result, Err(crate::SeqError::Checkpoint(_))));
    }

    #[test]
    fn test_load_without_sidecar_uses_defaults() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = varmap_with_weight(&device)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        varmap.save(&path)?;

        let loaded = Checkpoint::load(&path, &device)?;
        assert_eq!(loaded.metadata, CheckpointMetadata::default());
        assert_eq!(loaded.tensors.len(), 2);
        Ok(())
    }
}
