/// Weight loading from safetensors files
use std::path::Path;
use candle_core::{Device, DType};
use candle_nn::VarBuilder;
use crate::config::ModelConfig;
use super::RnnModel;

/// Load model from safetensors file
///
/// # Arguments
/// * `config` - Model configuration the weights were trained with
/// * `weights_path` - Path to safetensors file (e.g. an early-stopping checkpoint)
/// * `device` - Device to load model on
///
/// # Returns
/// Loaded RnnModel, ready for inference
pub fn load_model<P: AsRef<Path>>(
    config: ModelConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<RnnModel> {
    let dtype = DType::F32;
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(
            &[weights_path.as_ref()],
            dtype,
            device,
        )?
    };

    RnnModel::new(config, vb)
}
