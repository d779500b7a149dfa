/// Loss criteria for per-timestep regression on sigmoid outputs
use candle_core::{Result, Tensor};

/// Predictions are clamped into [EPS, 1 - EPS] before taking logs
const BCE_EPS: f32 = 1e-7;

/// Training objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Mean squared error
    #[default]
    Mse,
    /// Binary cross-entropy on probabilities
    Bce,
}

impl Criterion {
    /// Mean loss over every (sequence, timestep) position
    ///
    /// # Arguments
    /// * `predictions` - Model output in [0, 1], shape [batch, seq_len]
    /// * `targets` - Targets of the same shape
    ///
    /// # Returns
    /// Scalar loss tensor
    pub fn loss(&self, predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let targets = if targets.dtype() != predictions.dtype() {
            targets.to_dtype(predictions.dtype())?
        } else {
            targets.clone()
        };

        match self {
            Criterion::Mse => candle_nn::loss::mse(predictions, &targets),
            Criterion::Bce => binary_cross_entropy(predictions, &targets),
        }
    }
}

/// -(t * ln(p) + (1 - t) * ln(1 - p)), averaged
fn binary_cross_entropy(predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let p = predictions.clamp(BCE_EPS, 1.0 - BCE_EPS)?;
    let pos = targets.mul(&p.log()?)?;
    let neg = targets.affine(-1.0, 1.0)?.mul(&p.affine(-1.0, 1.0)?.log()?)?;
    pos.add(&neg)?.neg()?.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_mse() -> Result<()> {
        let device = Device::Cpu;
        let pred = Tensor::new(&[[0.5f32, 1.0], [0.0, 0.25]], &device)?;
        let target = Tensor::new(&[[0.0f32, 1.0], [0.0, 0.75]], &device)?;

        let loss = Criterion::Mse.loss(&pred, &target)?.to_scalar::<f32>()?;
        assert!((loss - 0.125).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_bce_perfect_and_uniform() -> Result<()> {
        let device = Device::Cpu;
        let target = Tensor::new(&[[1.0f32, 0.0, 1.0]], &device)?;

        let perfect = Criterion::Bce.loss(&target, &target)?.to_scalar::<f32>()?;
        assert!(perfect.is_finite());
        assert!(perfect < 1e-5);

        let half = Tensor::full(0.5f32, (1, 3), &device)?;
        let uniform = Criterion::Bce.loss(&half, &target)?.to_scalar::<f32>()?;
        assert!((uniform - std::f32::consts::LN_2).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_target_dtype_is_cast() -> Result<()> {
        let device = Device::Cpu;
        let pred = Tensor::zeros((2, 2), DType::F32, &device)?;
        let target = Tensor::ones((2, 2), DType::F64, &device)?;
        let loss = Criterion::Mse.loss(&pred, &target)?;
        assert_eq!(loss.dtype(), DType::F32);
        assert!((loss.to_scalar::<f32>()? - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_fails() -> Result<()> {
        let device = Device::Cpu;
        let pred = Tensor::zeros((2, 3), DType::F32, &device)?;
        let target = Tensor::zeros((2, 4), DType::F32, &device)?;
        assert!(Criterion::Mse.loss(&pred, &target).is_err());
        Ok(())
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Criterion::Bce).unwrap(), "\"bce\"");
        assert_eq!(serde_json::from_str::<Criterion>("\"mse\"").unwrap(), Criterion::Mse);
    }
}
