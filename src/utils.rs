/// Utility functions for training runs
use std::time::Duration;
use candle_nn::VarMap;

/// Split an elapsed duration into whole minutes and leftover whole seconds
pub fn epoch_time(elapsed: Duration) -> (u64, u64) {
    let secs = elapsed.as_secs();
    (secs / 60, secs % 60)
}

/// Total number of scalar parameters held by a VarMap
pub fn count_parameters(varmap: &VarMap) -> usize {
    varmap
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().elem_count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    #[test]
    fn test_epoch_time() {
        assert_eq!(epoch_time(Duration::from_millis(59_999)), (0, 59));
        assert_eq!(epoch_time(Duration::from_secs(61)), (1, 1));
        assert_eq!(epoch_time(Duration::from_secs(3600)), (60, 0));
    }

    #[test]
    fn test_count_parameters() -> candle_core::Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        candle_nn::linear(3, 2, vb.pp("fc"))?;
        assert_eq!(count_parameters(&varmap), 3 * 2 + 2);
        Ok(())
    }
}
