//! Maps `Box<dyn Error>` from the `PowerSupply` boundary to typed `ExperimentError`.
//!
//! The facade trait returns `Box<dyn Error + Send + Sync>` so any transport can
//! sit behind it; this module recovers a typed error, with an optional
//! feature-gated path for `supply_hardware::SupplyError` downcasting.

use crate::error::ExperimentError;

/// Map a facade error to `ExperimentError::Instrument` with a stable message.
pub fn map_instrument_error(e: &(dyn std::error::Error + 'static)) -> ExperimentError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<supply_hardware::error::SupplyError>() {
            return match hw {
                supply_hardware::error::SupplyError::Disconnected => {
                    ExperimentError::Instrument("disconnected".into())
                }
                other => ExperimentError::Instrument(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("disconnect") || s.to_lowercase().contains("not connected") {
        ExperimentError::Instrument("disconnected".into())
    } else {
        ExperimentError::Instrument(s)
    }
}
