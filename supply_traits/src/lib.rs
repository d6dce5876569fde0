pub mod clock;
pub mod registry;

pub use clock::{Clock, MonotonicClock};
pub use registry::{ActiveSlot, Registry, Stoppable, Token};

/// Error type crossing the instrument trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Facade over a bench power supply.
///
/// Readings return the last value the instrument's own polling loop observed;
/// they never block on the wire. When disconnected, reads return stale values
/// and `set_voltage` is a no-op that reports an error.
pub trait PowerSupply: Send + Sync {
    fn voltage(&self) -> f64;
    fn current(&self) -> f64;
    fn power(&self) -> f64;
    /// Last voltage successfully commanded via `set_voltage`.
    fn target_voltage(&self) -> f64;
    fn set_voltage(&self, volts: f64) -> Result<(), BoxError>;
    fn is_connected(&self) -> bool;
}

impl<T: PowerSupply + ?Sized> PowerSupply for std::sync::Arc<T> {
    fn voltage(&self) -> f64 {
        (**self).voltage()
    }
    fn current(&self) -> f64 {
        (**self).current()
    }
    fn power(&self) -> f64 {
        (**self).power()
    }
    fn target_voltage(&self) -> f64 {
        (**self).target_voltage()
    }
    fn set_voltage(&self, volts: f64) -> Result<(), BoxError> {
        (**self).set_voltage(volts)
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
