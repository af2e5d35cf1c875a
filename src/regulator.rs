//! Voltage regulator control.
//!
//! Regulators are provided by the platform. Calls are synchronous and may
//! block briefly; nothing here serialises them beyond the rail sequencer.

use std::sync::Arc;

use crate::error::Result;

/// One named regulator.
pub trait Regulator: Send + Sync {
    fn name(&self) -> &str;

    fn enable(&self) -> Result<()>;

    fn disable(&self) -> Result<()>;
}

/// Source of named regulators.
pub trait RegulatorProvider: Send + Sync {
    /// Look up and claim `name`.
    fn acquire(&self, name: &str) -> Result<Arc<dyn Regulator>>;

    /// Give back a regulator obtained from [`acquire`](Self::acquire).
    fn release(&self, regulator: Arc<dyn Regulator>);
}
