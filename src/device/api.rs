//! Device API trait definition

use crate::error::DeviceError;
use crate::model::{EntityState, ServiceCall};

/// Smart-home device command/state API
///
/// Implementations talk to the real home controller or simulate one. The
/// profiler and executor treat `Ok(None)` states and `Err` results as failure
/// signals and never panic on them.
pub trait DeviceApi: Send + Sync {
    /// Current state of one entity, `None` when it does not exist
    fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>, DeviceError>;

    /// Invoke a service such as `light.turn_on`
    fn call_service(&self, call: &ServiceCall) -> Result<(), DeviceError>;

    /// Every entity known to the API
    fn list_states(&self) -> Result<Vec<EntityState>, DeviceError>;
}
