//! Events sent from the engine to the host.

use serde::{Deserialize, Serialize};

use crate::state::ErrorCode;
use crate::types::DeviceKind;

/// Events that the engine delivers to host callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderEvent {
    /// Accumulated recording duration in milliseconds.
    Duration(u64),

    /// A device of the given kind was added, removed or became default.
    DeviceChanged(DeviceKind),

    /// An asynchronous failure moved the session to the error state.
    Error(ErrorCode),
}

impl RecorderEvent {
    /// Whether losing this event would hide a state change from the host.
    pub fn is_critical(&self) -> bool {
        !matches!(self, Self::Duration(_))
    }
}
