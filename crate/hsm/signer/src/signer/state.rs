use std::fmt::{self, Display, Formatter};

use crate::{HError, HResult};

/// Life cycle of one signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Uninitialized,
    /// A key is bound, no data yet
    Initialized,
    /// At least one update happened
    Accumulating,
    /// The signature was produced; the engine must be initialised again
    Finalized,
}

impl EngineState {
    /// Check that data may be fed in this state.
    pub(crate) fn check_update(self) -> HResult<()> {
        match self {
            Self::Initialized | Self::Accumulating => Ok(()),
            Self::Uninitialized => Err(HError::IllegalState(
                "update called before the engine was initialized".to_owned(),
            )),
            Self::Finalized => Err(HError::IllegalState(
                "update called after the signature was produced".to_owned(),
            )),
        }
    }

    /// Check that a signature may be produced in this state.
    pub(crate) fn check_finish(self) -> HResult<()> {
        match self {
            Self::Initialized | Self::Accumulating => Ok(()),
            Self::Uninitialized => Err(HError::IllegalState(
                "sign called before the engine was initialized".to_owned(),
            )),
            Self::Finalized => Err(HError::IllegalState(
                "sign called twice without re-initializing the engine".to_owned(),
            )),
        }
    }
}

impl Display for EngineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Accumulating => "accumulating",
            Self::Finalized => "finalized",
        })
    }
}
