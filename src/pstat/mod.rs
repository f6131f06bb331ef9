pub mod codec;
pub mod manager;

use std::ops::{BitAnd, BitOr, Not};

use uuid::Uuid;

use crate::cbor::CodecError;
use crate::store::StoreError;

pub use codec::{pstat_from_cbor, pstat_to_cbor};
pub use manager::PstatManager;

#[derive(Debug, thiserror::Error)]
pub enum PstatError {
    #[error("operation mode {0:?} is not supported")]
    UnsupportedMode(Dpom),
    #[error("illegal provisioning transition (cm={cm:#04x}, isop={is_op})")]
    IllegalTransition { cm: u8, is_op: bool },
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Device provisioning mode bits (`cm`/`tm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dpm(pub u8);

impl Dpm {
    pub const NORMAL: Dpm = Dpm(0);
    pub const RESET: Dpm = Dpm(1 << 0);
    pub const TAKE_OWNER: Dpm = Dpm(1 << 1);
    pub const BOOTSTRAP_SERVICE: Dpm = Dpm(1 << 2);
    pub const SECURITY_MANAGEMENT_SERVICES: Dpm = Dpm(1 << 3);
    pub const PROVISION_CREDENTIALS: Dpm = Dpm(1 << 4);
    pub const PROVISION_ACLS: Dpm = Dpm(1 << 5);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Dpm) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for Dpm {
    type Output = Dpm;
    fn bitor(self, rhs: Dpm) -> Dpm {
        Dpm(self.0 | rhs.0)
    }
}

impl BitAnd for Dpm {
    type Output = Dpm;
    fn bitand(self, rhs: Dpm) -> Dpm {
        Dpm(self.0 & rhs.0)
    }
}

impl Not for Dpm {
    type Output = Dpm;
    fn not(self) -> Dpm {
        Dpm(!self.0)
    }
}

/// Directed provisioning operation mode (`om`, members of `sm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dpom {
    MultipleServiceServerDriven = 0,
    SingleServiceServerDriven = 1,
    MultipleServiceClientDriven = 2,
    SingleServiceClientDriven = 3,
}

impl TryFrom<u64> for Dpom {
    type Error = CodecError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::MultipleServiceServerDriven),
            1 => Ok(Self::SingleServiceServerDriven),
            2 => Ok(Self::MultipleServiceClientDriven),
            3 => Ok(Self::SingleServiceClientDriven),
            _ => Err(CodecError::OutOfRange("om")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pstat {
    pub is_op: bool,
    pub cm: Dpm,
    pub tm: Dpm,
    pub om: Dpom,
    pub sm: Vec<Dpom>,
    pub device_id: Uuid,
    pub rowner: Uuid,
}

impl Default for Pstat {
    /// An unowned device waiting for ownership transfer.
    fn default() -> Self {
        Self {
            is_op: false,
            cm: Dpm::TAKE_OWNER,
            tm: Dpm::NORMAL,
            om: Dpom::SingleServiceClientDriven,
            sm: vec![Dpom::SingleServiceClientDriven],
            device_id: Uuid::nil(),
            rowner: Uuid::nil(),
        }
    }
}

impl Pstat {
    pub fn provisioning_state(&self) -> ProvisioningState {
        match (self.cm.contains(Dpm::TAKE_OWNER), self.is_op) {
            (true, false) => ProvisioningState::ReadyForOtm,
            (false, false) => ProvisioningState::ReadyForProvisioning,
            (false, true) => ProvisioningState::ReadyForNormalOperation,
            (true, true) => ProvisioningState::NotReadyForOtm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    NotReadyForOtm,
    ReadyForOtm,
    ReadyForProvisioning,
    ReadyForNormalOperation,
}

/// What an accepted pstat write asks the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Reset,
    TakeOwner,
    Provisioning,
    NormalOperation,
}

/// The four legal `(cm, isop)` combinations of a pstat write. `om` must
/// already have been checked against `sm`.
pub fn classify_transition(cm: Dpm, is_op: bool, om_supported: bool) -> Result<Transition, PstatError> {
    let reset = cm.contains(Dpm::RESET);
    let take_owner = cm.contains(Dpm::TAKE_OWNER);
    match (reset, take_owner, is_op, om_supported) {
        (true, false, false, true) => Ok(Transition::Reset),
        (false, true, false, true) => Ok(Transition::TakeOwner),
        (false, false, false, true) => Ok(Transition::Provisioning),
        (false, false, true, true) => Ok(Transition::NormalOperation),
        _ => Err(PstatError::IllegalTransition { cm: cm.bits(), is_op }),
    }
}
