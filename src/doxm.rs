//! The ownership-transfer resource is owned by another module; the SVR core
//! only reads its state and triggers its compensating restore.

use uuid::Uuid;

use crate::store::SvrDatabase;

pub trait Doxm {
    fn device_id(&self) -> Uuid;

    /// UUID of the current (or pending) owner.
    fn owner(&self) -> Uuid;

    fn is_owned(&self) -> bool;

    /// Label fed to owner-PSK derivation for the selected transfer method.
    fn oxm_label(&self) -> &[u8];

    fn multiple_owner_enabled(&self) -> bool {
        false
    }

    fn is_sub_owner(&self, _id: &Uuid) -> bool {
        false
    }

    /// Undo a half-finished ownership transfer.
    fn restore_to_init_state(&mut self);

    /// Reload state after the database was reset.
    fn reinit(&mut self, _db: &SvrDatabase) {}
}

/// Plain in-memory ownership state, for embedders without their own doxm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoxmState {
    pub device_id: Uuid,
    pub owner: Uuid,
    pub owned: bool,
    pub oxm_label: Vec<u8>,
    pub mom_enabled: bool,
    pub sub_owners: Vec<Uuid>,
}

impl Doxm for DoxmState {
    fn device_id(&self) -> Uuid {
        self.device_id
    }

    fn owner(&self) -> Uuid {
        self.owner
    }

    fn is_owned(&self) -> bool {
        self.owned
    }

    fn oxm_label(&self) -> &[u8] {
        &self.oxm_label
    }

    fn multiple_owner_enabled(&self) -> bool {
        self.mom_enabled
    }

    fn is_sub_owner(&self, id: &Uuid) -> bool {
        self.sub_owners.contains(id)
    }

    fn restore_to_init_state(&mut self) {
        if self.owned {
            return;
        }
        tracing::info!("Restoring doxm to initial state");
        self.owner = Uuid::nil();
        self.sub_owners.clear();
    }
}
