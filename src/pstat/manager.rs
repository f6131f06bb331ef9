use uuid::Uuid;

use crate::cbor::CodecError;
use crate::store::{StoreError, SvrDatabase, OIC_JSON_PSTAT_NAME};

use super::codec::{pstat_from_cbor, pstat_to_cbor};
use super::{classify_transition, Dpm, Dpom, Pstat, PstatError, ProvisioningState, Transition};

/// The device's single provisioning-status instance.
#[derive(Debug, Default)]
pub struct PstatManager {
    pstat: Pstat,
}

impl PstatManager {
    /// Load `pstat`, or start from the unowned default when it is missing or
    /// unreadable.
    pub fn init(db: &SvrDatabase, device_id: Uuid) -> Self {
        let mut pstat = match db.read_resource(OIC_JSON_PSTAT_NAME) {
            Ok(bytes) => pstat_from_cbor(&bytes, &Pstat::default()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stored pstat is unreadable, using default");
                Pstat::default()
            }),
            Err(StoreError::NotFound) => {
                tracing::debug!("No pstat stored, using default");
                Pstat::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reading pstat failed, using default");
                Pstat::default()
            }
        };
        if pstat.device_id.is_nil() {
            pstat.device_id = device_id;
        }
        tracing::info!(state = ?pstat.provisioning_state(), "Pstat ready");
        Self { pstat }
    }

    pub fn load(db: &SvrDatabase) -> Result<Self, PstatError> {
        let pstat = match db.read_resource(OIC_JSON_PSTAT_NAME) {
            Ok(bytes) => pstat_from_cbor(&bytes, &Pstat::default())?,
            Err(StoreError::NotFound) => Pstat::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { pstat })
    }

    pub fn pstat(&self) -> &Pstat {
        &self.pstat
    }

    pub fn is_op(&self) -> bool {
        self.pstat.is_op
    }

    pub fn cm(&self) -> Dpm {
        self.pstat.cm
    }

    pub fn tm(&self) -> Dpm {
        self.pstat.tm
    }

    pub fn om(&self) -> Dpom {
        self.pstat.om
    }

    pub fn sm(&self) -> &[Dpom] {
        &self.pstat.sm
    }

    pub fn device_id(&self) -> Uuid {
        self.pstat.device_id
    }

    pub fn rowner(&self) -> Uuid {
        self.pstat.rowner
    }

    pub fn provisioning_state(&self) -> ProvisioningState {
        self.pstat.provisioning_state()
    }

    pub fn set_cm(&mut self, db: &SvrDatabase, cm: Dpm) -> Result<(), PstatError> {
        self.mutate(db, |p| {
            p.cm = cm;
            Ok(())
        })
    }

    pub fn set_tm(&mut self, db: &SvrDatabase, tm: Dpm) -> Result<(), PstatError> {
        self.mutate(db, |p| {
            p.tm = tm;
            Ok(())
        })
    }

    pub fn set_op_mode(&mut self, db: &SvrDatabase, om: Dpom) -> Result<(), PstatError> {
        self.mutate(db, |p| {
            if !p.sm.contains(&om) {
                return Err(PstatError::UnsupportedMode(om));
            }
            p.om = om;
            Ok(())
        })
    }

    pub fn set_rowner(&mut self, db: &SvrDatabase, rowner: Uuid) -> Result<(), PstatError> {
        self.mutate(db, |p| {
            p.rowner = rowner;
            Ok(())
        })
    }

    pub fn set_device_id(&mut self, db: &SvrDatabase, device_id: Uuid) -> Result<(), PstatError> {
        self.mutate(db, |p| {
            p.device_id = device_id;
            Ok(())
        })
    }

    /// Validate and apply a client write. `update.sm` is ignored: the
    /// supported modes are the device's, not the client's.
    ///
    /// A rejected write leaves the current state untouched.
    pub fn apply_update(&mut self, db: &SvrDatabase, update: &Pstat) -> Result<Transition, PstatError> {
        if !self.pstat.sm.contains(&update.om) {
            tracing::warn!(om = ?update.om, "Operation mode not in supported modes");
            return Err(PstatError::UnsupportedMode(update.om));
        }
        let transition = classify_transition(update.cm, update.is_op, true)?;

        self.mutate(db, |p| {
            p.is_op = update.is_op;
            p.cm = update.cm;
            p.tm = update.tm;
            p.om = update.om;
            if !update.rowner.is_nil() {
                p.rowner = update.rowner;
            }
            Ok(())
        })?;
        tracing::info!(?transition, state = ?self.pstat.provisioning_state(), "Pstat updated");
        Ok(transition)
    }

    /// Put the device back to "ready for ownership transfer" after a failed
    /// transfer. Memory is updated even if the write fails.
    pub fn restore_to_init_state(&mut self, db: &SvrDatabase) -> Result<(), PstatError> {
        tracing::info!("Restoring pstat to initial state");
        self.pstat.cm = self.pstat.cm | Dpm::TAKE_OWNER;
        self.pstat.tm = self.pstat.tm & !Dpm::TAKE_OWNER;
        self.pstat.om = Dpom::SingleServiceClientDriven;
        match self.pstat.sm.first_mut() {
            Some(first) => *first = Dpom::SingleServiceClientDriven,
            None => self.pstat.sm.push(Dpom::SingleServiceClientDriven),
        }
        persist(db, &self.pstat)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        pstat_to_cbor(&self.pstat)
    }

    fn mutate(
        &mut self,
        db: &SvrDatabase,
        op: impl FnOnce(&mut Pstat) -> Result<(), PstatError>,
    ) -> Result<(), PstatError> {
        let mut working = self.pstat.clone();
        op(&mut working)?;
        persist(db, &working)?;
        self.pstat = working;
        Ok(())
    }
}

fn persist(db: &SvrDatabase, pstat: &Pstat) -> Result<(), PstatError> {
    let payload = pstat_to_cbor(pstat)?;
    db.write_resource(OIC_JSON_PSTAT_NAME, &payload)?;
    Ok(())
}
