use crate::amacl::AmaclManager;
use crate::cred::CredentialManager;
use crate::crypto::CryptoProvider;
use crate::doxm::Doxm;
use crate::pstat::PstatManager;
use crate::store::SvrDatabase;

/// All SVR state of one device: the database plus every resource manager
/// loaded from it. Requests are handled one at a time through `&mut self`.
pub struct SvrContext<D, C> {
    pub db: SvrDatabase,
    pub creds: CredentialManager,
    pub pstat: PstatManager,
    pub amacl: AmaclManager,
    pub doxm: D,
    pub crypto: C,
    pub(crate) last_cred_message_id: Option<u16>,
    pub(crate) last_pstat_message_id: Option<u16>,
}

impl<D: Doxm, C: CryptoProvider> SvrContext<D, C> {
    /// Load every manager. Missing or corrupt resources fall back to their
    /// defaults, so this cannot fail.
    pub fn init(db: SvrDatabase, doxm: D, crypto: C) -> Self {
        let device_id = doxm.device_id();
        let creds = CredentialManager::init(&db, device_id);
        let pstat = PstatManager::init(&db, device_id);
        let amacl = AmaclManager::init(&db);
        tracing::info!(device = %device_id, status = ?db.check(), "SVR context initialized");
        Self {
            db,
            creds,
            pstat,
            amacl,
            doxm,
            crypto,
            last_cred_message_id: None,
            last_pstat_message_id: None,
        }
    }

    /// Re-read every resource from the database.
    pub fn reload(&mut self) {
        self.doxm.reinit(&self.db);
        let device_id = self.doxm.device_id();
        self.creds = CredentialManager::init(&self.db, device_id);
        self.pstat = PstatManager::init(&self.db, device_id);
        self.amacl = AmaclManager::init(&self.db);
    }

    /// Snapshot the current acl/cred/pstat/doxm as the reset profile.
    pub fn create_reset_profile(&self) -> crate::Result<()> {
        self.db.create_reset_profile()?;
        Ok(())
    }

    /// Restore the database from the reset profile and reload all managers.
    pub fn reset_secure_resources(&mut self) -> crate::Result<()> {
        self.db.reset_to_profile()?;
        self.reload();
        tracing::info!("Secure resources reset to profile");
        Ok(())
    }
}
