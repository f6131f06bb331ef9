pub mod amacl;
pub mod cbor;
pub mod config;
pub mod context;
pub mod cred;
pub mod crypto;
pub mod diagnostics;
pub mod doxm;
pub mod error;
pub mod handler;
pub mod pstat;
pub mod store;

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use config::Command;
use cred::CredentialManager;
use pstat::PstatManager;
use store::{EncryptedStorage, FileStorage, MemoryStorage, PersistentStorage, PsStatus, SvrDatabase};

pub use context::SvrContext;
pub use error::{Error, Result};

pub fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    let db_path = match &cfg.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    tracing::info!(db = %db_path.display(), "Starting svrdb");

    // Preflight checks
    diagnostics::check(&cfg, &db_path)?;

    // Single-instance lock
    let lock_dir = std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| db_path.parent().map(Path::to_path_buf).unwrap_or_default());
    let lock_path = lock_dir.join("svrdb.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock.try_write()
        .map_err(|_| anyhow::anyhow!("svrdb is already running (lock: {})", lock_path.display()))?;

    let key = cfg.key_file.as_deref().map(load_key).transpose()?;

    if let Command::Encrypt { from } = &cfg.command {
        let key = key.ok_or_else(|| anyhow::anyhow!("encrypt needs --key-file"))?;
        return encrypt(&db_path, from.as_deref(), &key);
    }

    let db = match &key {
        Some(key) => SvrDatabase::new(EncryptedStorage::new(**key, FileStorage::new(&db_path))),
        None => SvrDatabase::new(FileStorage::new(&db_path)),
    };

    match cfg.command {
        Command::Check => {
            let status = db.check();
            println!("{}: {status:?}", db_path.display());
            if matches!(status, PsStatus::OpenFail | PsStatus::ParseFail) {
                anyhow::bail!("database is not usable");
            }
        }
        Command::List => {
            for (name, len) in db.resources()? {
                println!("{name:<10} {len:>6} bytes");
            }
        }
        Command::Dump { name } => {
            let bytes = db.read_resource(&name)
                .map_err(|e| anyhow::anyhow!("cannot read resource {name:?}: {e}"))?;
            println!("{}", hex::encode(bytes));
        }
        Command::Creds => print_creds(&CredentialManager::load(&db)?),
        Command::Pstat => print_pstat(&PstatManager::load(&db)?),
        Command::RemoveCred { id } => {
            let mut creds = CredentialManager::load(&db)?;
            if creds.remove_by_id(&db, id)? {
                println!("Deleted credential {id}");
            } else {
                println!("No credential with id {id}");
            }
        }
        Command::RemoveAllCreds => {
            let mut creds = CredentialManager::load(&db)?;
            let count = creds.creds().len();
            creds.remove_all(&db)?;
            println!("Deleted {count} credential(s)");
        }
        Command::CreateResetProfile => {
            db.create_reset_profile()?;
            println!("Reset profile created");
        }
        Command::Reset => {
            db.reset_to_profile()
                .map_err(|e| anyhow::anyhow!("reset failed (is there a reset profile?): {e}"))?;
            println!("Database reset to profile");
        }
        Command::Encrypt { .. } => {}
    }
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let data_dir = directories::ProjectDirs::from("", "", "svrdb")
        .ok_or_else(|| anyhow::anyhow!("cannot determine XDG data dir"))?
        .data_dir()
        .to_path_buf();
    Ok(data_dir.join(config::SVR_DB_DAT_FILE_NAME))
}

fn load_key(path: &Path) -> anyhow::Result<Zeroizing<[u8; 32]>> {
    let contents = Zeroizing::new(std::fs::read_to_string(path)?);
    let bytes = Zeroizing::new(
        hex::decode(contents.trim()).map_err(|e| anyhow::anyhow!("invalid key file: {e}"))?,
    );
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("key file must hold exactly 32 bytes"))?;
    Ok(Zeroizing::new(key))
}

fn encrypt(db_path: &Path, from: Option<&Path>, key: &Zeroizing<[u8; 32]>) -> anyhow::Result<()> {
    let sealed = EncryptedStorage::new(**key, FileStorage::new(db_path));
    match from {
        Some(src) if src != db_path => {
            if !sealed.adopt_plaintext(&FileStorage::new(src))? {
                anyhow::bail!("nothing to encrypt in {}", src.display());
            }
        }
        _ => {
            // in place: refuse to double-encrypt or seal garbage
            let plain = FileStorage::new(db_path);
            let bytes = match plain.load()? {
                Some(bytes) if !bytes.is_empty() => Zeroizing::new(bytes),
                _ => anyhow::bail!("nothing to encrypt in {}", db_path.display()),
            };
            let candidate = SvrDatabase::new(MemoryStorage::with_contents(bytes.to_vec()));
            if candidate.check() != PsStatus::Normal {
                anyhow::bail!("{} is not a plaintext SVR database", db_path.display());
            }
            sealed.store(&bytes)?;
        }
    }
    println!("Encrypted database written to {}", db_path.display());
    Ok(())
}

fn print_creds(mgr: &CredentialManager) {
    println!("rowner: {}", mgr.rowner());
    for cred in mgr.creds() {
        println!("[{}] {} {:?}", cred.cred_id, cred.subject, cred.cred_type);
        if let Some(key) = &cred.private_data {
            println!("    private:  {:?} ({} bytes)", key.encoding(), key.as_bytes().len());
        }
        if let Some(key) = &cred.public_data {
            println!("    public:   {key:?}");
        }
        if let Some(opt) = &cred.optional_data {
            println!("    optional: {:?} revstat={}", opt.data, opt.revstat);
        }
        if let Some(usage) = &cred.cred_usage {
            println!("    usage:    {usage}");
        }
        if let Some(period) = &cred.period {
            println!("    period:   {period}");
        }
        if let Some(eowner) = &cred.eowner_id {
            println!("    eowner:   {eowner}");
        }
    }
}

fn print_pstat(mgr: &PstatManager) {
    let p = mgr.pstat();
    println!("state:      {:?}", p.provisioning_state());
    println!("isop:       {}", p.is_op);
    println!("cm:         {:#04x}", p.cm.bits());
    println!("tm:         {:#04x}", p.tm.bits());
    println!("om:         {:?}", p.om);
    println!("sm:         {:?}", p.sm);
    println!("deviceuuid: {}", p.device_id);
    println!("rowneruuid: {}", p.rowner);
}
