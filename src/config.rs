use std::path::PathBuf;

use crate::cbor::EncodeBudget;

pub const SVR_DB_DAT_FILE_NAME: &str = "oic_svr_db.dat";

/// Credential lists can carry certificate chains, hence the larger ceiling.
pub const CRED_ENCODE_BUDGET: EncodeBudget = EncodeBudget { initial: 2048, ceiling: 64 * 1024 };
pub const PSTAT_ENCODE_BUDGET: EncodeBudget = EncodeBudget { initial: 512, ceiling: 4400 };
pub const AMACL_ENCODE_BUDGET: EncodeBudget = EncodeBudget { initial: 1024, ceiling: 4400 };

pub const OWNER_PSK_LENGTH_128: usize = 16;
pub const PRECONF_PIN_MIN_SIZE: usize = 8;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "svrdb", about = "Inspect and maintain a device's SVR database")]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Database file [default: <data dir>/oic_svr_db.dat]
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Hex-encoded 32-byte key; the database is then stored encrypted.
    #[arg(long)]
    pub key_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Parse the database and report its status.
    Check,
    /// List stored resources and their sizes.
    List,
    /// Print one resource's raw CBOR as hex.
    Dump {
        #[arg(long)]
        name: String,
    },
    /// Show the credential list (private data redacted).
    Creds,
    /// Show the provisioning status.
    Pstat,
    RemoveCred {
        #[arg(long)]
        id: u16,
    },
    RemoveAllCreds,
    /// Snapshot acl/cred/pstat/doxm as the reset profile.
    CreateResetProfile,
    /// Restore the database from the reset profile.
    Reset,
    /// Move a plaintext database into the encrypted one (needs --key-file).
    Encrypt {
        /// Plaintext database to migrate [default: --db]
        #[arg(long)]
        from: Option<PathBuf>,
    },
}
