use std::path::Path;

use crate::config::Config;

pub fn check(cfg: &Config, db_path: &Path) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    // Check 1: database directory exists or can be created
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(dir) {
            errors.push(format!(
                "cannot create database directory {}: {e}\n  \
                 → pass --db with a writable location",
                dir.display()
            ));
        }
    }

    // Check 2: existing database is a regular file
    if db_path.exists() && !db_path.is_file() {
        errors.push(format!("{} exists but is not a regular file", db_path.display()));
    }

    // Check 3: key file readable and well-formed
    if let Some(key_file) = &cfg.key_file {
        match std::fs::read_to_string(key_file) {
            Ok(contents) if contents.trim().len() == 64 => {}
            Ok(_) => errors.push(format!(
                "{} must hold 64 hex characters (a 32-byte key)\n  \
                 → generate one: head -c32 /dev/urandom | xxd -p -c64",
                key_file.display()
            )),
            Err(e) => errors.push(format!("cannot read key file {}: {e}", key_file.display())),
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
