use uuid::Uuid;

use svrdb::cred::{CredType, Credential, CredentialManager, PrivateKey, Subject};
use svrdb::store::{
    EncryptedStorage, FileStorage, PersistentStorage, PsStatus, StoreError, SvrDatabase,
    OIC_JSON_CRED_NAME, OIC_JSON_RESET_PF_NAME,
};

const DEVICE: Uuid = Uuid::from_bytes([0xDE; 16]);

fn psk(n: u8) -> Credential {
    Credential::new(Uuid::from_bytes([n; 16]), CredType::SymmetricPairWiseKey)
        .with_private_data(PrivateKey::raw(&[n; 16]))
}

#[test]
fn test_file_database_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oic_svr_db.dat");

    {
        let db = SvrDatabase::open_file(&path);
        db.write_resource("acl", &[0xA1, 0x01, 0x02]).unwrap();
        db.write_resource("doxm", &[0xA0]).unwrap();
        db.write_resource("acl", &[0xA0]).unwrap();
    }

    // Reload from disk
    let db = SvrDatabase::open_file(&path);
    assert_eq!(db.check(), PsStatus::Normal);
    assert_eq!(db.read_resource("acl").unwrap(), vec![0xA0]);
    assert_eq!(db.read_resource("doxm").unwrap(), vec![0xA0]);
    let names: Vec<String> = db.resources().unwrap().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["acl".to_string(), "doxm".to_string()]);
    assert!(!dir.path().join("oic_svr_db.dat.tmp").exists());
}

#[test]
fn test_corrupt_file_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oic_svr_db.dat");
    std::fs::write(&path, b"\x82\x01").unwrap();

    let db = SvrDatabase::open_file(&path);
    assert_eq!(db.check(), PsStatus::ParseFail);
    assert!(matches!(db.write_resource("cred", &[0xA0]).unwrap_err(), StoreError::Corrupt(_)));
    assert_eq!(std::fs::read(&path).unwrap(), b"\x82\x01");

    // managers still come up on defaults
    assert!(CredentialManager::init(&db, DEVICE).creds().is_empty());
}

#[test]
fn test_encrypted_database_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oic_svr_db.dat");
    let key = [0xABu8; 32];

    {
        let db = SvrDatabase::new(EncryptedStorage::new(key, FileStorage::new(&path)));
        let mut creds = CredentialManager::init(&db, DEVICE);
        creds.add(&db, psk(1)).unwrap();
        creds.add(&db, psk(2)).unwrap();
    }

    let raw = std::fs::read(&path).unwrap();
    assert!(!raw.windows(16).any(|w| w == [1u8; 16]));

    let db = SvrDatabase::new(EncryptedStorage::new(key, FileStorage::new(&path)));
    assert_eq!(db.check(), PsStatus::Normal);
    let creds = CredentialManager::load(&db).unwrap();
    assert_eq!(creds.creds().len(), 2);
    assert_eq!(creds.psk_for_subject(&Uuid::from_bytes([2; 16])).unwrap().as_slice(), &[2u8; 16]);

    let wrong = SvrDatabase::new(EncryptedStorage::new([0u8; 32], FileStorage::new(&path)));
    assert_eq!(wrong.check(), PsStatus::OpenFail);
}

#[test]
fn test_plaintext_migration() {
    let dir = tempfile::tempdir().unwrap();
    let plain_path = dir.path().join("plain.dat");
    let sealed_path = dir.path().join("sealed.dat");

    let plain = SvrDatabase::open_file(&plain_path);
    CredentialManager::init(&plain, DEVICE).add(&plain, psk(3)).unwrap();

    let sealed = EncryptedStorage::new([0x11u8; 32], FileStorage::new(&sealed_path));
    assert!(sealed.adopt_plaintext(&FileStorage::new(&plain_path)).unwrap());
    assert!(!plain_path.exists());

    let db = SvrDatabase::new(sealed);
    let creds = CredentialManager::load(&db).unwrap();
    assert!(creds.lookup(&Subject::Id(Uuid::from_bytes([3; 16]))).is_some());
}

#[test]
fn test_reset_profile_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let db = SvrDatabase::open_file(dir.path().join("oic_svr_db.dat"));
    let mut creds = CredentialManager::init(&db, DEVICE);
    creds.add(&db, psk(1)).unwrap();
    db.write_resource("acl", &[0xA0]).unwrap();
    db.write_resource("pstat", &[0xA1, 0x00, 0x00]).unwrap();
    db.write_resource("doxm", &[0xA0]).unwrap();

    db.create_reset_profile().unwrap();
    assert!(matches!(db.create_reset_profile().unwrap_err(), StoreError::ResetProfileExists));
    let snapshot = db.read_resource(OIC_JSON_CRED_NAME).unwrap();

    creds.add(&db, psk(2)).unwrap();
    db.write_resource("amacl", &[0xA0]).unwrap();
    db.reset_to_profile().unwrap();

    assert_eq!(db.read_resource(OIC_JSON_CRED_NAME).unwrap(), snapshot);
    assert!(db.read_resource("amacl").is_err());
    assert!(db.read_resource(OIC_JSON_RESET_PF_NAME).is_ok());
    let mut names: Vec<String> = db.resources().unwrap().into_iter().map(|(n, _)| n).collect();
    names.sort();
    assert_eq!(names, vec!["acl", "cred", "doxm", "pstat", "resetpf"]);
}

#[test]
fn test_reset_without_profile_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("oic_svr_db.dat"));
    storage.store(&[0xBF, 0xFF]).unwrap();
    let db = SvrDatabase::new(storage);
    assert!(matches!(db.reset_to_profile().unwrap_err(), StoreError::NotFound));
}
