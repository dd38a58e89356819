//! Certificate loading and validity checks against real X.509 material

use tlsroute_cert::{
    load_cached, load_from_files, CertError, CredentialStore, FsCredentialStore, KeyPaths,
    MemoryCredentialStore,
};
use tlsroute_proto::{DatabaseProtocol, Protocol};

/// Issue a self-signed certificate valid for `validity` from now
fn issue(validity: time::Duration) -> (String, String) {
    let mut params =
        rcgen::CertificateParams::new(vec!["grafana.example.com".to_string()]).unwrap();
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + validity;

    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

fn store_with_app_cert(validity: time::Duration) -> MemoryCredentialStore {
    let (cert_pem, key_pem) = issue(validity);
    let store = MemoryCredentialStore::new();
    store.set_private_key(key_pem);
    store.add_app_cert("root", "grafana", cert_pem);
    store
}

#[test]
fn test_valid_app_certificate_loads() {
    let store = store_with_app_cert(time::Duration::hours(8));

    let cert = load_cached(&store, Protocol::App, "root", "grafana").unwrap();
    assert_eq!(cert.cert_chain.len(), 1);
    assert!(cert.not_after > chrono::Utc::now());
}

#[test]
fn test_near_expiry_certificate_is_rejected() {
    // Expires in two seconds: inside the five second buffer
    let store = store_with_app_cert(time::Duration::seconds(2));

    let err = load_cached(&store, Protocol::App, "root", "grafana").unwrap_err();
    assert!(matches!(err, CertError::Expired(_)), "got {:?}", err);
    assert!(err.to_string().contains("tlsroute app login grafana"));
}

#[test]
fn test_expired_certificate_is_rejected() {
    let store = store_with_app_cert(time::Duration::minutes(-5));

    let err = load_cached(&store, Protocol::App, "root", "grafana").unwrap_err();
    assert!(matches!(err, CertError::Expired(_)));
}

#[test]
fn test_corrupt_cached_certificate_asks_for_relogin() {
    let store = MemoryCredentialStore::new();
    store.set_private_key("garbage");
    store.add_app_cert("root", "grafana", "garbage");

    let err = load_cached(&store, Protocol::App, "root", "grafana").unwrap_err();
    assert!(matches!(err, CertError::NotFound(_)));
    assert!(err.to_string().contains("login to the application again"));
}

#[test]
fn test_database_certificate_from_profile_directory() {
    let dir = tempfile::tempdir().unwrap();
    let paths = KeyPaths::new(dir.path(), "proxy.example.com", "alice");
    let (cert_pem, key_pem) = issue(time::Duration::hours(1));

    let db_path = paths.db_cert_path("root", "pg");
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    std::fs::write(&db_path, cert_pem).unwrap();
    std::fs::write(paths.user_key_path(), key_pem).unwrap();

    let store = FsCredentialStore::new(paths);
    assert!(store.private_key_pem().unwrap().is_some());

    let cert = load_cached(
        &store,
        Protocol::Database(DatabaseProtocol::Postgres),
        "root",
        "pg",
    )
    .unwrap();
    assert!(!cert.cert_chain.is_empty());
}

#[test]
fn test_load_from_files_pair() {
    let dir = tempfile::tempdir().unwrap();
    let (cert_pem, key_pem) = issue(time::Duration::hours(1));
    let cert_path = dir.path().join("client.crt");
    let key_path = dir.path().join("client.key");
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();

    let set = load_from_files(Some(&cert_path), Some(&key_path)).unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.ensure_not_expired(chrono::Utc::now()).is_ok());
}

#[test]
fn test_certificate_set_near_expiry_guard() {
    let dir = tempfile::tempdir().unwrap();
    let (cert_pem, key_pem) = issue(time::Duration::seconds(3));
    let cert_path = dir.path().join("client.crt");
    let key_path = dir.path().join("client.key");
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();

    let set = load_from_files(Some(&cert_path), Some(&key_path)).unwrap();
    let err = set.ensure_not_expired(chrono::Utc::now()).unwrap_err();
    assert!(matches!(err, CertError::Expired(_)));
}
