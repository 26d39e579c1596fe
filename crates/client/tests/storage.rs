use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use portcall_client::capabilities::ErrorReporter;
use portcall_client::storage::{FileBackend, StorageBackend, NAMESPACE_KEY, USER_INFO_KEY};
use portcall_client::Storage;
use portcall_shared::{Session, SyncError};

#[derive(Default)]
struct CountingReporter(AtomicUsize);

impl ErrorReporter for CountingReporter {
    fn capture_error(&self, _error: &SyncError) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn capture_message(&self, _message: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn session() -> Session {
    Session {
        id: Some("7".into()),
        email: "me@example.com".into(),
        session_id: Some("session-7".into()),
        signed_auth_token: Some("jwt".into()),
        ..Session::default()
    }
}

#[test]
fn session_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("portcall");

    let storage = Storage::new(
        Arc::new(FileBackend::new(&data_dir)),
        Arc::new(CountingReporter::default()),
    );
    assert!(storage.save_session(&session()));
    assert!(storage.save(NAMESPACE_KEY, &"vuosaari"));
    assert!(data_dir.join("userInfo.json").exists());

    let reopened = Storage::new(
        Arc::new(FileBackend::new(&data_dir)),
        Arc::new(CountingReporter::default()),
    );
    assert_eq!(reopened.load_session(), Some(session()));
    assert_eq!(reopened.load_namespace().as_deref(), Some("vuosaari"));

    reopened.remove(USER_INFO_KEY);
    assert!(!reopened.exists(USER_INFO_KEY));
    assert!(!data_dir.join("userInfo.json").exists());
}

#[test]
fn missing_files_are_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(CountingReporter::default());
    let storage = Storage::new(Arc::new(FileBackend::new(dir.path())), reporter.clone());

    assert_eq!(storage.load_session(), None);
    storage.remove(USER_INFO_KEY);
    assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
}

#[test]
fn corrupt_file_is_reported_as_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::new(dir.path());
    backend.write(USER_INFO_KEY, "{not json").unwrap();

    let reporter = Arc::new(CountingReporter::default());
    let storage = Storage::new(Arc::new(backend), reporter.clone());
    assert_eq!(storage.load_session(), None);
    assert_eq!(reporter.0.load(Ordering::SeqCst), 1);
}

#[test]
fn keys_cannot_escape_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileBackend::new(dir.path());
    backend.write("../outside", "1").unwrap();
    assert!(dir.path().join(".._outside.json").exists());
    assert_eq!(backend.read("../outside").unwrap().as_deref(), Some("1"));
}
