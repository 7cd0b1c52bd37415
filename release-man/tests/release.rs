use gsutil_run::{GatewayError, ObjectStore};
use release_man::{Error, ReleaseManager, ReleaseRequest, VERSION_NUMBER_FILE};
use std::{
    cell::RefCell,
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use zip::{ZipWriter, write::SimpleFileOptions};

const BUCKET: &str = "gs://test-bucket/desktop";

/// Object store backed by local archives, recording every call.
#[derive(Default)]
struct FakeStore {
    objects: HashMap<String, PathBuf>,
    deny: bool,
    lists: RefCell<Vec<String>>,
    copies: RefCell<Vec<String>>,
    destinations: RefCell<Vec<PathBuf>>,
}

impl FakeStore {
    fn with_object(mut self, url: &str, archive: PathBuf) -> Self {
        self.objects.insert(url.to_string(), archive);
        self
    }

    fn calls(&self) -> usize {
        self.lists.borrow().len() + self.copies.borrow().len()
    }

    /// Every directory an archive was downloaded into is gone again.
    fn assert_scratch_removed(&self) {
        let destinations = self.destinations.borrow();
        assert!(!destinations.is_empty());
        for dest in destinations.iter() {
            let scratch = dest.parent().unwrap();
            assert!(!scratch.exists(), "{} was left behind", scratch.display());
        }
    }
}

impl ObjectStore for FakeStore {
    fn list(&self, url: &str) -> Result<Vec<String>, GatewayError> {
        self.lists.borrow_mut().push(url.to_string());
        if self.deny {
            return Err(GatewayError::Credential {
                remediation: "run gsutil config".to_string(),
            });
        }
        Ok(self
            .objects
            .get(url)
            .map(|_| vec![url.to_string()])
            .unwrap_or_default())
    }

    fn copy(&self, url: &str, dest: &Path) -> Result<(), GatewayError> {
        self.copies.borrow_mut().push(url.to_string());
        self.destinations.borrow_mut().push(dest.to_path_buf());
        let source = self
            .objects
            .get(url)
            .unwrap_or_else(|| panic!("copy of unlisted object {url}"));
        fs::copy(source, dest).unwrap();
        Ok(())
    }
}

/// Builds a zip with `files` (path, contents) under a single top-level directory.
fn archive(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    for (file, contents) in files {
        let options = SimpleFileOptions::default().unix_permissions(0o644);
        zip.start_file(*file, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

fn linux_url(version: &str) -> String {
    format!("{BUCKET}/{version}/linux64/chrome-linux64.zip")
}

#[cfg(unix)]
fn assert_read_execute(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o555, "{} has mode {:o}", path.display(), mode);
}

#[cfg(not(unix))]
fn assert_read_execute(path: &Path) {
    assert!(fs::metadata(path).unwrap().permissions().readonly());
}

#[test]
fn test_mac_arm_example() {
    let dir = TempDir::new().unwrap();
    let zip = archive(
        dir.path(),
        "chrome-mac.zip",
        &[
            (
                "chrome-mac/Google Chrome.app/Contents/MacOS/Google Chrome",
                "binary",
            ),
            ("chrome-mac/Google Chrome.app/Contents/Info.plist", "<plist/>"),
        ],
    );
    let store = FakeStore::default().with_object(
        &format!("{BUCKET}/135.0.7048.0/mac-arm64/chrome-mac.zip"),
        zip,
    );
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    let binary = manager
        .materialize(&ReleaseRequest::new("135.0.7048.0", "mac-arm", &target))
        .unwrap();

    assert_eq!(
        binary,
        target.join("chrome-mac/Google Chrome.app/Contents/MacOS/Google Chrome")
    );
    assert!(binary.is_file());
    assert_read_execute(&binary);
    assert_eq!(
        fs::read_to_string(target.join(VERSION_NUMBER_FILE)).unwrap(),
        "135.0.7048.0"
    );
    store.assert_scratch_removed();
}

#[test]
fn test_bundle_directory_files_all_fixed() {
    let dir = TempDir::new().unwrap();
    let bundle = "chrome-mac/Google Chrome.app/Contents/MacOS/Google Chrome";
    let zip = archive(
        dir.path(),
        "chrome-mac.zip",
        &[
            (&format!("{bundle}/launcher"), "launcher"),
            (&format!("{bundle}/Helpers/helper"), "helper"),
            ("chrome-mac/Google Chrome.app/Contents/Info.plist", "<plist/>"),
        ],
    );
    let store = FakeStore::default().with_object(
        &format!("{BUCKET}/120.0.6099.5/mac64/chrome-mac.zip"),
        zip,
    );
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    let binary = manager
        .materialize(&ReleaseRequest::new("120.0.6099.5", "mac64", &target))
        .unwrap();

    assert!(binary.is_dir());
    assert_read_execute(&binary.join("launcher"));
    assert_read_execute(&binary.join("Helpers").join("helper"));
    assert!(
        !fs::metadata(target.join("chrome-mac/Google Chrome.app/Contents/Info.plist"))
            .unwrap()
            .permissions()
            .readonly()
    );
}

#[cfg(unix)]
#[test]
fn test_stamp_is_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let zip = archive(dir.path(), "linux.zip", &[("chrome-linux64/chrome", "v1")]);
    let store = FakeStore::default().with_object(&linux_url("120.0.6099.5"), zip);
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    manager
        .materialize(&ReleaseRequest::new("120.0.6099.5", "linux64", &target))
        .unwrap();

    let mode = fs::metadata(target.join(VERSION_NUMBER_FILE))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o644);
}

#[test]
fn test_second_call_is_cached() {
    let dir = TempDir::new().unwrap();
    let zip = archive(
        dir.path(),
        "linux.zip",
        &[("chrome-linux64/chrome", "v1")],
    );
    let store = FakeStore::default().with_object(&linux_url("120.0.6099.5"), zip);
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let request = ReleaseRequest::new("120.0.6099.5", "linux64", dir.path().join("out"));

    let first = manager.materialize(&request).unwrap();
    let calls = store.calls();
    let second = manager.materialize(&request).unwrap();

    assert_eq!(first, second);
    assert_eq!(store.copies.borrow().len(), 1);
    assert_eq!(store.calls(), calls);
}

#[test]
fn test_linux_crash_handler_is_executable() {
    let dir = TempDir::new().unwrap();
    let zip = archive(
        dir.path(),
        "linux.zip",
        &[
            ("chrome-linux64/chrome", "chrome"),
            ("chrome-linux64/chrome_crashpad_handler", "crashpad"),
            ("chrome-linux64/resources.pak", "pak"),
        ],
    );
    let store = FakeStore::default().with_object(&linux_url("120.0.6099.5"), zip);
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    let binary = manager
        .materialize(&ReleaseRequest::new("120.0.6099.5", "linux64", &target))
        .unwrap();

    assert_eq!(binary, target.join("chrome-linux").join("chrome"));
    assert!(!target.join("chrome-linux64").exists());
    assert_read_execute(&binary);
    assert_read_execute(&target.join("chrome-linux/chrome_crashpad_handler"));
    assert!(
        !fs::metadata(target.join("chrome-linux/resources.pak"))
            .unwrap()
            .permissions()
            .readonly()
    );
}

#[test]
fn test_unsupported_platform_fails_before_network() {
    let dir = TempDir::new().unwrap();
    let store = FakeStore::default();
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);

    for platform in ["linux32", "mac", "", "android"] {
        let request = ReleaseRequest::new("120.0.6099.5", platform, dir.path().join("out"));
        match manager.materialize(&request) {
            Err(Error::Configuration(message)) => {
                assert!(message.contains("linux64, mac64, mac-arm, win64"))
            }
            other => panic!("expected configuration error for {platform:?}, got {other:?}"),
        }
    }
    assert_eq!(store.calls(), 0);
}

#[test]
fn test_malformed_version_fails_before_network() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("out");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("keep.txt"), "untouched").unwrap();
    let store = FakeStore::default();
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);

    for version in ["120.0.6099", "120.0.6099.5.1", "latest", "120.0.x.5", "120..6099.5"] {
        let request = ReleaseRequest::new(version, "linux64", &target);
        assert!(matches!(
            manager.materialize(&request),
            Err(Error::Configuration(_))
        ));
    }
    assert_eq!(store.calls(), 0);
    assert!(target.join("keep.txt").exists());
}

#[test]
fn test_falls_back_to_name_without_clang() {
    let dir = TempDir::new().unwrap();
    let zip = archive(
        dir.path(),
        "win.zip",
        &[("chrome-win64/chrome.exe", "MZ")],
    );
    let fallback = format!("{BUCKET}/63.0.3239.84/win64/chrome-win64.zip");
    let store = FakeStore::default().with_object(&fallback, zip);
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    let binary = manager
        .materialize(&ReleaseRequest::new("63.0.3239.84", "win64", &target))
        .unwrap();

    assert_eq!(
        *store.lists.borrow(),
        vec![
            format!("{BUCKET}/63.0.3239.84/win64-clang/chrome-win64-clang.zip"),
            fallback.clone(),
        ]
    );
    assert_eq!(*store.copies.borrow(), vec![fallback]);
    assert_eq!(binary, target.join("chrome-win").join("chrome.exe"));
    assert!(binary.is_file());
}

#[test]
fn test_not_found_reports_browsable_url() {
    let dir = TempDir::new().unwrap();
    let store = FakeStore::default();
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);

    let err = manager
        .materialize(&ReleaseRequest::new(
            "1.2.3.4",
            "win64",
            dir.path().join("out"),
        ))
        .unwrap_err();

    match &err {
        Error::NotFound { browsable_url } => assert_eq!(
            browsable_url,
            "https://storage.cloud.google.com/test-bucket/desktop/1.2.3.4/win64/chrome-win64.zip"
        ),
        other => panic!("expected not found, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("https://storage.cloud.google.com/"));
    assert!(!message.contains("gs://"));
    assert_eq!(store.lists.borrow().len(), 2);
    assert!(store.copies.borrow().is_empty());
}

#[test]
fn test_new_version_replaces_old_tree() {
    let dir = TempDir::new().unwrap();
    let old = archive(
        dir.path(),
        "old.zip",
        &[
            ("chrome-linux64/chrome", "old"),
            ("chrome-linux64/chrome_crashpad_handler", "old"),
            ("chrome-linux64/locales/en-US.pak", "old"),
        ],
    );
    let new = archive(
        dir.path(),
        "new.zip",
        &[
            ("chrome-linux64/chrome", "new"),
            ("chrome-linux64/resources.pak", "new"),
        ],
    );
    let store = FakeStore::default()
        .with_object(&linux_url("119.0.6045.9"), old)
        .with_object(&linux_url("120.0.6099.5"), new);
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    manager
        .materialize(&ReleaseRequest::new("119.0.6045.9", "linux64", &target))
        .unwrap();
    fs::write(target.join("leftover.txt"), "stale").unwrap();
    let binary = manager
        .materialize(&ReleaseRequest::new("120.0.6099.5", "linux64", &target))
        .unwrap();

    assert_eq!(fs::read_to_string(&binary).unwrap(), "new");
    assert!(target.join("chrome-linux/resources.pak").exists());
    assert!(!target.join("chrome-linux/locales").exists());
    assert!(!target.join("chrome-linux/chrome_crashpad_handler").exists());
    assert!(!target.join("leftover.txt").exists());
    assert_eq!(
        fs::read_to_string(target.join(VERSION_NUMBER_FILE)).unwrap(),
        "120.0.6099.5"
    );
    assert_eq!(store.copies.borrow().len(), 2);
}

#[test]
fn test_stamp_without_binary_is_inconsistent() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("out");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join(VERSION_NUMBER_FILE), "120.0.6099.5\n").unwrap();
    let store = FakeStore::default();
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);

    let err = manager
        .materialize(&ReleaseRequest::new("120.0.6099.5", "linux64", &target))
        .unwrap_err();

    assert!(matches!(err, Error::Consistency { .. }));
    assert_eq!(store.calls(), 0);
}

#[test]
fn test_missing_top_level_directory_leaves_no_stamp() {
    let dir = TempDir::new().unwrap();
    let zip = archive(dir.path(), "odd.zip", &[("unexpected/chrome", "chrome")]);
    let store = FakeStore::default().with_object(&linux_url("120.0.6099.5"), zip);
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);
    let target = dir.path().join("out");

    let err = manager
        .materialize(&ReleaseRequest::new("120.0.6099.5", "linux64", &target))
        .unwrap_err();

    assert!(matches!(err, Error::Filesystem { .. }));
    assert!(!target.join(VERSION_NUMBER_FILE).exists());
    store.assert_scratch_removed();
}

#[test]
fn test_credential_failure_is_terminal() {
    let dir = TempDir::new().unwrap();
    let store = FakeStore {
        deny: true,
        ..FakeStore::default()
    };
    let manager = ReleaseManager::new(&store).with_base_url(BUCKET);

    let err = manager
        .materialize(&ReleaseRequest::new(
            "120.0.6099.5",
            "linux64",
            dir.path().join("out"),
        ))
        .unwrap_err();

    match err {
        Error::Credential { remediation } => assert!(remediation.contains("gsutil config")),
        other => panic!("expected credential error, got {other:?}"),
    }
    assert_eq!(store.lists.borrow().len(), 1);
}
