use crate::{
    Error, Result,
    error::fs_err,
    extract::extract,
    platform::{Platform, PlatformProfile},
};
use gsutil_run::ObjectStore;
use log::{info, warn};
use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::{NamedTempFile, TempDir};
use walkdir::WalkDir;

pub const RELEASE_BASE_URL: &str = "gs://chrome-unsigned/desktop-5c0tCh";
pub const VERSION_NUMBER_FILE: &str = "version_number";

const BROWSABLE_BASE_URL: &str = "https://storage.cloud.google.com/";
const CLANG_SUFFIX: &str = "-clang";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// e.g. `135.0.7048.0`
    pub version: String,
    /// One of the identifiers in [`Platform::ALL`], checked by [`ReleaseManager::materialize`].
    pub platform: String,
    pub target: PathBuf,
}

impl ReleaseRequest {
    pub fn new(
        version: impl Into<String>,
        platform: impl Into<String>,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            version: version.into(),
            platform: platform.into(),
            target: target.into(),
        }
    }
}

/// The archive a version resolved to in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArchive {
    pub url: String,
    /// Found under the older naming without the `-clang` token.
    pub fallback: bool,
}

pub fn validate_version(version: &str) -> Result<()> {
    let parts: Vec<&str> = version.split('.').collect();
    let numeric = |part: &&str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if parts.len() == 4 && parts.iter().all(numeric) {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "Invalid version number: {:?}. Expected four dot-separated numbers (e.g., 135.0.7048.0)",
            version
        )))
    }
}

/// Rewrites a `gs://` URL into one a browser can open.
pub fn browsable_url(url: &str) -> String {
    url.replace("gs://", BROWSABLE_BASE_URL)
}

/// Materializes release builds into a target directory.
///
/// The target directory holds exactly one version at a time: the renamed
/// application tree plus a `version_number` stamp that is written last.
pub struct ReleaseManager<S> {
    store: S,
    base_url: String,
}

impl<S: ObjectStore> ReleaseManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            base_url: RELEASE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    /// Makes `request.version` available under `request.target` and returns
    /// the path of its binary. Does nothing if the stamp already matches.
    pub fn materialize(&self, request: &ReleaseRequest) -> Result<PathBuf> {
        let platform: Platform = request.platform.parse()?;
        validate_version(&request.version)?;

        let profile = platform.profile();
        let target = request.target.as_path();
        let stamp = target.join(VERSION_NUMBER_FILE);
        let binary = profile.expected_binary(target);

        if let Some(found) = read_stamp(&stamp)? {
            if found == request.version {
                if !binary.exists() {
                    return Err(Error::Consistency {
                        version: found,
                        stamp,
                        binary,
                    });
                }
                info!(
                    "Found existing {} binary of {}. Skipping download",
                    platform, request.version
                );
                return Ok(binary);
            }
            info!(
                "Replacing {} binary of {} with {}",
                platform, found, request.version
            );
        }

        if target.exists() {
            remove_tree(target)?;
        }

        let resolved = self.resolve(&request.version, profile)?;

        let scratch_root = std::env::temp_dir();
        let scratch = TempDir::new_in(&scratch_root)
            .map_err(fs_err("create scratch directory in", &scratch_root))?;
        let archive = scratch.path().join(profile.archive_name);
        info!("Downloading {} to {}", resolved.url, archive.display());
        self.store.copy(&resolved.url, &archive)?;

        extract(&archive, target)?;
        rename_extracted(target, profile, resolved.fallback)?;
        fix_permissions(&binary, profile)?;
        write_stamp(target, &request.version)?;

        Ok(binary)
    }

    /// Lists the primary URL, then the pre-M64 name without `-clang`.
    pub fn resolve(&self, version: &str, profile: &PlatformProfile) -> Result<ResolvedArchive> {
        let url = format!(
            "{}/{}/{}{}",
            self.base_url, version, profile.listing_platform_dir, profile.archive_name
        );
        if !self.store.list(&url)?.is_empty() {
            return Ok(ResolvedArchive {
                url,
                fallback: false,
            });
        }

        let fallback_url = url.replace(CLANG_SUFFIX, "");
        if fallback_url != url && !self.store.list(&fallback_url)?.is_empty() {
            return Ok(ResolvedArchive {
                url: fallback_url,
                fallback: true,
            });
        }

        Err(Error::NotFound {
            browsable_url: browsable_url(&fallback_url),
        })
    }
}

fn read_stamp(stamp: &Path) -> Result<Option<String>> {
    match fs::read_to_string(stamp) {
        Ok(version) => Ok(Some(version.trim().to_string())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(fs_err("read", stamp)(err)),
    }
}

fn write_stamp(target: &Path, version: &str) -> Result<()> {
    let stamp = target.join(VERSION_NUMBER_FILE);
    let mut tmp =
        NamedTempFile::new_in(target).map_err(fs_err("create temporary file in", target))?;
    tmp.write_all(version.as_bytes())
        .map_err(fs_err("write", tmp.path()))?;
    // NamedTempFile is created 0600
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(fs_err("set permissions on", tmp.path()))?;
    }
    tmp.persist(&stamp).map_err(|e| fs_err("write", &stamp)(e.error))?;
    Ok(())
}

/// Deletes `path` bottom-up. On Windows a read-only entry is retried once
/// after clearing its read-only flag.
fn remove_tree(path: &Path) -> Result<()> {
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            Error::Filesystem {
                action: "walk",
                path: at,
                source: e.into(),
            }
        })?;
        let is_dir = entry.file_type().is_dir();
        let entry = entry.path();

        if let Err(err) = remove_entry(entry, is_dir) {
            if !(cfg!(windows) && err.kind() == io::ErrorKind::PermissionDenied) {
                return Err(fs_err("remove", entry)(err));
            }
            warn!("Retrying due to access error on {}...", entry.display());
            clear_readonly(entry).map_err(fs_err("clear read-only flag on", entry))?;
            remove_entry(entry, is_dir).map_err(fs_err("remove", entry))?;
        }
    }
    Ok(())
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut perms = fs::symlink_metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

fn rename_extracted(target: &Path, profile: &PlatformProfile, fallback: bool) -> Result<()> {
    // older archives extract without the -clang token too
    let extract_dir = if fallback {
        profile.archive_extract_dir.replace(CLANG_SUFFIX, "")
    } else {
        profile.archive_extract_dir.to_string()
    };
    let extracted = target.join(extract_dir);
    let renamed = target.join(profile.rename_to);

    if !extracted.is_dir() {
        return Err(Error::Filesystem {
            action: "find extracted directory",
            path: extracted,
            source: io::Error::new(
                io::ErrorKind::NotFound,
                "archive did not contain the expected top-level directory",
            ),
        });
    }
    if extracted != renamed {
        fs::rename(&extracted, &renamed).map_err(fs_err("rename", &extracted))?;
    }
    Ok(())
}

/// r-x for owner, group and other. A single executable gets fixed directly
/// (plus its crash handler); a directory has every file beneath it fixed.
fn fix_permissions(binary: &Path, profile: &PlatformProfile) -> Result<()> {
    if binary.is_file() {
        set_read_execute(binary)?;
        if let Some(handler) = profile.crash_handler {
            let handler = binary.with_file_name(handler);
            if handler.is_file() {
                set_read_execute(&handler)?;
            }
        }
        return Ok(());
    }

    for entry in WalkDir::new(binary) {
        let entry = entry.map_err(|e| Error::Filesystem {
            action: "walk",
            path: e.path().unwrap_or(binary).to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            set_read_execute(entry.path())?;
        }
    }
    Ok(())
}

fn set_read_execute(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o555))
            .map_err(fs_err("set permissions on", path))
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)
            .map_err(fs_err("read metadata of", path))?
            .permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms).map_err(fs_err("set permissions on", path))
    }
}
