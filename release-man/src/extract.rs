use crate::{Error, Result, error::fs_err};
use flate2::read::GzDecoder;
use log::{info, warn};
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, Read},
    path::Path,
    process::Command,
};
use zip::ZipArchive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How zip archives are unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMode {
    /// `ditto -x -k`, which keeps the symlinks app bundles rely on.
    Ditto,
    /// Entry by entry, restoring the Unix mode stored in each entry.
    Entries,
}

impl ZipMode {
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            ZipMode::Ditto
        } else {
            ZipMode::Entries
        }
    }
}

/// Extracts `archive` into `dest`, creating `dest` if needed.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    extract_with(archive, dest, ZipMode::for_host())
}

pub fn extract_with(archive: &Path, dest: &Path, mode: ZipMode) -> Result<()> {
    fs::create_dir_all(dest).map_err(fs_err("create directory", dest))?;

    if is_tar(archive).map_err(fs_err("read", archive))? {
        info!("Extracting tar archive {} to {}", archive.display(), dest.display());
        return extract_tar(archive, dest);
    }

    info!("Extracting zip archive {} to {}", archive.display(), dest.display());
    match mode {
        ZipMode::Ditto => extract_with_ditto(archive, dest),
        ZipMode::Entries => extract_zip(archive, dest),
    }
}

/// Sniffs the content, not the file name: a `ustar` header, raw or gzipped.
pub fn is_tar(path: &Path) -> io::Result<bool> {
    let mut head = Vec::with_capacity(512);
    File::open(path)?.take(512).read_to_end(&mut head)?;

    if head.starts_with(&GZIP_MAGIC) {
        head.clear();
        let decoder = GzDecoder::new(File::open(path)?);
        if decoder.take(512).read_to_end(&mut head).is_err() {
            return Ok(false);
        }
    }
    Ok(head.get(257..262) == Some(b"ustar".as_slice()))
}

fn extract_tar(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(fs_err("open", archive))?;
    let mut reader = BufReader::new(file);
    let gzipped = reader
        .fill_buf()
        .map_err(fs_err("read", archive))?
        .starts_with(&GZIP_MAGIC);

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest).map_err(fs_err("extract", archive))
}

fn extract_with_ditto(archive: &Path, dest: &Path) -> Result<()> {
    let output = Command::new("ditto")
        .arg("-x")
        .arg("-k")
        .arg(archive)
        .arg(dest)
        .output()
        .map_err(fs_err("run ditto on", archive))?;
    if !output.status.success() {
        return Err(Error::Filesystem {
            action: "extract",
            path: archive.to_path_buf(),
            source: io::Error::other(format!(
                "ditto exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        });
    }
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(fs_err("open", archive))?;
    let mut zip =
        ZipArchive::new(BufReader::new(file)).map_err(|e| fs_err("read", archive)(e.into()))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| fs_err("read", archive)(e.into()))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry outside the destination: {}", entry.name());
            continue;
        };
        let outpath = dest.join(relative);

        if entry.name().ends_with('/') {
            fs::create_dir_all(&outpath).map_err(fs_err("create directory", &outpath))?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).map_err(fs_err("create directory", parent))?;
            }
            let mut out = File::create(&outpath).map_err(fs_err("create", &outpath))?;
            io::copy(&mut entry, &mut out).map_err(fs_err("write", &outpath))?;
        }

        // zip keeps the Unix mode in the upper 16 bits of the external attributes
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(fs_err("set permissions on", &outpath))?;
            }
        }
    }
    Ok(())
}
