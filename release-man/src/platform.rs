use crate::Error;
use std::{
    env::consts::{ARCH, OS},
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux64,
    Mac64,
    MacArm,
    Win64,
}

/// Naming conventions of one platform's release archive.
#[derive(Debug, PartialEq, Eq)]
pub struct PlatformProfile {
    pub platform: Platform,
    /// Path of the executable inside the renamed directory.
    pub binary_name: &'static str,
    pub listing_platform_dir: &'static str,
    pub archive_name: &'static str,
    /// Top-level directory the archive extracts to.
    pub archive_extract_dir: &'static str,
    pub rename_to: &'static str,
    /// Helper shipped next to the executable that also needs the exec bit.
    pub crash_handler: Option<&'static str>,
}

const LINUX64: PlatformProfile = PlatformProfile {
    platform: Platform::Linux64,
    binary_name: "chrome",
    listing_platform_dir: "linux64/",
    archive_name: "chrome-linux64.zip",
    archive_extract_dir: "chrome-linux64",
    rename_to: "chrome-linux",
    crash_handler: Some("chrome_crashpad_handler"),
};

const MAC64: PlatformProfile = PlatformProfile {
    platform: Platform::Mac64,
    binary_name: "Google Chrome.app/Contents/MacOS/Google Chrome",
    listing_platform_dir: "mac64/",
    archive_name: "chrome-mac.zip",
    archive_extract_dir: "chrome-mac",
    rename_to: "chrome-mac",
    crash_handler: None,
};

const MAC_ARM: PlatformProfile = PlatformProfile {
    platform: Platform::MacArm,
    binary_name: "Google Chrome.app/Contents/MacOS/Google Chrome",
    listing_platform_dir: "mac-arm64/",
    archive_name: "chrome-mac.zip",
    archive_extract_dir: "chrome-mac",
    rename_to: "chrome-mac",
    crash_handler: None,
};

const WIN64: PlatformProfile = PlatformProfile {
    platform: Platform::Win64,
    binary_name: "chrome.exe",
    listing_platform_dir: "win64-clang/",
    archive_name: "chrome-win64-clang.zip",
    archive_extract_dir: "chrome-win64-clang",
    rename_to: "chrome-win",
    crash_handler: None,
};

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Linux64,
        Platform::Mac64,
        Platform::MacArm,
        Platform::Win64,
    ];

    /// The platform matching the running host, if it is one we have builds for.
    pub fn host() -> Option<Self> {
        match (OS, ARCH) {
            ("linux", _) => Some(Platform::Linux64),
            ("macos", "aarch64") => Some(Platform::MacArm),
            ("macos", _) => Some(Platform::Mac64),
            ("windows", _) => Some(Platform::Win64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux64 => "linux64",
            Self::Mac64 => "mac64",
            Self::MacArm => "mac-arm",
            Self::Win64 => "win64",
        }
    }

    pub fn profile(self) -> &'static PlatformProfile {
        match self {
            Self::Linux64 => &LINUX64,
            Self::Mac64 => &MAC64,
            Self::MacArm => &MAC_ARM,
            Self::Win64 => &WIN64,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(platform: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == platform)
            .ok_or_else(|| {
                let supported: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
                Error::Configuration(format!(
                    "Unsupported platform: {}. Supported platforms: {}",
                    platform,
                    supported.join(", ")
                ))
            })
    }
}

impl PlatformProfile {
    pub fn expected_binary(&self, target: &Path) -> PathBuf {
        target.join(self.rename_to).join(self.binary_name)
    }
}
