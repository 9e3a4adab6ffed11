//! Profile Loader - locate and read JSON5 shaping profiles.
//!
//! A profile is given either as a path, or as a bare name looked up as
//! `<name>.json5` in the profile directories. Directories are searched from
//! highest to lowest priority: local, user, then system.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use tcshape_shared::profile::{ProfileFile, parse_profile_file};

/// Default system profile directory (installed via package)
pub const SYSTEM_PROFILE_DIR: &str = "/usr/share/tcshape/profiles";

/// Default user profile directory, relative to the home directory
pub const USER_PROFILE_DIR: &str = ".config/tcshape/profiles";

/// Profile file extension
pub const PROFILE_EXTENSION: &str = "json5";

/// Resolves profile names to files.
#[derive(Debug, Clone)]
pub struct ProfileLoader {
    /// Directories to search, lowest priority first
    directories: Vec<PathBuf>,
}

impl Default for ProfileLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileLoader {
    /// Create a loader searching the default directories:
    /// 1. System: `/usr/share/tcshape/profiles`
    /// 2. User: `~/.config/tcshape/profiles`
    /// 3. Local: `./profiles`
    pub fn new() -> Self {
        let mut directories = vec![PathBuf::from(SYSTEM_PROFILE_DIR)];
        if let Some(home) = dirs::home_dir() {
            directories.push(home.join(USER_PROFILE_DIR));
        }
        directories.push(PathBuf::from("./profiles"));
        Self { directories }
    }

    /// Create a loader with custom directories only.
    pub fn with_directories(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    /// Find the file a profile reference points to.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let direct = Path::new(reference);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        let file_name = format!("{}.{}", reference, PROFILE_EXTENSION);
        self.directories
            .iter()
            .rev()
            .map(|dir| dir.join(&file_name))
            .inspect(|candidate| debug!("Looking for profile at {}", candidate.display()))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Profile '{}' not found (searched {})",
                    reference,
                    self.directories
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }

    /// Resolve and parse a profile.
    pub fn load(&self, reference: &str) -> Result<ProfileFile> {
        let path = self.resolve(reference)?;
        let profile = parse_profile_file(&path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?;
        info!("Loaded profile from {}", path.display());
        Ok(profile)
    }
}
