//! Loading of device profiles from disk.
//!
//! A profile source is either a single file or a directory. Files hold a
//! mapping from profile name to [`DeviceProfile`], written in YAML
//! (`.yml`/`.yaml`) or JSON5 (`.json5`/`.json`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use modbus_exporter_core::{DeviceProfile, DeviceProfiles, build_workload};
use thiserror::Error;
use tracing::{debug, info, warn};

const YAML_EXTENSIONS: &[&str] = &["yml", "yaml"];
const JSON5_EXTENSIONS: &[&str] = &["json5", "json"];

/// Profile loading errors.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to parse JSON5 in {path}: {source}")]
    Json5 {
        path: PathBuf,
        #[source]
        source: json5::Error,
    },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Profile '{name}' in {path} is already defined")]
    DuplicateProfile { name: String, path: PathBuf },
    #[error("No profile files found in directory {0}")]
    EmptyDirectory(PathBuf),
}

/// Profile file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json5,
}

impl Format {
    /// Format implied by a file extension; `None` for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if YAML_EXTENSIONS.contains(&ext.as_str()) {
            Some(Format::Yaml)
        } else if JSON5_EXTENSIONS.contains(&ext.as_str()) {
            Some(Format::Json5)
        } else {
            None
        }
    }
}

/// Load every profile from a file or a directory.
pub fn load_profiles(path: impl AsRef<Path>) -> Result<DeviceProfiles, LoadError> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let files = if metadata.is_dir() {
        profile_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut profiles = DeviceProfiles::new();
    for file in &files {
        // Explicitly named files without a known extension are read as YAML.
        let format = Format::from_path(file).unwrap_or(Format::Yaml);
        let content = std::fs::read_to_string(file).map_err(|source| LoadError::Io {
            path: file.clone(),
            source,
        })?;

        for (name, profile) in parse_profiles(&content, format, file)? {
            if profiles.contains(&name) {
                return Err(LoadError::DuplicateProfile {
                    name,
                    path: file.clone(),
                });
            }
            profiles.insert(name, profile);
        }
        debug!(file = %file.display(), "Loaded profile file");
    }

    validate_profiles(&profiles)?;

    info!(
        path = %path.display(),
        files = files.len(),
        profiles = profiles.len(),
        "Device profiles loaded"
    );

    Ok(profiles)
}

/// Parse the content of one profile file.
pub fn parse_profiles(
    content: &str,
    format: Format,
    path: &Path,
) -> Result<BTreeMap<String, DeviceProfile>, LoadError> {
    if content.trim().is_empty() {
        warn!(file = %path.display(), "Profile file is empty");
        return Ok(BTreeMap::new());
    }

    match format {
        Format::Yaml => serde_yaml::from_str(content).map_err(|source| LoadError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        Format::Json5 => json5::from_str(content).map_err(|source| LoadError::Json5 {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Check what parsing cannot express.
///
/// Register addresses that do not resolve are only reported: the profile
/// stays usable and every scrape against it fails with a configuration error.
pub fn validate_profiles(profiles: &DeviceProfiles) -> Result<(), LoadError> {
    for (name, profile) in profiles.iter() {
        match &profile.device_transport {
            Some(transport) if !transport.eq_ignore_ascii_case("tcp") => {
                return Err(LoadError::Validation(format!(
                    "profile '{}': unsupported device_transport '{}' (only 'tcp')",
                    name, transport
                )));
            }
            _ => {}
        }

        if let Some(index) = profile
            .device_registers
            .iter()
            .position(|r| r.register_name.is_empty())
        {
            return Err(LoadError::Validation(format!(
                "profile '{}': register #{} has an empty register_name",
                name, index
            )));
        }

        if profile.device_registers.is_empty() {
            warn!(profile = name, "Profile has no registers");
        }

        if let Err(e) = build_workload(profile) {
            warn!(profile = name, error = %e, "Profile has an unresolvable register address");
        }
    }

    Ok(())
}

fn profile_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        if Format::from_path(&path).is_none() {
            debug!(file = %path.display(), "Skipping non-profile file");
            continue;
        }
        files.push(path);
    }

    if files.is_empty() {
        return Err(LoadError::EmptyDirectory(dir.to_path_buf()));
    }

    files.sort();
    Ok(files)
}
