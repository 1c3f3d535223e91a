//! Vault identity tags.
//!
//! A vault directory is bound to one key by a marker file,
//! `<key id>.vault-tag`, in its top level. The key id in the name is the
//! only thing read back; the file body just repeats it for humans.

use crate::error::vault_tag::VaultTagError;
use crate::keys::KeyId;

use common::ErrorLocation;

use std::fs::{OpenOptions, create_dir_all, read_dir};
use std::io::{ErrorKind, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use const_format::concatcp;
use log::{debug, info};
use regex::Regex;

pub const TAG_EXTENSION: &str = "vault-tag";

const TAG_CAPTURE_ID: &str = "id";
const TAG_FILE_PATTERN: &str = concatcp!(
    r"^(?P<",
    TAG_CAPTURE_ID,
    r">[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12})\.",
    TAG_EXTENSION,
    r"$"
);

static TAG_FILE_REGEX: OnceLock<Regex> = OnceLock::new();

pub(crate) fn get_tag_file_regex() -> &'static Regex {
    TAG_FILE_REGEX.get_or_init(|| Regex::new(TAG_FILE_PATTERN).expect("valid regex pattern"))
}

/// A directory that may carry a vault identity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFolder {
    dir: PathBuf,
    key_id: KeyId,
}

impl VaultFolder {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub fn tag_path(&self) -> PathBuf {
        self.dir.join(Self::tag_file_name(self.key_id))
    }

    pub fn tag_file_name(key_id: KeyId) -> String {
        format!("{key_id}.{TAG_EXTENSION}")
    }

    /// The key id named by the tag in `dir`, if the directory is tagged.
    ///
    /// # Errors
    ///
    /// - [`VaultTagError::Conflict`] if `dir` holds more than one tag
    /// - [`VaultTagError::Io`] if `dir` cannot be listed
    pub fn find_tag(dir: &Path) -> Result<Option<KeyId>, VaultTagError> {
        let entries = match read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultTagError::from(e)),
        };

        let regex = get_tag_file_regex();
        let mut tags = Vec::new();

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if let Some(captures) = regex.captures(name)
                && let Ok(key_id) = captures[TAG_CAPTURE_ID].parse::<KeyId>()
            {
                tags.push((name.to_string(), key_id));
            }
        }

        match tags.len() {
            0 => Ok(None),
            1 => Ok(Some(tags[0].1)),
            _ => {
                let mut names: Vec<String> = tags.into_iter().map(|(name, _)| name).collect();
                names.sort();
                Err(VaultTagError::Conflict {
                    dir: dir.to_path_buf(),
                    tags: names,
                    location: ErrorLocation::from(Location::caller()),
                })
            }
        }
    }

    /// Open a tagged vault directory. `None` if `dir` is not tagged.
    pub fn open(dir: &Path) -> Result<Option<Self>, VaultTagError> {
        Ok(Self::find_tag(dir)?.map(|key_id| Self {
            dir: dir.to_path_buf(),
            key_id,
        }))
    }

    /// Tag `dir` for `key_id`, creating the directory if needed.
    ///
    /// An existing tag for the same key is accepted as is.
    ///
    /// # Errors
    ///
    /// - [`VaultTagError::Mismatch`] if `dir` is tagged for another key
    /// - [`VaultTagError::Conflict`] if `dir` already holds more than one tag
    /// - [`VaultTagError::Io`] if the directory or tag cannot be written
    pub fn initialize(dir: &Path, key_id: KeyId) -> Result<Self, VaultTagError> {
        if let Some(existing) = Self::find_tag(dir)? {
            if existing != key_id {
                return Err(VaultTagError::Mismatch {
                    dir: dir.to_path_buf(),
                    existing: existing.to_string(),
                    expected: key_id.to_string(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            debug!("{} already tagged for key {key_id}", dir.display());
            return Ok(Self {
                dir: dir.to_path_buf(),
                key_id,
            });
        }

        create_dir_all(dir)?;

        let folder = Self {
            dir: dir.to_path_buf(),
            key_id,
        };

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(folder.tag_path())
        {
            Ok(mut file) => {
                writeln!(file, "{key_id}")?;
                file.sync_all()?;
                info!("Tagged {} for key {key_id}", dir.display());
            }
            // Lost a race against another writer using the same key id.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(VaultTagError::from(e)),
        }

        Ok(folder)
    }
}
