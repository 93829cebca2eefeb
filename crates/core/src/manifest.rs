//! Restore manifest decoding.
//!
//! A client asks for files back by sending a compact manifest: `timestamp;filename` pairs joined
//! with `|`, compressed as a zstd frame and then base64 encoded (standard alphabet, padded).
//!
//! ```text
//! 20240101 10:00:00;report.pdf|20240102 09:30:00;notes/todo.txt|
//! ```
//!
//! Decoding is all-or-nothing: one malformed segment rejects the whole manifest.

use crate::config::ManifestLimits;
use crate::constants::ENCRYPTED_FILE_SUFFIX;
use base64::{engine::general_purpose, Engine as _};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use vault_types::DateToken;

const SEGMENT_SEPARATOR: char = '|';
const FIELD_SEPARATOR: char = ';';

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("manifest could not be decompressed: {0}")]
    Decompress(std::io::Error),
    #[error("manifest could not be compressed: {0}")]
    Compress(std::io::Error),
    #[error("manifest exceeds {limit} bytes once decompressed")]
    TooLarge { limit: usize },
    #[error("manifest has more than {limit} entries")]
    TooManyEntries { limit: usize },
    #[error("manifest is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("segment {index} has no ';' separator: '{segment}'")]
    MissingSeparator { index: usize, segment: String },
    #[error("segment {index} has an unrecognised timestamp: '{timestamp}'")]
    InvalidTimestamp { index: usize, timestamp: String },
    #[error("segment {index} has an empty filename")]
    EmptyFilename { index: usize },
    #[error("cannot encode '{0}' into a manifest")]
    Unencodable(String),
}

/// One requested file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub date: DateToken,
    /// Logical name as the client knows it, without the encrypted-file suffix.
    pub name: String,
}

impl ManifestEntry {
    /// The name the file is stored under inside an archive part.
    pub fn stored_name(&self) -> String {
        stored_name(&self.name)
    }
}

pub fn stored_name(logical_name: &str) -> String {
    format!("{logical_name}{ENCRYPTED_FILE_SUFFIX}")
}

/// A decoded manifest, in the order the client sent it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreManifest {
    entries: Vec<ManifestEntry>,
}

impl RestoreManifest {
    /// Decodes a manifest blob as received from a client.
    ///
    /// ASCII whitespace anywhere in the blob is ignored, so line-wrapped base64 is accepted.
    ///
    /// # Errors
    ///
    /// Any [`ManifestError`] except [`ManifestError::Compress`] and
    /// [`ManifestError::Unencodable`].
    pub fn decode(blob: &[u8], limits: ManifestLimits) -> Result<Self, ManifestError> {
        let compact: Vec<u8> = blob
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let compressed = general_purpose::STANDARD.decode(compact)?;

        let decoder =
            zstd::stream::read::Decoder::new(compressed.as_slice()).map_err(ManifestError::Decompress)?;
        let mut text = Vec::new();
        decoder
            .take((limits.max_bytes as u64).saturating_add(1))
            .read_to_end(&mut text)
            .map_err(ManifestError::Decompress)?;
        if text.len() > limits.max_bytes {
            return Err(ManifestError::TooLarge {
                limit: limits.max_bytes,
            });
        }

        let text = String::from_utf8(text)?;
        Self::parse(&text, limits.max_entries)
    }

    /// Parses decompressed manifest text.
    pub fn parse(text: &str, max_entries: usize) -> Result<Self, ManifestError> {
        let mut segments: Vec<&str> = text.split(SEGMENT_SEPARATOR).collect();
        if segments.last().is_some_and(|s| s.is_empty()) {
            segments.pop();
        }
        if segments.len() > max_entries {
            return Err(ManifestError::TooManyEntries { limit: max_entries });
        }

        let entries = segments
            .into_iter()
            .enumerate()
            .map(|(index, segment)| parse_segment(index, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { entries })
    }

    /// Builds the wire form of a manifest from raw `(timestamp, name)` pairs.
    ///
    /// Timestamps may not contain `;` or `|`, and names may not contain `|`.
    pub fn encode<'a, I>(pairs: I) -> Result<String, ManifestError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut text = String::new();
        for (timestamp, name) in pairs {
            if timestamp.contains([FIELD_SEPARATOR, SEGMENT_SEPARATOR]) {
                return Err(ManifestError::Unencodable(timestamp.to_owned()));
            }
            if name.contains(SEGMENT_SEPARATOR) {
                return Err(ManifestError::Unencodable(name.to_owned()));
            }
            text.push_str(timestamp);
            text.push(FIELD_SEPARATOR);
            text.push_str(name);
            text.push(SEGMENT_SEPARATOR);
        }

        let compressed =
            zstd::stream::encode_all(text.as_bytes(), 0).map_err(ManifestError::Compress)?;
        Ok(general_purpose::STANDARD.encode(compressed))
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Partitions requested names by date, ascending.
    ///
    /// Order within a date follows the manifest; a repeated (date, name) pair is kept once.
    pub fn group_by_date(&self) -> BTreeMap<DateToken, Vec<&str>> {
        let mut groups: BTreeMap<DateToken, Vec<&str>> = BTreeMap::new();
        let mut seen: HashSet<(&DateToken, &str)> = HashSet::new();
        for entry in &self.entries {
            if seen.insert((&entry.date, entry.name.as_str())) {
                groups
                    .entry(entry.date.clone())
                    .or_default()
                    .push(entry.name.as_str());
            }
        }
        groups
    }
}

fn parse_segment(index: usize, segment: &str) -> Result<ManifestEntry, ManifestError> {
    let Some((timestamp, name)) = segment.split_once(FIELD_SEPARATOR) else {
        return Err(ManifestError::MissingSeparator {
            index,
            segment: segment.to_owned(),
        });
    };

    let date =
        DateToken::from_timestamp(timestamp).map_err(|_| ManifestError::InvalidTimestamp {
            index,
            timestamp: timestamp.to_owned(),
        })?;

    if name.trim().is_empty() {
        return Err(ManifestError::EmptyFilename { index });
    }

    Ok(ManifestEntry {
        date,
        name: name.to_owned(),
    })
}
