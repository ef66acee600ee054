//! Torrent metainfo decoding

use serde::Deserialize;
use serde_bencode::value::Value;
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};
use std::fmt;

#[derive(Debug)]
pub enum MetainfoError {
    Bencode(serde_bencode::Error),
    MissingName,
}

impl fmt::Display for MetainfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetainfoError::Bencode(err) => write!(f, "invalid torrent: {}", err),
            MetainfoError::MissingName => write!(f, "invalid torrent: info has no name"),
        }
    }
}

impl std::error::Error for MetainfoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetainfoError::Bencode(err) => Some(err),
            MetainfoError::MissingName => None,
        }
    }
}

impl From<serde_bencode::Error> for MetainfoError {
    fn from(err: serde_bencode::Error) -> Self {
        MetainfoError::Bencode(err)
    }
}

#[derive(Deserialize)]
struct RawTorrent {
    info: Value,
}

// Legacy name and path fields carry whatever encoding the creator used
#[derive(Deserialize)]
struct Info {
    #[serde(default)]
    name: Option<ByteBuf>,
    #[serde(default, rename = "name.utf-8")]
    name_utf8: Option<ByteBuf>,
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileEntry {
    #[serde(default)]
    path: Vec<ByteBuf>,
    #[serde(default, rename = "path.utf-8")]
    path_utf8: Option<Vec<ByteBuf>>,
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// The parts of a torrent the service cares about
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Lowercase hex SHA-1 of the bencoded info dictionary
    pub info_hash: String,
    pub name: String,
    /// File paths, components joined with spaces
    pub files: Vec<String>,
}

impl Metainfo {
    pub fn parse(torrent: &[u8]) -> Result<Self, MetainfoError> {
        let raw: RawTorrent = serde_bencode::from_bytes(torrent)?;

        // Dictionaries are re-encoded with sorted keys, which is the form
        // the info hash is defined over
        let info_bytes = serde_bencode::to_bytes(&raw.info)?;
        let info_hash = hex::encode(Sha1::digest(&info_bytes));

        let info: Info = serde_bencode::from_bytes(&info_bytes)?;
        let name = info
            .name_utf8
            .or(info.name)
            .map(|name| text(&name))
            .ok_or(MetainfoError::MissingName)?;
        let files = info
            .files
            .into_iter()
            .map(|file| {
                file.path_utf8
                    .unwrap_or(file.path)
                    .iter()
                    .map(|part| text(part))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();

        Ok(Self {
            info_hash,
            name,
            files,
        })
    }

    /// Name followed by every file path
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.files.iter().map(String::as_str))
    }
}
