//! File-backed [`TokenSink`] implementations.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::token_store::TokenSink;
use crate::types::Session;

/// On-disk form of a [`Session`].
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    access_token: String,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_epoch_ms: Option<u64>,
}

/// Persists the whole session as JSON so it survives restarts.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSink for JsonFileSink {
    fn name(&self) -> &'static str {
        "json_file"
    }

    fn persist(&self, session: &Session) -> io::Result<()> {
        let persisted = PersistedSession {
            access_token: session.access_token().expose().to_owned(),
            refresh_token: session.refresh_token().expose().to_owned(),
            expires_at_epoch_ms: session.expires_at_ms(),
        };
        let mut bytes = serde_json::to_vec(&persisted).map_err(io::Error::other)?;
        let result = write_private(&self.path, &bytes);
        bytes.zeroize();
        result
    }

    fn load(&self) -> io::Result<Option<Session>> {
        let mut bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let parsed = serde_json::from_slice::<PersistedSession>(&bytes);
        bytes.zeroize();
        let mut persisted = parsed.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if persisted.access_token.is_empty() || persisted.refresh_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(Session::new(
            std::mem::take(&mut persisted.access_token).into(),
            std::mem::take(&mut persisted.refresh_token).into(),
            persisted.expires_at_epoch_ms,
        )))
    }

    fn remove(&self) -> io::Result<()> {
        remove_if_present(&self.path)
    }
}

/// Writes only the access token, as a presence marker for edge route
/// guards that never see the refresh token.
#[derive(Debug, Clone)]
pub struct AccessMarkerSink {
    path: PathBuf,
}

impl AccessMarkerSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Whether the marker file currently exists and is non-empty.
    #[must_use]
    pub fn is_present(&self) -> bool {
        fs::metadata(&self.path).is_ok_and(|m| m.len() > 0)
    }
}

impl TokenSink for AccessMarkerSink {
    fn name(&self) -> &'static str {
        "access_marker"
    }

    fn persist(&self, session: &Session) -> io::Result<()> {
        write_private(&self.path, session.access_token().expose().as_bytes())
    }

    fn load(&self) -> io::Result<Option<Session>> {
        Ok(None)
    }

    fn remove(&self) -> io::Result<()> {
        remove_if_present(&self.path)
    }
}

/// Write through a sibling temp file and rename, so readers never see a
/// half-written file. The file is owner-only on unix.
fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
