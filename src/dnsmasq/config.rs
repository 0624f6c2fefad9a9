//! Rendering and persisting the dnsmasq configuration document.

use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::error::WriteError;
use crate::types::NameRecord;

const HEADER_COMMENT: &str =
    "# Generated by docker-domains. Regenerated on every container event, do not edit.\n";

/// dnsmasq has to read the file after dropping privileges.
const DOCUMENT_MODE: u32 = 0o644;

/// Writes the document dnsmasq reads.  Only the reconciler holds one of
/// these, so writes are serialized by its lock.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    path: PathBuf,
    header: String,
}

impl ConfigWriter {
    pub fn new(path: impl Into<PathBuf>, upstream_servers: &[String]) -> Self {
        Self {
            path: path.into(),
            header: render_header(upstream_servers),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the parent directory and writes a header-only document so
    /// dnsmasq can start before the first run completes.
    ///
    /// Returns `true` when the directory did not exist before.
    pub fn prepare(&self) -> Result<bool, WriteError> {
        let mut created = false;
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            created = !dir.exists();
            fs::create_dir_all(dir).map_err(|source| self.error(source))?;
        }
        self.write(&[])?;
        Ok(created)
    }

    /// Renders the full document for `records`.
    ///
    /// Records with an empty address are left out: a bare `address=/name/`
    /// line tells dnsmasq to answer NXDOMAIN for the name.
    pub fn render(&self, records: &[NameRecord]) -> String {
        self.render_counted(records).0
    }

    fn render_counted(&self, records: &[NameRecord]) -> (String, usize) {
        let mut doc = self.header.clone();
        let mut written = 0;
        for record in records {
            if record.address.is_empty() {
                warn!("Skipping {}: container has no address", record.name);
                continue;
            }
            doc.push_str(&record.to_string());
            doc.push('\n');
            written += 1;
        }
        (doc, written)
    }

    /// Replaces the document with one rendered from `records`.
    ///
    /// The content goes to a temporary file in the same directory which is
    /// then renamed over the target, so readers see either the old or the
    /// new document.  Returns the number of `address=` lines written.
    pub fn write(&self, records: &[NameRecord]) -> Result<usize, WriteError> {
        let (doc, written) = self.render_counted(records);
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir).map_err(|source| self.error(source))?;
        tmp.write_all(doc.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .and_then(|()| tmp.as_file().set_permissions(Permissions::from_mode(DOCUMENT_MODE)))
            .map_err(|source| self.error(source))?;
        tmp.persist(&self.path)
            .map_err(|e| self.error(e.error))?;

        debug!("Wrote {} ({} bytes)", self.path.display(), doc.len());
        Ok(written)
    }

    fn error(&self, source: std::io::Error) -> WriteError {
        WriteError {
            path: self.path.clone(),
            source,
        }
    }
}

fn render_header(upstream_servers: &[String]) -> String {
    let mut header = String::from(HEADER_COMMENT);
    header.push_str("no-hosts\n");
    if !upstream_servers.is_empty() {
        header.push_str("no-resolv\n");
        for server in upstream_servers {
            header.push_str(&format!("server={server}\n"));
        }
    }
    header
}
