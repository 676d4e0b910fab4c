//! Provisioning file check at startup
//!
//! The broker certificate, private key and root CA are required: a missing one
//! stops startup. The control-board credential is soft-required; without it
//! the agent starts and reports a warning status.

use crate::config::CredentialFiles;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Certificate,
    PrivateKey,
    RootCa,
    Hardware,
}

impl CredentialKind {
    pub fn required(&self) -> bool {
        !matches!(self, CredentialKind::Hardware)
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CredentialKind::Certificate => "device certificate",
            CredentialKind::PrivateKey => "private key",
            CredentialKind::RootCa => "root CA",
            CredentialKind::Hardware => "hardware credential",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Missing {kind} file: {}", path.display())]
    Missing { kind: CredentialKind, path: PathBuf },
}

/// What the check found
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialReport {
    /// False when no credential directory is configured
    pub provisioned: bool,
    pub hardware_available: bool,
}

impl CredentialReport {
    /// Whether startup should surface a warning status
    pub fn needs_attention(&self) -> bool {
        self.provisioned && !self.hardware_available
    }
}

pub fn check(files: &CredentialFiles) -> Result<CredentialReport, CredentialError> {
    let Some(directory) = &files.directory else {
        tracing::debug!("No credential directory configured, skipping provisioning check");
        return Ok(CredentialReport {
            provisioned: false,
            hardware_available: false,
        });
    };

    let mut hardware_available = true;
    for (kind, name) in [
        (CredentialKind::Certificate, &files.certificate),
        (CredentialKind::PrivateKey, &files.private_key),
        (CredentialKind::RootCa, &files.root_ca),
        (CredentialKind::Hardware, &files.hardware),
    ] {
        let path = directory.join(name);
        if present(&path) {
            tracing::debug!("Found {} at {}", kind, path.display());
            continue;
        }

        if kind.required() {
            return Err(CredentialError::Missing { kind, path });
        }
        tracing::warn!(
            "Missing {} file {}; control board will run without it",
            kind,
            path.display()
        );
        hardware_available = false;
    }

    Ok(CredentialReport {
        provisioned: true,
        hardware_available,
    })
}

fn present(path: &Path) -> bool {
    path.is_file()
}
