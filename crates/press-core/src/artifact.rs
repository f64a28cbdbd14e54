// SPDX-License-Identifier: MIT OR Apache-2.0
//! The artifact a worker hands to the validation engine.

use crate::job::Intent;
use crate::CoreError;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A produced PDF plus provenance metadata.
///
/// Created by a worker, consumed read-only by the validation engine,
/// retained until process exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    /// Filesystem location of the PDF.
    pub path: PathBuf,
    /// Number of pages in the exported document.
    pub page_count: u32,
    /// Export intent the artifact was produced under.
    pub intent: Intent,
    /// When the worker finished producing the file.
    pub produced_at: DateTime<Utc>,
    /// Rasterized page previews, lazily materialized by validation layers.
    #[serde(default)]
    pub preview_images: Vec<PathBuf>,
    /// SHA-256 of the file contents, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Artifact {
    /// Build an artifact for a freshly exported file, computing its digest.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] when the file cannot be read.
    pub fn from_export(
        path: impl Into<PathBuf>,
        page_count: u32,
        intent: Intent,
    ) -> Result<Self, CoreError> {
        let path = path.into();
        let digest = file_digest(&path)?;
        Ok(Self {
            path,
            page_count,
            intent,
            produced_at: Utc::now(),
            preview_images: Vec::new(),
            digest: Some(digest),
        })
    }

    /// Size of the file on disk, in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] when the file cannot be stat'ed.
    pub fn byte_size(&self) -> Result<u64, CoreError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> Result<String, CoreError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let out = hasher.finalize();
    Ok(out.iter().map(|b| format!("{b:02x}")).collect())
}
