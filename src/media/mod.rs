//! Base64 media extraction.
//!
//! LLM request/response bodies routinely embed multi-megabyte Base64
//! images. Inlining them would bloat the journal, so payloads above a
//! configured size are spilled to dated side-files and replaced with a
//! placeholder; the journal keeps a hash of the original Base64 so the
//! side-file can be re-verified.

use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::MediaReference;

// Linear-time pattern; the bounded character class keeps the scan cheap
// even on multi-megabyte bodies.
static BASE64_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:image/(png|jpeg|jpg|gif|webp|bmp);base64,([A-Za-z0-9+/=]+)")
        .expect("static pattern")
});

/// Which body a payload came from; determines the side-file name and
/// keeps placeholder indexes independent per body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOrigin {
    Request,
    Response,
}

impl BodyOrigin {
    fn as_str(&self) -> &'static str {
        match self {
            BodyOrigin::Request => "request",
            BodyOrigin::Response => "response",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaExtractor {
    enabled: bool,
    min_size_kb: u64,
    storage_path: PathBuf,
}

impl MediaExtractor {
    pub fn new(enabled: bool, min_size_kb: u64, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            min_size_kb,
            storage_path: storage_path.into(),
        }
    }

    /// Extract qualifying Base64 images from `body`.
    ///
    /// Returns the body with each extracted payload replaced by
    /// `[IMAGE_EXTRACTED:{index}]` plus one reference per extraction.
    /// Indexes count successful extractions per body starting at 0.
    /// Any per-match failure (bad Base64, filesystem error) leaves that
    /// match inline and moves on.
    pub fn extract(
        &self,
        body: &str,
        sequence_id: u64,
        origin: BodyOrigin,
    ) -> (String, Vec<MediaReference>) {
        if !self.enabled || body.is_empty() {
            return (body.to_string(), Vec::new());
        }

        let mut references = Vec::new();
        let mut modified = body.to_string();
        let mut index = 0usize;

        for caps in BASE64_IMAGE.captures_iter(body) {
            let full_match = caps.get(0).expect("match 0").as_str();
            let image_type = caps.get(1).expect("group 1").as_str();
            let base64_data = caps.get(2).expect("group 2").as_str();

            let estimated_size = (base64_data.len() * 3) / 4;
            if (estimated_size as u64) / 1024 < self.min_size_kb {
                continue;
            }

            let decoded = match base64::engine::general_purpose::STANDARD.decode(base64_data) {
                Ok(d) => d,
                Err(_) => continue,
            };

            // Integrity hash covers the original Base64 string so the
            // journal body can be re-linked to it without re-encoding.
            let sha256 = hex::encode(Sha256::digest(base64_data.as_bytes()));
            let placeholder = format!("[IMAGE_EXTRACTED:{index}]");

            let file_path = match self.save(&decoded, sequence_id, origin, index, image_type) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        seq = sequence_id,
                        origin = origin.as_str(),
                        "media save failed, leaving payload inline: {e}"
                    );
                    continue;
                }
            };

            references.push(MediaReference {
                r#type: format!("image/{image_type}"),
                file_path,
                sha256,
                size_bytes: decoded.len() as u64,
                placeholder: placeholder.clone(),
            });

            modified = modified.replacen(full_match, &placeholder, 1);
            index += 1;
        }

        (modified, references)
    }

    /// Write decoded bytes to `{storage_path}/{YYYY-MM-DD}/seq_{N}_{origin}_{index}.{ext}`.
    /// Returns the path relative to the storage root.
    fn save(
        &self,
        data: &[u8],
        sequence_id: u64,
        origin: BodyOrigin,
        index: usize,
        image_type: &str,
    ) -> std::io::Result<String> {
        let date_dir = Utc::now().format("%Y-%m-%d").to_string();
        let dir = self.storage_path.join(&date_dir);
        create_dir_all_0755(&dir)?;

        let filename = format!(
            "seq_{sequence_id}_{}_{index}.{image_type}",
            origin.as_str()
        );
        let path = dir.join(&filename);
        std::fs::write(&path, data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;
        }

        Ok(PathBuf::from(date_dir)
            .join(filename)
            .to_string_lossy()
            .into_owned())
    }
}

/// mkdir -p with directory mode forced to 0755, independent of the
/// process umask.
fn create_dir_all_0755(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
