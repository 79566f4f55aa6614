//! Installer download.

use std::fs::File;
use std::path::Path;

use crate::{InstallError, InstallResult};

/// A `text/*` or HTML content type means the URL points at a page, not a file.
pub fn content_type_is_downloadable(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    !(content_type.contains("text") || content_type.contains("html"))
}

pub fn download_installer(url: &str, dest: &Path) -> InstallResult<()> {
    let client = reqwest::blocking::Client::builder().build()?;

    let head = client.head(url).send()?.error_for_status()?;
    let content_type = head
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type_is_downloadable(&content_type) {
        return Err(InstallError::NotDownloadable {
            url: url.to_string(),
            content_type,
        });
    }

    tracing::info!(url, dest = %dest.display(), "downloading EnergyPlus installer");
    let mut response = client.get(url).send()?.error_for_status()?;
    let mut file = File::create(dest)?;
    let bytes = response.copy_to(&mut file)?;
    tracing::info!(bytes, "installer downloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_content_types() {
        assert!(content_type_is_downloadable("application/octet-stream"));
        assert!(!content_type_is_downloadable("text/plain; charset=utf-8"));
        assert!(!content_type_is_downloadable("application/xhtml+xml"));
        assert!(content_type_is_downloadable(""));
    }
}
