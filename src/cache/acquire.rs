//! Resolves a payload to a local path before it can be verified and
//! laid out, per `spec.md` 4.7's cache-phase narrative.
//!
//! Acquisition tries, in order: the payload's own `source_path`
//! (alongside the bundle), each configured search root (the bundle's
//! own source folder, `BundleOriginalSource`, a user-supplied
//! `-originalsource`), and finally a [`Downloader`] call if a
//! `download_source` URL is present. A bootstrapper-UI source-prompt
//! callback is a plain closure the caller passes in -- this module
//! never talks to a UI directly, the same separation the teacher
//! crate keeps between `logic::preflight` and its presentation layer.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::state::payload::Payload;

/// Fetches a payload from a remote `download_source` into
/// `destination`. Implementations may be a real HTTP client or (in
/// tests) an in-memory fake.
pub trait Downloader: Send + Sync {
    /// Downloads `url` to `destination`.
    ///
    /// # Errors
    /// Returns an [`EngineError`] describing why the download failed.
    fn download(&self, url: &str, destination: &Path) -> Result<()>;
}

/// What the caller (or an interactive bootstrapper UI) chose when a
/// payload could not be found in any search root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceChoice {
    /// Use this local path instead.
    LocalPath(PathBuf),
    /// Retry the same search roots again.
    Retry,
    /// Give up; surfaces as [`EngineError::UserExit`].
    Abort,
}

/// Locates `payload`'s bytes, returning the local path they now live
/// at (either found as-is, or freshly downloaded into
/// `download_destination`).
///
/// `prompt` is invoked only if the payload is not found in
/// `search_roots` and has no `download_source`; its result decides
/// whether to retry, substitute a path, or abort.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if no root has the file and no
/// downloader/prompt produces one, [`EngineError::UserExit`] if the
/// prompt aborts, or a propagated [`Downloader::download`] error.
pub fn acquire_payload(
    payload: &Payload,
    search_roots: &[PathBuf],
    download_destination: &Path,
    downloader: Option<&dyn Downloader>,
    mut prompt: impl FnMut(&Payload) -> SourceChoice,
) -> Result<PathBuf> {
    if let Some(path) = &payload.source_path {
        if path.exists() {
            return Ok(path.clone());
        }
    }
    if let Some(found) = find_in_roots(&payload.key.0, search_roots) {
        return Ok(found);
    }
    if let Some(url) = &payload.download_source {
        if let Some(downloader) = downloader {
            downloader.download(url, download_destination)?;
            return Ok(download_destination.to_path_buf());
        }
    }
    loop {
        match prompt(payload) {
            SourceChoice::LocalPath(path) => {
                if path.exists() {
                    return Ok(path);
                }
            }
            SourceChoice::Retry => {
                if let Some(found) = find_in_roots(&payload.key.0, search_roots) {
                    return Ok(found);
                }
            }
            SourceChoice::Abort => return Err(EngineError::UserExit),
        }
    }
}

fn find_in_roots(file_name: &str, search_roots: &[PathBuf]) -> Option<PathBuf> {
    search_roots.iter().map(|root| root.join(file_name)).find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::container::ContainerId;
    use crate::state::payload::PayloadKey;

    fn payload(key: &str) -> Payload {
        Payload::new(PayloadKey(key.to_string()), 4, Some(ContainerId(0)))
    }

    #[test]
    fn finds_payload_alongside_bundle_via_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.msi");
        std::fs::write(&file, b"data").unwrap();
        let mut p = payload("a.msi");
        p.source_path = Some(file.clone());
        let found = acquire_payload(&p, &[], Path::new("/unused"), None, |_| SourceChoice::Abort).unwrap();
        assert_eq!(found, file);
    }

    #[test]
    fn finds_payload_in_a_search_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.msi"), b"data").unwrap();
        let p = payload("b.msi");
        let found =
            acquire_payload(&p, &[dir.path().to_path_buf()], Path::new("/unused"), None, |_| SourceChoice::Abort)
                .unwrap();
        assert_eq!(found, dir.path().join("b.msi"));
    }

    struct RecordingDownloader {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl Downloader for RecordingDownloader {
        fn download(&self, url: &str, destination: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(url.to_string());
            std::fs::write(destination, b"downloaded").unwrap();
            Ok(())
        }
    }

    #[test]
    fn falls_back_to_downloader_when_not_found_locally() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("c.msi");
        let mut p = payload("c.msi");
        p.download_source = Some("https://example.invalid/c.msi".to_string());
        let downloader = RecordingDownloader { calls: std::sync::Mutex::new(Vec::new()) };
        let found = acquire_payload(&p, &[], &dest, Some(&downloader), |_| SourceChoice::Abort).unwrap();
        assert_eq!(found, dest);
        assert_eq!(downloader.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn prompt_abort_surfaces_user_exit() {
        let p = payload("missing.msi");
        let err = acquire_payload(&p, &[], Path::new("/unused"), None, |_| SourceChoice::Abort).unwrap_err();
        assert!(matches!(err, EngineError::UserExit));
    }

    #[test]
    fn prompt_local_path_is_used_when_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        let substitute = dir.path().join("found-elsewhere.msi");
        std::fs::write(&substitute, b"data").unwrap();
        let p = payload("missing.msi");
        let substitute_clone = substitute.clone();
        let found = acquire_payload(&p, &[], Path::new("/unused"), None, move |_| {
            SourceChoice::LocalPath(substitute_clone.clone())
        })
        .unwrap();
        assert_eq!(found, substitute);
    }
}
