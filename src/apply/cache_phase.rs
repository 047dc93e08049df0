//! Phase A interpreter (`spec.md` 4.7/4.9): walks a plan's
//! `cache_actions` list, acquiring, verifying, and caching every
//! payload, signaling a [`super::sync_tracker::SyncpointTracker`] once
//! each package's payloads are ready so the execute phase -- running
//! concurrently on its own thread -- can proceed (§8 scenario S8).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::cache::acquire::{acquire_payload, Downloader, SourceChoice};
use crate::cache::verify::{verify_payload, ExpectedPayload};
use crate::cache::{layout, CacheManager};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::plan::{CacheAction, CheckpointId};
use crate::state::package::PackageId;
use crate::state::{BundleState, Payload, PayloadKey};

use super::sync_tracker::SyncpointTracker;

/// Collaborators the cache phase needs, gathered in one place so
/// `ApplyEngine::run` does not have to thread five separate
/// parameters through.
pub struct CacheContext<'a> {
    /// Content-addressed cache root.
    pub cache: &'a CacheManager,
    /// Directories to search for a payload before downloading it.
    pub search_roots: Vec<PathBuf>,
    /// Remote fetch backend, if any source is a URL.
    pub downloader: Option<&'a dyn Downloader>,
    /// Destination directory for `-layout`; `None` for every other
    /// command.
    pub layout_destination: Option<PathBuf>,
    /// Tuning knobs (verify retry bound).
    pub config: &'a EngineConfig,
}

/// What the cache phase accomplished before stopping, either at the
/// end of the list or at the first unrecoverable failure.
pub struct CachePhaseOutcome {
    /// Syncpoints signaled before the phase stopped.
    pub signaled: HashSet<CheckpointId>,
    /// The failure that stopped the phase early, if any.
    pub failure: Option<EngineError>,
    /// The package whose cache work was in progress when `failure`
    /// occurred, if any; used by `do_rollback_cache`.
    pub failed_package: Option<PackageId>,
}

/// Runs every action in `actions` against `state`/`ctx`, stopping at
/// the first action that fails. Signals `tracker` as each
/// `SignalSyncpoint` action succeeds, and marks it finished (with the
/// failure detail, if any) before returning, so an execute thread
/// blocked in [`SyncpointTracker::wait`] is always woken.
pub fn run(
    actions: &[CacheAction],
    state: &BundleState,
    ctx: &CacheContext<'_>,
    mut prompt: impl FnMut(&Payload) -> SourceChoice,
    tracker: &SyncpointTracker,
) -> CachePhaseOutcome {
    let mut signaled = HashSet::new();
    let mut resolved: HashMap<PayloadKey, PathBuf> = HashMap::new();
    let mut staging_roots = ctx.search_roots.clone();
    let mut current_package: Option<PackageId> = None;

    for action in actions {
        let result = step(action, state, ctx, current_package, &mut resolved, &mut staging_roots, &mut prompt);
        match action {
            CacheAction::PackageStart(id) => current_package = Some(*id),
            CacheAction::PackageStop(_) => current_package = None,
            CacheAction::SignalSyncpoint(id) => {
                if result.is_ok() {
                    signaled.insert(*id);
                    tracker.signal(*id);
                }
            }
            _ => {}
        }
        if let Err(err) = result {
            tracker.finish(Some(err.to_string()));
            return CachePhaseOutcome { signaled, failure: Some(err), failed_package: current_package };
        }
    }
    tracker.finish(None);
    CachePhaseOutcome { signaled, failure: None, failed_package: None }
}

fn step(
    action: &CacheAction,
    state: &BundleState,
    ctx: &CacheContext<'_>,
    current_package: Option<PackageId>,
    resolved: &mut HashMap<PayloadKey, PathBuf>,
    staging_roots: &mut Vec<PathBuf>,
    prompt: &mut impl FnMut(&Payload) -> SourceChoice,
) -> Result<()> {
    match action {
        CacheAction::Checkpoint(_) | CacheAction::PackageStart(_) | CacheAction::PackageStop(_) => Ok(()),
        CacheAction::AcquireContainer(id) => {
            let container = state.container(*id).ok_or_else(|| EngineError::NotFound {
                what: format!("container {}", id.0),
            })?;
            if let Some(path) = &container.source_path {
                if path.exists() {
                    return Ok(());
                }
            }
            if let (Some(url), Some(downloader)) = (&container.download_source, ctx.downloader) {
                let destination = ctx.cache.root().join(format!("_container_{}", id.0));
                downloader.download(url, &destination)?;
                return Ok(());
            }
            Err(EngineError::NotFound { what: format!("container {} source", id.0) })
        }
        CacheAction::ExtractContainer(id) => extract_container(*id, state, ctx, staging_roots),
        CacheAction::AcquirePayload(key) => {
            let payload = find_payload(state, key)?;
            let destination = ctx.cache.root().join("_download").join(&key.0);
            let path = acquire_payload(payload, staging_roots, &destination, ctx.downloader, |p| prompt(p))?;
            resolved.insert(key.clone(), path);
            Ok(())
        }
        CacheAction::CachePayload(key) => {
            cache_payload(key, state, ctx, current_package, resolved, staging_roots, prompt)
        }
        CacheAction::LayoutBundle => Ok(()),
        CacheAction::LayoutContainer { container, try_count } => {
            let Some(destination) = &ctx.layout_destination else { return Ok(()) };
            let source = ctx.cache.root().join(format!("_container_{}", container.0));
            layout::layout_container(&source, &destination.join(format!("container-{}", container.0)), *try_count)
        }
        CacheAction::LayoutPayload { payload, try_count } => {
            let Some(destination) = &ctx.layout_destination else { return Ok(()) };
            let source = resolved.get(payload).ok_or_else(|| EngineError::Unexpected {
                detail: format!("payload {} laid out before being acquired", payload.0),
            })?;
            layout::layout_payload(source, &destination.join(&payload.0), *try_count)
        }
        CacheAction::SignalSyncpoint(_) | CacheAction::RemovePackageCache(_) => Ok(()),
    }
}

fn find_payload<'a>(state: &'a BundleState, key: &PayloadKey) -> Result<&'a Payload> {
    state
        .payloads
        .iter()
        .find(|p| &p.key == key)
        .ok_or_else(|| EngineError::NotFound { what: format!("payload {}", key.0) })
}

/// Verifies the payload acquired at `resolved[key]`, surfacing the
/// `{retry verify, retry acquire from start, cancel}` choice from
/// `prompt` to the caller on failure (`spec.md` 4.7) rather than
/// silently re-running `verify_payload` on identical, unchanged bytes.
/// `SourceChoice::Retry`/`LocalPath` both re-acquire from scratch
/// (the source bytes are presumed replaced); `Abort` surfaces as
/// [`EngineError::UserExit`]. Bounded by
/// `ctx.config.verify_retry_limit` verify-tryagain attempts, per
/// `spec.md` 8 property 8.
fn cache_payload(
    key: &PayloadKey,
    state: &BundleState,
    ctx: &CacheContext<'_>,
    current_package: Option<PackageId>,
    resolved: &mut HashMap<PayloadKey, PathBuf>,
    staging_roots: &[PathBuf],
    prompt: &mut impl FnMut(&Payload) -> SourceChoice,
) -> Result<()> {
    let payload = find_payload(state, key)?;
    let expected = ExpectedPayload { size: payload.file_size, sha512_hex: None };

    let mut attempt = 0;
    loop {
        let source = resolved
            .get(key)
            .ok_or_else(|| EngineError::Unexpected { detail: format!("payload {} cached before acquisition", key.0) })?
            .clone();
        match verify_payload(&source, &expected) {
            Ok(()) => break,
            Err(err) => {
                if attempt >= ctx.config.verify_retry_limit {
                    return Err(err);
                }
                attempt += 1;
                match prompt(payload) {
                    SourceChoice::Abort => return Err(EngineError::UserExit),
                    SourceChoice::LocalPath(path) if path.exists() => {
                        resolved.insert(key.clone(), path);
                    }
                    SourceChoice::LocalPath(_) | SourceChoice::Retry => {
                        let destination = ctx.cache.root().join("_download").join(&key.0);
                        let reacquired =
                            acquire_payload(payload, staging_roots, &destination, ctx.downloader, |p| prompt(p))?;
                        resolved.insert(key.clone(), reacquired);
                    }
                }
            }
        }
    }

    let source = resolved
        .get(key)
        .ok_or_else(|| EngineError::Unexpected { detail: format!("payload {} cached before acquisition", key.0) })?;
    let destination = current_package
        .and_then(|id| state.package(id))
        .map(|pkg| ctx.cache.package_dir(pkg).join(&key.0))
        .unwrap_or_else(|| ctx.cache.root().join("_unowned").join(&key.0));
    layout::layout_file(source, &destination, attempt)
}

fn extract_container(
    id: crate::state::ContainerId,
    state: &BundleState,
    ctx: &CacheContext<'_>,
    staging_roots: &mut Vec<PathBuf>,
) -> Result<()> {
    let container = state.container(id).ok_or_else(|| EngineError::NotFound { what: format!("container {}", id.0) })?;
    let source_path = container
        .source_path
        .clone()
        .unwrap_or_else(|| ctx.cache.root().join(format!("_container_{}", id.0)));
    if !source_path.exists() {
        return Err(EngineError::NotFound { what: format!("acquired container {} path", id.0) });
    }

    let staging = ctx.cache.root().join(format!("_extracted_{}", id.0));
    std::fs::create_dir_all(&staging).map_err(|source| EngineError::Io {
        action: format!("creating extraction staging dir {}", staging.display()),
        source,
    })?;

    let mut stream = crate::container::ContainerStream::open(container, &source_path)?;
    while let Some(name) = stream.next_stream()? {
        if state.payloads.iter().any(|p| p.container_id == Some(id) && p.key.0 == name) {
            stream.stream_to_file(&staging.join(&name))?;
        } else {
            stream.skip_stream()?;
        }
    }
    staging_roots.push(staging);
    Ok(())
}

/// Best-effort cleanup after a cache-phase failure, per `spec.md`
/// 4.7's Phase A rollback note: removes the failed package's
/// partially-populated cache directory so a subsequent retry starts
/// clean.
pub fn do_rollback_cache(outcome: &CachePhaseOutcome, state: &BundleState, cache: &CacheManager) {
    let Some(package_id) = outcome.failed_package else { return };
    if let Some(pkg) = state.package(package_id) {
        let _ = cache.remove_package(pkg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::package::{Package, PackageKind};

    #[test]
    fn acquires_verifies_and_caches_a_payload_then_signals_its_syncpoint() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("src");
        std::fs::create_dir_all(&source_dir).unwrap();
        let file = source_dir.join("a.msi");
        std::fs::write(&file, b"hello").unwrap();

        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        let mut payload = Payload::new(PayloadKey("a.msi".to_string()), 5, None);
        payload.source_path = Some(file);
        state.payloads.push(payload);

        let config = EngineConfig::default();
        let cache = CacheManager::at_path(dir.path().join("cache"));
        let ctx = CacheContext {
            cache: &cache,
            search_roots: Vec::new(),
            downloader: None,
            layout_destination: None,
            config: &config,
        };

        let actions = vec![
            CacheAction::PackageStart(PackageId(1)),
            CacheAction::AcquirePayload(PayloadKey("a.msi".to_string())),
            CacheAction::CachePayload(PayloadKey("a.msi".to_string())),
            CacheAction::PackageStop(PackageId(1)),
            CacheAction::SignalSyncpoint(CheckpointId(0)),
        ];

        let tracker = SyncpointTracker::new();
        let outcome = run(&actions, &state, &ctx, |_| SourceChoice::Abort, &tracker);
        assert!(outcome.failure.is_none());
        assert!(outcome.signaled.contains(&CheckpointId(0)));
        assert!(tracker.wait(CheckpointId(0)).is_ok());
    }

    #[test]
    fn missing_payload_source_fails_and_does_not_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = BundleState::new();
        state.payloads.push(Payload::new(PayloadKey("missing.msi".to_string()), 5, None));

        let config = EngineConfig::default();
        let cache = CacheManager::at_path(dir.path().join("cache2"));
        let ctx = CacheContext {
            cache: &cache,
            search_roots: Vec::new(),
            downloader: None,
            layout_destination: None,
            config: &config,
        };

        let actions = vec![
            CacheAction::AcquirePayload(PayloadKey("missing.msi".to_string())),
            CacheAction::SignalSyncpoint(CheckpointId(0)),
        ];
        let tracker = SyncpointTracker::new();
        let outcome = run(&actions, &state, &ctx, |_| SourceChoice::Abort, &tracker);
        assert!(outcome.failure.is_some());
        assert!(!outcome.signaled.contains(&CheckpointId(0)));
        assert!(tracker.wait(CheckpointId(0)).is_err());
    }

    #[test]
    fn cache_payload_routes_to_the_currently_active_package_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("src");
        std::fs::create_dir_all(&source_dir).unwrap();
        let file_a = source_dir.join("a.msi");
        let file_b = source_dir.join("b.msi");
        std::fs::write(&file_a, b"aaaaa").unwrap();
        std::fs::write(&file_b, b"bbbbb").unwrap();

        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        state.packages.push(Package::new(PackageId(2), PackageKind::Exe));
        let mut payload_a = Payload::new(PayloadKey("a.msi".to_string()), 5, None);
        payload_a.source_path = Some(file_a);
        let mut payload_b = Payload::new(PayloadKey("b.msi".to_string()), 5, None);
        payload_b.source_path = Some(file_b);
        state.payloads.push(payload_a);
        state.payloads.push(payload_b);

        let config = EngineConfig::default();
        let cache = CacheManager::at_path(dir.path().join("cache"));
        let ctx = CacheContext {
            cache: &cache,
            search_roots: Vec::new(),
            downloader: None,
            layout_destination: None,
            config: &config,
        };

        let actions = vec![
            CacheAction::PackageStart(PackageId(1)),
            CacheAction::AcquirePayload(PayloadKey("a.msi".to_string())),
            CacheAction::CachePayload(PayloadKey("a.msi".to_string())),
            CacheAction::PackageStop(PackageId(1)),
            CacheAction::PackageStart(PackageId(2)),
            CacheAction::AcquirePayload(PayloadKey("b.msi".to_string())),
            CacheAction::CachePayload(PayloadKey("b.msi".to_string())),
            CacheAction::PackageStop(PackageId(2)),
        ];

        let tracker = SyncpointTracker::new();
        let outcome = run(&actions, &state, &ctx, |_| SourceChoice::Abort, &tracker);
        assert!(outcome.failure.is_none());

        let pkg1 = state.package(PackageId(1)).unwrap();
        let pkg2 = state.package(PackageId(2)).unwrap();
        assert!(cache.package_dir(pkg1).join("a.msi").exists());
        assert!(cache.package_dir(pkg2).join("b.msi").exists());
        assert!(!cache.package_dir(pkg1).join("b.msi").exists());
        assert!(!cache.package_dir(pkg2).join("a.msi").exists());
    }

    #[test]
    fn verify_failure_reacquires_instead_of_spinning_on_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.msi");
        std::fs::write(&bad, b"x").unwrap();
        let good = dir.path().join("good.msi");
        std::fs::write(&good, b"hello").unwrap();

        let mut state = BundleState::new();
        state.packages.push(Package::new(PackageId(1), PackageKind::Exe));
        let mut payload = Payload::new(PayloadKey("p.msi".to_string()), 5, None);
        payload.source_path = Some(bad);
        state.payloads.push(payload);

        let config = EngineConfig::default();
        let cache = CacheManager::at_path(dir.path().join("cache"));
        let ctx = CacheContext {
            cache: &cache,
            search_roots: Vec::new(),
            downloader: None,
            layout_destination: None,
            config: &config,
        };

        let actions = vec![
            CacheAction::PackageStart(PackageId(1)),
            CacheAction::AcquirePayload(PayloadKey("p.msi".to_string())),
            CacheAction::CachePayload(PayloadKey("p.msi".to_string())),
            CacheAction::PackageStop(PackageId(1)),
        ];

        let prompt_calls = std::sync::Mutex::new(0);
        let tracker = SyncpointTracker::new();
        let outcome = run(
            &actions,
            &state,
            &ctx,
            |_| {
                *prompt_calls.lock().unwrap() += 1;
                SourceChoice::LocalPath(good.clone())
            },
            &tracker,
        );

        assert!(outcome.failure.is_none());
        assert_eq!(*prompt_calls.lock().unwrap(), 1);
        let pkg = state.package(PackageId(1)).unwrap();
        assert_eq!(std::fs::read(cache.package_dir(pkg).join("p.msi")).unwrap(), b"hello");
    }
}
