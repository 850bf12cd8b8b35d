//! Temp/Session Manager: tracks per-job scratch directories and decides when it's safe to
//! delete them.
//!
//! A session is "protected" while a job owns files inside it; protection is what keeps the
//! periodic sweep from deleting a directory a job is still reading from mid-chunk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const IDLE_EVICTION: Duration = Duration::from_secs(30 * 60);
const STALE_SWEEP: Duration = Duration::from_secs(24 * 60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const EMERGENCY_FREE_BYTES: u64 = 1024 * 1024 * 1024;

struct SessionRecord {
    dir: PathBuf,
    last_activity: Instant,
    created: Instant,
    protected: bool,
}

/// Stats reported after a cleanup sweep, mostly useful for logging and the `/v1/info`
/// endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupStats {
    pub evicted_idle: usize,
    pub evicted_stale: usize,
    pub evicted_emergency: usize,
    pub bytes_reclaimed: u64,
}

pub struct SessionManager {
    root: PathBuf,
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create (or recreate) `session_id`'s scratch directory and start tracking it.
    pub fn register(&self, session_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(session_id);
        std::fs::create_dir_all(&dir)?;

        let now = Instant::now();
        self.sessions.lock().unwrap().insert(
            session_id.to_string(),
            SessionRecord {
                dir: dir.clone(),
                last_activity: now,
                created: now,
                protected: false,
            },
        );
        Ok(dir)
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(record) = self.sessions.lock().unwrap().get_mut(session_id) {
            record.last_activity = Instant::now();
        }
    }

    pub fn protect_file(&self, session_id: &str) {
        if let Some(record) = self.sessions.lock().unwrap().get_mut(session_id) {
            record.protected = true;
        }
    }

    pub fn unprotect_file(&self, session_id: &str) {
        if let Some(record) = self.sessions.lock().unwrap().get_mut(session_id) {
            record.protected = false;
        }
    }

    /// Protects `session_id` for as long as the returned guard is held, unprotecting it again
    /// on drop even if the caller returns early via `?`.
    pub fn protect(&self, session_id: &str) -> SessionProtectionGuard<'_> {
        self.protect_file(session_id);
        SessionProtectionGuard { manager: self, session_id: session_id.to_string() }
    }

    /// Delete a session's directory now. `force` bypasses the protected flag, used when a
    /// job fails or is cancelled and its scratch files are no longer needed regardless of
    /// in-flight reads.
    pub fn cleanup_session(&self, session_id: &str, force: bool) -> std::io::Result<u64> {
        let dir = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get(session_id) {
                Some(record) if record.protected && !force => return Ok(0),
                Some(_) => sessions.remove(session_id).map(|r| r.dir),
                None => None,
            }
        };

        let Some(dir) = dir else { return Ok(0) };
        remove_dir_and_measure(&dir)
    }

    /// Run one sweep: evict sessions idle past [`IDLE_EVICTION`] or older than
    /// [`STALE_SWEEP`], then if the temp root's filesystem has less than
    /// [`EMERGENCY_FREE_BYTES`] free, evict further sessions oldest-first until it doesn't.
    pub fn sweep(&self, free_bytes: impl Fn(&std::path::Path) -> u64) -> std::io::Result<CleanupStats> {
        let mut stats = CleanupStats::default();
        let now = Instant::now();

        let (idle, stale): (Vec<String>, Vec<String>) = {
            let sessions = self.sessions.lock().unwrap();
            let idle = sessions
                .iter()
                .filter(|(_, r)| !r.protected && now.duration_since(r.last_activity) >= IDLE_EVICTION)
                .map(|(id, _)| id.clone())
                .collect();
            let stale = sessions
                .iter()
                .filter(|(_, r)| !r.protected && now.duration_since(r.created) >= STALE_SWEEP)
                .map(|(id, _)| id.clone())
                .collect();
            (idle, stale)
        };

        for id in idle {
            stats.bytes_reclaimed += self.cleanup_session(&id, false)?;
            stats.evicted_idle += 1;
        }
        for id in stale {
            stats.bytes_reclaimed += self.cleanup_session(&id, false)?;
            stats.evicted_stale += 1;
        }

        if free_bytes(&self.root) < EMERGENCY_FREE_BYTES {
            let oldest: Vec<String> = {
                let mut sessions: Vec<(String, Instant)> = self
                    .sessions
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(_, r)| !r.protected)
                    .map(|(id, r)| (id.clone(), r.created))
                    .collect();
                sessions.sort_by_key(|(_, created)| *created);
                sessions.into_iter().map(|(id, _)| id).collect()
            };

            for id in oldest {
                if free_bytes(&self.root) >= EMERGENCY_FREE_BYTES {
                    break;
                }
                stats.bytes_reclaimed += self.cleanup_session(&id, true)?;
                stats.evicted_emergency += 1;
            }
        }

        Ok(stats)
    }

    pub fn sweep_interval(&self) -> Duration {
        SWEEP_INTERVAL
    }
}

/// RAII handle returned by [`SessionManager::protect`]; unprotects the session on drop.
pub struct SessionProtectionGuard<'a> {
    manager: &'a SessionManager,
    session_id: String,
}

impl Drop for SessionProtectionGuard<'_> {
    fn drop(&mut self) {
        self.manager.unprotect_file(&self.session_id);
    }
}

/// Bytes free on the filesystem backing `path`, for feeding [`SessionManager::sweep`]'s
/// emergency-eviction check. `0` (treated as "out of space") if the path doesn't exist yet or
/// the platform doesn't support the query.
#[cfg(unix)]
pub fn disk_free_bytes(path: &std::path::Path) -> u64 {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return 0;
    };

    unsafe {
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        if libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) != 0 {
            return 0;
        }
        let stat = stat.assume_init();
        (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64)
    }
}

#[cfg(not(unix))]
pub fn disk_free_bytes(_path: &std::path::Path) -> u64 {
    u64::MAX
}

fn remove_dir_and_measure(dir: &std::path::Path) -> std::io::Result<u64> {
    let size = dir_size(dir).unwrap_or(0);
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(size)
}

fn dir_size(dir: &std::path::Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    if !dir.exists() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn register_creates_directory_and_tracks_it() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        let dir = manager.register("s1").unwrap();
        assert!(dir.exists());
    }

    #[test]
    fn cleanup_removes_directory_and_reports_size() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        let dir = manager.register("s1").unwrap();
        std::fs::write(dir.join("chunk_0000.wav"), vec![0u8; 128]).unwrap();

        let reclaimed = manager.cleanup_session("s1", false).unwrap();
        assert_eq!(reclaimed, 128);
        assert!(!dir.exists());
    }

    #[test]
    fn protected_session_survives_non_forced_cleanup() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        let dir = manager.register("s1").unwrap();
        manager.protect_file("s1");

        let reclaimed = manager.cleanup_session("s1", false).unwrap();
        assert_eq!(reclaimed, 0);
        assert!(dir.exists());

        manager.unprotect_file("s1");
        manager.cleanup_session("s1", false).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn protection_guard_unprotects_on_drop() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        let dir = manager.register("s1").unwrap();

        {
            let _guard = manager.protect("s1");
            assert_eq!(manager.cleanup_session("s1", false).unwrap(), 0);
            assert!(dir.exists());
        }

        manager.cleanup_session("s1", false).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn forced_cleanup_bypasses_protection() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        let dir = manager.register("s1").unwrap();
        manager.protect_file("s1");

        manager.cleanup_session("s1", true).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn sweep_triggers_emergency_eviction_when_free_space_is_low() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        manager.register("s1").unwrap();
        manager.register("s2").unwrap();

        let stats = manager.sweep(|_| 0).unwrap();
        assert_eq!(stats.evicted_emergency, 2);
    }

    #[cfg(unix)]
    #[test]
    fn disk_free_bytes_reports_nonzero_for_an_existing_path() {
        let root = tempdir().unwrap();
        assert!(disk_free_bytes(root.path()) > 0);
    }

    #[test]
    fn sweep_is_noop_when_space_is_plentiful_and_sessions_are_fresh() {
        let root = tempdir().unwrap();
        let manager = SessionManager::new(root.path().to_path_buf());
        manager.register("s1").unwrap();

        let stats = manager.sweep(|_| u64::MAX).unwrap();
        assert_eq!(stats.evicted_idle, 0);
        assert_eq!(stats.evicted_stale, 0);
        assert_eq!(stats.evicted_emergency, 0);
    }
}
