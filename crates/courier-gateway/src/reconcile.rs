//! Artifact/record reconciliation.
//!
//! The durable store and the on-disk artifacts can diverge: a crash can
//! leave an artifact without its record, an operator can drop rows while
//! files remain. A mismatch is an error condition to resolve, not ignore.

use std::path::{Path, PathBuf};

use courier_core::{AccountId, GatewayError};
use courier_store::SessionRepo;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of comparing the local artifact against the durable record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionValidity {
    /// Artifact and record both present.
    Valid,
    /// Artifact existed without a record; the stale artifact was deleted.
    Invalid,
    /// No artifact on disk.
    NotFound,
}

/// Artifact directory for one account under `root`.
#[must_use]
pub fn artifact_dir(root: &Path, id: &AccountId) -> PathBuf {
    root.join(id.joined())
}

/// Delete the artifact directory if present; returns whether it existed.
pub fn wipe_artifact(root: &Path, id: &AccountId) -> std::io::Result<bool> {
    let dir = artifact_dir(root, id);
    if dir.is_dir() {
        std::fs::remove_dir_all(&dir)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Compare artifact presence against the durable record.
///
/// An artifact without a record is stale material from a wiped session; it
/// is deleted on sight and reported as `Invalid`.
pub fn check_session_validity(
    conn: &Connection,
    root: &Path,
    id: &AccountId,
) -> Result<SessionValidity, GatewayError> {
    let dir = artifact_dir(root, id);
    if !dir.is_dir() {
        return Ok(SessionValidity::NotFound);
    }
    if SessionRepo::exists(conn, id).map_err(GatewayError::from)? {
        return Ok(SessionValidity::Valid);
    }
    warn!(account = %id.joined(), "stale session artifact without record, deleting");
    std::fs::remove_dir_all(&dir)?;
    Ok(SessionValidity::Invalid)
}

/// Artifact folder names under `root` with no matching durable record.
pub fn list_orphaned(conn: &Connection, root: &Path) -> Result<Vec<String>, GatewayError> {
    let mut orphans = Vec::new();
    if !root.is_dir() {
        return Ok(orphans);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let has_record = match AccountId::from_joined(&name) {
            Some(id) => SessionRepo::exists(conn, &id).map_err(GatewayError::from)?,
            // A folder the naming scheme cannot produce has no owner.
            None => false,
        };
        if !has_record {
            orphans.push(name);
        }
    }
    orphans.sort();
    Ok(orphans)
}

/// Delete every orphaned artifact folder; returns the removed names.
pub fn cleanup_orphaned(conn: &Connection, root: &Path) -> Result<Vec<String>, GatewayError> {
    let orphans = list_orphaned(conn, root)?;
    for name in &orphans {
        std::fs::remove_dir_all(root.join(name))?;
        info!(folder = %name, "removed orphaned session artifact");
    }
    Ok(orphans)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use courier_store::migrations::run_migrations;

    fn setup() -> (Connection, tempfile::TempDir) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        (conn, tempfile::tempdir().unwrap())
    }

    fn make_artifact(root: &Path, id: &AccountId) {
        let dir = artifact_dir(root, id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("creds.json"), "{}").unwrap();
    }

    #[test]
    fn valid_when_artifact_and_record_exist() {
        let (conn, root) = setup();
        let id = AccountId::new("wa", "alice");
        let _ = SessionRepo::upsert_active(&conn, &id, "5215512345678").unwrap();
        make_artifact(root.path(), &id);

        let validity = check_session_validity(&conn, root.path(), &id).unwrap();
        assert_eq!(validity, SessionValidity::Valid);
        assert!(artifact_dir(root.path(), &id).is_dir());
    }

    #[test]
    fn stale_artifact_is_deleted_and_invalid() {
        let (conn, root) = setup();
        let id = AccountId::new("wa", "alice");
        make_artifact(root.path(), &id);

        let validity = check_session_validity(&conn, root.path(), &id).unwrap();
        assert_eq!(validity, SessionValidity::Invalid);
        assert!(!artifact_dir(root.path(), &id).exists());
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let (conn, root) = setup();
        let id = AccountId::new("wa", "alice");
        let _ = SessionRepo::upsert_active(&conn, &id, "5215512345678").unwrap();

        let validity = check_session_validity(&conn, root.path(), &id).unwrap();
        assert_eq!(validity, SessionValidity::NotFound);
    }

    #[test]
    fn orphan_scan_flags_unowned_and_unparseable_folders() {
        let (conn, root) = setup();
        let owned = AccountId::new("wa", "alice");
        let _ = SessionRepo::upsert_active(&conn, &owned, "5215512345678").unwrap();
        make_artifact(root.path(), &owned);
        make_artifact(root.path(), &AccountId::new("wa", "ghost"));
        std::fs::create_dir_all(root.path().join("junk_no_separator")).unwrap();
        // Plain files are ignored.
        std::fs::write(root.path().join("notes.txt"), "x").unwrap();

        let orphans = list_orphaned(&conn, root.path()).unwrap();
        assert_eq!(orphans, vec!["ghost-wa", "junk_no_separator"]);
    }

    #[test]
    fn cleanup_removes_only_orphans() {
        let (conn, root) = setup();
        let owned = AccountId::new("wa", "alice");
        let _ = SessionRepo::upsert_active(&conn, &owned, "5215512345678").unwrap();
        make_artifact(root.path(), &owned);
        make_artifact(root.path(), &AccountId::new("wa", "ghost"));

        let removed = cleanup_orphaned(&conn, root.path()).unwrap();
        assert_eq!(removed, vec!["ghost-wa"]);
        assert!(artifact_dir(root.path(), &owned).is_dir());
        assert!(!root.path().join("ghost-wa").exists());
    }

    #[test]
    fn wipe_artifact_reports_presence() {
        let (_conn, root) = setup();
        let id = AccountId::new("wa", "alice");
        assert!(!wipe_artifact(root.path(), &id).unwrap());
        make_artifact(root.path(), &id);
        assert!(wipe_artifact(root.path(), &id).unwrap());
        assert!(!artifact_dir(root.path(), &id).exists());
    }

    #[test]
    fn missing_root_yields_no_orphans() {
        let (conn, root) = setup();
        let missing = root.path().join("never-created");
        assert!(list_orphaned(&conn, &missing).unwrap().is_empty());
    }
}
