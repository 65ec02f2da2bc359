//! Saved-session file: the JSON snapshot adopted at startup and written
//! back on shutdown.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use umbra_core::SavedSession;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Saved session I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Saved session {path} is not valid: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn load_saved_session(path: &Path) -> Result<SavedSession, PersistError> {
    let bytes = fs::read(path).map_err(io_error(path))?;
    serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write via a temp file and rename, so a crash never leaves half a file.
pub fn store_saved_session(path: &Path, session: &SavedSession) -> Result<(), PersistError> {
    let json = serde_json::to_vec_pretty(session).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(path))?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
    file.write_all(&json).map_err(io_error(&tmp))?;
    file.sync_all().map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use umbra_core::{EffectCatalog, HiddenRegion, SessionState, Token};

    fn sample() -> SavedSession {
        let mut state = SessionState::for_map("maps/cave.png", &EffectCatalog::builtin());
        state.fog.hidden_polygons = vec![HiddenRegion::new(
            vec![(0.0, 0.0), (0.5, 0.0), (0.0, 0.5)],
            "#000000",
        )];
        SavedSession {
            state,
            tokens: vec![Token {
                id: "tok_1_abcde".into(),
                label: "A".into(),
                color: "#ff0000".into(),
                x: 0.5,
                y: 0.5,
            }],
        }
    }

    #[test]
    fn test_store_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saves/session.json");
        store_saved_session(&path, &sample()).unwrap();

        assert_eq!(load_saved_session(&path).unwrap(), sample());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_saved_file_uses_document_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        store_saved_session(&path, &sample()).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["state"]["original_map_path"], "maps/cave.png");
        assert!(raw["state"]["fog_of_war"]["hidden_polygons"].is_array());
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            load_saved_session(&missing),
            Err(PersistError::Io { .. })
        ));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, b"[1, 2").unwrap();
        assert!(matches!(
            load_saved_session(&garbage),
            Err(PersistError::Json { .. })
        ));
    }
}
