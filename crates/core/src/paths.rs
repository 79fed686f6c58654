//! Centralized storage locations.

use std::path::PathBuf;

/// App cache root: `~/.cache/novel-dl/` (Linux) or the platform equivalent.
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("novel-dl"))
}

/// SQLite database file: `<app_cache_dir>/novel-dl.db`.
pub fn db_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("novel-dl.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path_under_cache_dir() {
        if let (Some(root), Some(db)) = (app_cache_dir(), db_path()) {
            assert!(db.starts_with(&root));
            assert!(db.to_string_lossy().ends_with("novel-dl.db"));
        }
    }
}
