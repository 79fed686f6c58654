/// Inline SQL migrations for the novel-dl database schema.
///
/// Applied in order and tracked in `_migrations`; never edit a shipped entry,
/// append a new one.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: catalog entries (owned by the catalog collaborator)
    r#"
CREATE TABLE IF NOT EXISTS novels (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    author TEXT,
    created_at INTEGER NOT NULL
);
"#,
    // Migration 2: retrieved units
    r#"
CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY,
    novel_id INTEGER NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
    chapter_index INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_chapters_novel ON chapters(novel_id, chapter_index);"#,
    // Migration 3: download tasks
    r#"
CREATE TABLE IF NOT EXISTS download_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    novel_id INTEGER NOT NULL REFERENCES novels(id),
    status TEXT NOT NULL DEFAULT 'PENDING',
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    message TEXT,
    execution_handle TEXT,
    max_units INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_tasks_user_created ON download_tasks(user_id, created_at DESC);"#,
    // At most one active task per (user, novel). Admission checks first; this
    // index makes a lost race fail loudly instead of duplicating.
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_one_active
    ON download_tasks(user_id, novel_id)
    WHERE status IN ('PENDING', 'DOWNLOADING', 'PROCESSING');
"#,
];
