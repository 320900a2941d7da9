use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const DATABASE_NAME: &str = "judger.sqlite3";

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "judger").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    // Connection options apply to every pooled connection, unlike one-off PRAGMA queries
    let options = SqliteConnectOptions::new()
        .filename(db_path.as_ref())
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .connect_with(options)
        .await?;

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS queue_jobs (
            seq            INTEGER  PRIMARY KEY,
            id             TEXT     NOT NULL UNIQUE,
            payload        TEXT     NOT NULL,
            state          TEXT     NOT NULL,
            priority       INTEGER  NOT NULL DEFAULT 0,
            attempts       INTEGER  NOT NULL DEFAULT 0,
            max_attempts   INTEGER  NOT NULL,
            run_at         INTEGER  NOT NULL,
            lease_owner    TEXT,
            lease_until    INTEGER,
            progress       TEXT,
            result         TEXT,
            failed_reason  TEXT,
            created_at     INTEGER  NOT NULL,
            updated_at     INTEGER  NOT NULL,
            finished_at    INTEGER
        );",
        "CREATE INDEX IF NOT EXISTS idx_queue_jobs_claim ON queue_jobs(state, priority, run_at);",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id             TEXT     PRIMARY KEY,
            status         TEXT     NOT NULL,
            time           REAL     NOT NULL DEFAULT 0,
            memory         REAL     NOT NULL DEFAULT 0,
            point          REAL     NOT NULL DEFAULT 0,
            diagnostics    TEXT     NOT NULL DEFAULT '',
            worker_id      TEXT,
            retry_count    INTEGER  NOT NULL DEFAULT 0,
            started_at     TEXT,
            completed_at   TEXT,
            updated_at     TEXT     NOT NULL
        );",
        r"
        CREATE TABLE IF NOT EXISTS submission_case (
            submission_id  TEXT     NOT NULL,
            case_index     INTEGER  NOT NULL,
            status         TEXT     NOT NULL,
            time           REAL     NOT NULL,
            memory         REAL     NOT NULL,
            PRIMARY KEY (submission_id, case_index),
            FOREIGN KEY (submission_id) REFERENCES submissions (id) ON DELETE CASCADE
        );",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Milliseconds since the Unix epoch, the queue's clock
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
