use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 48;

/// State owned by one judge run of one submission.
///
/// Dropping the context removes the run's working directory, so cleanup happens
/// on every exit path including errors.
#[derive(Debug)]
pub struct JudgeContext {
    submission_id: String,
    run_id: Uuid,
    work_dir: WorkDir,
    bind_source: PathBuf,
}

impl JudgeContext {
    /// Creates a fresh directory `<work_root>/<submission>-<run>`.
    ///
    /// With `host_work_root` set, the sandbox binds the same directory name under
    /// that root instead, for daemons that resolve paths outside this process.
    pub fn create(
        submission_id: &str,
        work_root: &Path,
        host_work_root: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let run_id = Uuid::new_v4();
        let dir_name = format!("{}-{}", sanitize(submission_id), run_id.simple());
        let path = work_root.join(&dir_name);

        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create work dir {}", path.display()))?;
        // Sandboxed programs run unprivileged and must be able to write here
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o777))?;
        }

        let bind_source = match host_work_root {
            Some(root) => root.join(&dir_name),
            None => path.clone(),
        };

        log::debug!("Created work dir {} for submission {submission_id}", path.display());

        Ok(Self {
            submission_id: submission_id.to_string(),
            run_id,
            work_dir: WorkDir(path),
            bind_source,
        })
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir.0
    }

    /// Host path the sandbox mounts
    pub fn bind_source(&self) -> &Path {
        &self.bind_source
    }

    /// Unique, daemon-safe name for one instance of this run
    pub fn instance_name(&self, stage: &str) -> String {
        format!(
            "judger-{}-{}-{stage}",
            sanitize(&self.submission_id),
            &self.run_id.simple().to_string()[..8]
        )
    }
}

#[derive(Debug)]
struct WorkDir(PathBuf);

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            log::warn!("Unable to remove work dir {}: {e}", self.0.display());
        }
    }
}

/// Keeps `[A-Za-z0-9_.-]`, replacing anything else with `_`
fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .take(MAX_NAME_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}
