use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;

/// Where the documentation bundle is published
pub const DOWNLOAD_URL: &str =
    "https://app.codeguide.dev/api/urls/db0f1f40-a147-48e1-8f45-c98f2254d1c5?download=true";

/// File the downloaded bundle is saved to, overwritten on every run
pub const ARCHIVE_FILE_NAME: &str = "downloaded_project.zip";

/// Directory the bundle is extracted into, recreated on every run
pub const DOCUMENTATION_DIR_NAME: &str = "documentation";

pub const IMPLEMENTATION_PLAN_FILE_NAME: &str = "implementation_plan.md";

/// Filesystem locations used by a run
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_dir: PathBuf,
}

impl Settings {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Settings rooted at the directory holding the running executable
    pub fn from_program_dir() -> Result<Self> {
        let exe = std::env::current_exe().context("failed to locate the running executable")?;
        let base_dir = exe
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", exe.display()))?;
        Ok(Self::new(base_dir))
    }

    pub fn url(&self) -> &'static str {
        DOWNLOAD_URL
    }

    pub fn archive_path(&self) -> PathBuf {
        self.base_dir.join(ARCHIVE_FILE_NAME)
    }

    pub fn documentation_dir(&self) -> PathBuf {
        self.base_dir.join(DOCUMENTATION_DIR_NAME)
    }

    pub fn implementation_plan_path(&self) -> PathBuf {
        self.documentation_dir().join(IMPLEMENTATION_PLAN_FILE_NAME)
    }
}
