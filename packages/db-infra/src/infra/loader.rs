//! External bulk loader, driven as an opaque subprocess.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::DbInfraError;
use crate::infra::db::diagnostics::migration_counters;

/// Captured result of one loader run. Output is kept verbatim and never
/// parsed; the exit status is the only signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LoaderOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.status {
            Some(code) => format!("status {code}"),
            None => "signal".to_string(),
        }
    }
}

#[async_trait]
pub trait BulkLoader: Send + Sync {
    fn name(&self) -> &str;
    async fn is_available(&self) -> bool;
    async fn install(&self) -> Result<(), DbInfraError>;
    /// Copy everything at `source_uri` into `target_url`.
    async fn load(&self, source_uri: &str, target_url: &str) -> Result<LoaderOutput, DbInfraError>;
}

/// `sqlite://` followed by the absolute path, which yields the
/// `sqlite:///abs/path` form.
pub fn sqlite_source_uri(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

const INSTALL_STEPS: &[&[&str]] = &[
    &["sudo", "apt-get", "update", "-y"],
    &["sudo", "apt-get", "install", "-y", "pgloader"],
];

#[derive(Debug, Clone)]
pub struct PgLoader {
    bin: String,
}

impl PgLoader {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

async fn run(program: &str, args: &[&str]) -> Result<LoaderOutput, DbInfraError> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DbInfraError::Loader {
            message: format!("failed to run {program}: {e}"),
        })?;
    Ok(LoaderOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[async_trait]
impl BulkLoader for PgLoader {
    fn name(&self) -> &str {
        &self.bin
    }

    async fn is_available(&self) -> bool {
        run(&self.bin, &["--version"]).await.is_ok()
    }

    async fn install(&self) -> Result<(), DbInfraError> {
        for step in INSTALL_STEPS {
            let (program, args) = step.split_first().ok_or_else(|| DbInfraError::Loader {
                message: "empty install step".to_string(),
            })?;
            info!(command = %step.join(" "), "loader=install");
            let out = run(program, args).await?;
            if !out.success() {
                return Err(DbInfraError::Loader {
                    message: format!(
                        "'{}' exited with {}: {}",
                        step.join(" "),
                        out.status_text(),
                        out.stderr.trim()
                    ),
                });
            }
        }
        Ok(())
    }

    async fn load(&self, source_uri: &str, target_url: &str) -> Result<LoaderOutput, DbInfraError> {
        run(&self.bin, &[source_uri, target_url]).await
    }
}

/// Install the loader only when it cannot be run, then confirm it can.
pub async fn ensure_available<L: BulkLoader + ?Sized>(loader: &L) -> Result<(), DbInfraError> {
    if loader.is_available().await {
        return Ok(());
    }
    warn!(loader = loader.name(), "loader=missing, attempting install");
    loader.install().await?;
    if !loader.is_available().await {
        return Err(DbInfraError::Loader {
            message: format!("{} is still unavailable after install", loader.name()),
        });
    }
    info!(loader = loader.name(), "loader=installed");
    Ok(())
}

/// Run the loader and turn a non-zero exit into an error. Output is logged
/// verbatim either way.
pub async fn run_loader<L: BulkLoader + ?Sized>(
    loader: &L,
    source_uri: &str,
    target_url: &str,
) -> Result<LoaderOutput, DbInfraError> {
    migration_counters::loader_invoked();
    let out = loader.load(source_uri, target_url).await?;

    info!("===== PGLOADER OUTPUT =====\n{}", out.stdout);
    if !out.stderr.is_empty() {
        warn!("===== PGLOADER ERRORS =====\n{}", out.stderr);
    }

    if !out.success() {
        migration_counters::loader_failed();
        return Err(DbInfraError::LoaderFailed {
            status: out.status_text(),
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn source_uri_has_three_slashes_before_an_absolute_path() {
        let uri = sqlite_source_uri(&PathBuf::from("/srv/library/metadata.db"));
        assert_eq!(uri, "sqlite:///srv/library/metadata.db");
    }

    #[test]
    fn signal_exit_is_not_success() {
        let out = LoaderOutput {
            status: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!out.success());
        assert_eq!(out.status_text(), "signal");
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let loader = PgLoader::new("definitely-not-a-real-loader-binary");
        assert!(!loader.is_available().await);
    }
}
