use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use db_infra::{BulkLoader, DbInfraError, LoaderOutput};

use crate::fake_cluster::{FakeCluster, FakeTable};

#[derive(Default)]
struct State {
    available: bool,
    install_succeeds: bool,
    installs: usize,
    status: Option<i32>,
    stdout: String,
    stderr: String,
    invocations: Vec<(String, String)>,
    copy: Option<(FakeCluster, BTreeMap<String, FakeTable>)>,
}

/// Scripted loader. On a zero exit it copies its seeded tables into the
/// destination database named by the last segment of the target URL.
pub struct FakeLoader {
    state: Mutex<State>,
}

impl FakeLoader {
    pub fn available() -> Self {
        Self {
            state: Mutex::new(State {
                available: true,
                install_succeeds: true,
                status: Some(0),
                stdout: "table name     errors       rows\n".to_string(),
                ..State::default()
            }),
        }
    }

    /// Not installed; whether installing helps is set with [`Self::install_succeeds`].
    pub fn missing() -> Self {
        let loader = Self::available();
        loader.with(|s| s.available = false);
        loader
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn install_succeeds(self, succeeds: bool) -> Self {
        self.with(|s| s.install_succeeds = succeeds);
        self
    }

    pub fn exit_with(self, status: i32, stderr: &str) -> Self {
        self.with(|s| {
            s.status = Some(status);
            s.stderr = stderr.to_string();
        });
        self
    }

    /// Output printed on every run, whatever the exit status.
    pub fn prints(self, stdout: &str, stderr: &str) -> Self {
        self.with(|s| {
            s.stdout = stdout.to_string();
            s.stderr = stderr.to_string();
        });
        self
    }

    pub fn copies_into(self, cluster: &FakeCluster, tables: BTreeMap<String, FakeTable>) -> Self {
        self.with(|s| s.copy = Some((cluster.clone(), tables)));
        self
    }

    pub fn invocations(&self) -> Vec<(String, String)> {
        self.with(|s| s.invocations.clone())
    }

    pub fn installs(&self) -> usize {
        self.with(|s| s.installs)
    }
}

#[async_trait]
impl BulkLoader for FakeLoader {
    fn name(&self) -> &str {
        "fake-pgloader"
    }

    async fn is_available(&self) -> bool {
        self.with(|s| s.available)
    }

    async fn install(&self) -> Result<(), DbInfraError> {
        self.with(|s| {
            s.installs += 1;
            if s.install_succeeds {
                s.available = true;
                Ok(())
            } else {
                Err(DbInfraError::Loader {
                    message: "'sudo apt-get install -y pgloader' exited with status 100".into(),
                })
            }
        })
    }

    async fn load(&self, source_uri: &str, target_url: &str) -> Result<LoaderOutput, DbInfraError> {
        self.with(|s| {
            s.invocations.push((source_uri.to_string(), target_url.to_string()));
            if s.status == Some(0) {
                if let Some((cluster, tables)) = &s.copy {
                    let database = target_url.rsplit('/').next().unwrap_or_default();
                    for (name, table) in tables {
                        cluster.put_table(database, name, table.clone());
                    }
                }
            }
            Ok(LoaderOutput {
                status: s.status,
                stdout: s.stdout.clone(),
                stderr: s.stderr.clone(),
            })
        })
    }
}
