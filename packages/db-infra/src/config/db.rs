use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use migration::Ident;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sea_orm::DatabaseBackend;

use crate::error::DbInfraError;

/// RFC 3986 unreserved characters pass through, everything else is encoded.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";
pub const DEFAULT_IMPORT_DATABASE: &str = "metadatadb";
pub const DEFAULT_LOADER_BIN: &str = "pgloader";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
}

impl Dialect {
    pub fn scheme(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
        }
    }

    pub fn backend(self) -> DatabaseBackend {
        match self {
            Dialect::Postgres => DatabaseBackend::Postgres,
        }
    }
}

/// Where and as whom to connect. Built once per run from [`DbConfig`].
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub user: String,
    password: String,
    database: String,
}

impl ConnectionTarget {
    pub fn new(
        dialect: Dialect,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Same server and credentials, different database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    pub fn url(&self) -> String {
        self.render(&utf8_percent_encode(&self.password, URL_COMPONENT).to_string())
    }

    /// URL with the password masked, for logs and error messages.
    pub fn sanitized_url(&self) -> String {
        self.render("***")
    }

    fn render(&self, password: &str) -> String {
        format!(
            "{scheme}://{user}:{password}@{host}:{port}/{database}",
            scheme = self.dialect.scheme(),
            user = utf8_percent_encode(&self.user, URL_COMPONENT),
            host = self.host,
            port = self.port,
            database = utf8_percent_encode(&self.database, URL_COMPONENT),
        )
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sanitized_url())
    }
}

/// Environment-style configuration, resolved once at startup.
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    password: String,
    pub admin_database: String,
    pub app_database: Option<String>,
    pub import_database: String,
    pub source_path: Option<PathBuf>,
    pub loader_bin: String,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("admin_database", &self.admin_database)
            .field("app_database", &self.app_database)
            .field("import_database", &self.import_database)
            .field("source_path", &self.source_path)
            .field("loader_bin", &self.loader_bin)
            .finish()
    }
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbInfraError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve configuration through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DbInfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let must = |key: &str| {
            get(key).ok_or_else(|| {
                DbInfraError::config(format!("Required environment variable '{key}' is not set"))
            })
        };

        let port = match get("DB_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                DbInfraError::config(format!("DB_PORT must be a port number, got '{raw}'"))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: get("DB_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            user: must("DB_USERNAME")?,
            password: must("DB_PASSWORD")?,
            admin_database: get("DB_ADMIN_DATABASE")
                .unwrap_or_else(|| DEFAULT_ADMIN_DATABASE.to_string()),
            app_database: get("DATABASENAME_APP"),
            import_database: get("DATABASENAME_CALIBRE")
                .unwrap_or_else(|| DEFAULT_IMPORT_DATABASE.to_string()),
            source_path: get("METADATA_DB_PATH").map(PathBuf::from),
            loader_bin: get("PGLOADER_BIN").unwrap_or_else(|| DEFAULT_LOADER_BIN.to_string()),
        })
    }

    fn target(&self, database: impl Into<String>) -> ConnectionTarget {
        ConnectionTarget::new(
            Dialect::Postgres,
            self.host.clone(),
            self.port,
            self.user.clone(),
            self.password.clone(),
            database,
        )
    }

    /// Used only to create databases.
    pub fn admin_target(&self) -> ConnectionTarget {
        self.target(self.admin_database.clone())
    }

    /// Database holding the consolidated and legacy tables.
    pub fn app_target(&self) -> Result<ConnectionTarget, DbInfraError> {
        let database = self.app_database.clone().ok_or_else(|| {
            DbInfraError::config("Required environment variable 'DATABASENAME_APP' is not set")
        })?;
        Ok(self.target(database))
    }

    /// Import destination. The name is lower-cased because the server folds
    /// unquoted identifiers, and validated because it is embedded in
    /// `CREATE DATABASE`.
    pub fn import_target(&self) -> Result<ConnectionTarget, DbInfraError> {
        let name = Ident::new(self.import_database.to_lowercase()).map_err(|e| {
            DbInfraError::config(format!("DATABASENAME_CALIBRE is not a usable name: {e}"))
        })?;
        Ok(self.target(name.as_str()))
    }

    pub fn source_path(&self) -> Result<&Path, DbInfraError> {
        self.source_path.as_deref().ok_or_else(|| {
            DbInfraError::config("Required environment variable 'METADATA_DB_PATH' is not set")
        })
    }
}

/// Load a `.env` file into the process environment. An explicit path must
/// exist; the implicit `.env` lookup is best-effort.
pub fn load_dotenv(path: Option<&Path>) -> Result<(), DbInfraError> {
    match path {
        Some(path) => dotenvy::from_path(path).map(|_| ()).map_err(|e| {
            DbInfraError::config(format!("failed to load env file {}: {e}", path.display()))
        }),
        None => {
            let _ = dotenvy::dotenv();
            Ok(())
        }
    }
}
