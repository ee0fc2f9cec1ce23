//! Database definition models.

use serde::{Deserialize, Serialize};

/// Database driver enumeration.
///
/// A driver string outside this set fails deserialization, so an
/// unsupported driver is rejected at configuration load time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// MySQL database.
    MySQL,
    /// PostgreSQL database.
    #[serde(alias = "postgresql")]
    Postgres,
    /// SQLite database.
    SQLite,
}

impl DbType {
    /// Returns the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DbType::MySQL => Some(3306),
            DbType::Postgres => Some(5432),
            DbType::SQLite => None,
        }
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::MySQL => write!(f, "mysql"),
            DbType::Postgres => write!(f, "postgres"),
            DbType::SQLite => write!(f, "sqlite"),
        }
    }
}

/// One configured database. Immutable after load.
///
/// The logical name is the key of the `databases` map in the config file
/// and is filled in during loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseDefinition {
    /// Logical database name (config map key).
    #[serde(skip_deserializing)]
    pub name: String,
    /// Database driver.
    pub driver: DbType,
    /// Database host (for network databases).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Database port (driver default if not specified).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database name, or file path for SQLite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Database username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Database password (not serialized in responses).
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
}
