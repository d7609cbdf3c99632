//! Per-worker database provisioning against an administrative connection.
//!
//! Every worker owns one database whose name is derived from its index. The
//! provisioner only ever touches that name, so workers sharing one PostgreSQL
//! server never interfere with each other.

use std::error::Error as StdError;
use std::fmt;

use postgres::{Client, NoTls};
use thiserror::Error;
use tracing::{debug, info};

pub(crate) const DATABASE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::database");

const MAX_IDENTIFIER_BYTES: usize = 63;

/// A validated PostgreSQL database name.
///
/// Names consist of lowercase ASCII letters, digits and underscores, start
/// with a letter or underscore, and fit PostgreSQL's identifier limit. That
/// makes them safe to interpolate into `DROP DATABASE`/`CREATE DATABASE`,
/// which do not accept bind parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Validates `raw` as a database name.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseNameError`] when the name is empty, too long, or
    /// contains characters outside `[a-z0-9_]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, DatabaseNameError> {
        let name = raw.into();
        if name.is_empty() {
            return Err(DatabaseNameError::Empty);
        }
        if name.len() > MAX_IDENTIFIER_BYTES {
            return Err(DatabaseNameError::TooLong {
                name,
                max: MAX_IDENTIFIER_BYTES,
            });
        }
        let leading_digit = name.starts_with(|c: char| c.is_ascii_digit());
        let invalid = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'));
        if leading_digit || invalid.is_some() {
            return Err(DatabaseNameError::InvalidCharacters { name });
        }
        Ok(Self(name))
    }

    /// Returns the raw name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DatabaseName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reasons a database name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseNameError {
    /// The name is empty.
    #[error("database name must not be empty")]
    Empty,
    /// The name exceeds PostgreSQL's identifier limit.
    #[error("database name '{name}' exceeds {max} bytes")]
    TooLong {
        /// Rejected name.
        name: String,
        /// Maximum length in bytes.
        max: usize,
    },
    /// The name contains characters outside `[a-z0-9_]` or starts with a digit.
    #[error("database name '{name}' must match [a-z_][a-z0-9_]*")]
    InvalidCharacters {
        /// Rejected name.
        name: String,
    },
}

/// Boxed driver error carried by [`DatabaseError`].
pub type DriverError = Box<dyn StdError + Send + Sync + 'static>;

/// Failures reported by a [`DatabaseAdmin`].
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The administrative endpoint could not be reached.
    #[error("failed to connect to the administrative database: {source}")]
    Connect {
        /// Driver error.
        #[source]
        source: DriverError,
    },
    /// `DROP DATABASE` failed.
    #[error("failed to drop database '{name}': {source}")]
    Drop {
        /// Database that could not be dropped.
        name: DatabaseName,
        /// Driver error.
        #[source]
        source: DriverError,
    },
    /// `CREATE DATABASE` failed.
    #[error("failed to create database '{name}': {source}")]
    Create {
        /// Database that could not be created.
        name: DatabaseName,
        /// Driver error.
        #[source]
        source: DriverError,
    },
}

/// Administrative operations on whole databases.
///
/// Implementations must treat dropping an absent database as success.
pub trait DatabaseAdmin: Send {
    /// Drops `name` if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the endpoint is unreachable or the
    /// statement fails.
    fn drop_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError>;

    /// Creates an empty database called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the endpoint is unreachable or the
    /// statement fails.
    fn create_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError>;
}

/// [`DatabaseAdmin`] backed by a blocking PostgreSQL client.
///
/// The connection is opened lazily on first use and re-opened if the server
/// closed it in the meantime.
pub struct PostgresAdmin {
    url: String,
    client: Option<Client>,
}

impl PostgresAdmin {
    /// Builds an admin for the connection string `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut Client, DatabaseError> {
        let stale = self.client.as_ref().is_none_or(Client::is_closed);
        if stale {
            debug!(target: DATABASE_TARGET, "opening administrative connection");
            let client = Client::connect(&self.url, NoTls).map_err(|error| DatabaseError::Connect {
                source: Box::new(error),
            })?;
            self.client = Some(client);
        }
        self.client.as_mut().ok_or_else(|| DatabaseError::Connect {
            source: "administrative connection unavailable".into(),
        })
    }
}

impl fmt::Debug for PostgresAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The URL may embed a password.
        f.debug_struct("PostgresAdmin")
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl DatabaseAdmin for PostgresAdmin {
    fn drop_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
        let statement = format!("DROP DATABASE IF EXISTS \"{name}\"");
        self.client()?
            .batch_execute(&statement)
            .map_err(|error| DatabaseError::Drop {
                name: name.clone(),
                source: Box::new(error),
            })
    }

    fn create_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
        let statement = format!("CREATE DATABASE \"{name}\"");
        self.client()?
            .batch_execute(&statement)
            .map_err(|error| DatabaseError::Create {
                name: name.clone(),
                source: Box::new(error),
            })
    }
}

/// Creates and drops worker databases through a [`DatabaseAdmin`].
#[derive(Debug)]
pub struct DatabaseProvisioner<D> {
    admin: D,
}

impl<D: DatabaseAdmin> DatabaseProvisioner<D> {
    /// Wraps `admin`.
    #[must_use]
    pub const fn new(admin: D) -> Self {
        Self { admin }
    }

    /// Drops any leftover database called `name`, then creates it empty.
    ///
    /// Calling this twice in a row is harmless; the second call discards
    /// whatever the first one created.
    ///
    /// # Errors
    ///
    /// Returns the first [`DatabaseError`] raised by the admin. Nothing is
    /// retried.
    pub fn prepare(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
        self.admin.drop_database(name)?;
        self.admin.create_database(name)?;
        info!(target: DATABASE_TARGET, database = %name, "database prepared");
        Ok(())
    }

    /// Drops `name`. An absent database is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError`] when the admin cannot issue the drop.
    pub fn teardown(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
        self.admin.drop_database(name)?;
        info!(target: DATABASE_TARGET, database = %name, "database dropped");
        Ok(())
    }

    /// Borrows the underlying admin.
    #[must_use]
    pub const fn admin(&self) -> &D {
        &self.admin
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rstest::rstest;

    use super::*;

    #[derive(Debug, Default)]
    struct SetAdmin {
        databases: BTreeSet<String>,
        calls: Vec<String>,
    }

    impl DatabaseAdmin for SetAdmin {
        fn drop_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
            self.calls.push(format!("drop {name}"));
            self.databases.remove(name.as_str());
            Ok(())
        }

        fn create_database(&mut self, name: &DatabaseName) -> Result<(), DatabaseError> {
            self.calls.push(format!("create {name}"));
            if !self.databases.insert(name.as_str().to_owned()) {
                return Err(DatabaseError::Create {
                    name: name.clone(),
                    source: "already exists".into(),
                });
            }
            Ok(())
        }
    }

    fn name(raw: &str) -> DatabaseName {
        DatabaseName::new(raw).expect("valid name")
    }

    #[rstest]
    #[case("tobira_ui_test_0")]
    #[case("_scratch")]
    #[case("a")]
    fn accepts_plain_identifiers(#[case] raw: &str) {
        assert_eq!(name(raw).as_str(), raw);
    }

    #[rstest]
    #[case("", DatabaseNameError::Empty)]
    #[case("Tobira", DatabaseNameError::InvalidCharacters { name: "Tobira".into() })]
    #[case("1db", DatabaseNameError::InvalidCharacters { name: "1db".into() })]
    #[case("x\"; drop", DatabaseNameError::InvalidCharacters { name: "x\"; drop".into() })]
    fn rejects_unsafe_names(#[case] raw: &str, #[case] expected: DatabaseNameError) {
        assert_eq!(DatabaseName::new(raw), Err(expected));
    }

    #[rstest]
    fn rejects_names_over_the_identifier_limit() {
        let raw = "a".repeat(MAX_IDENTIFIER_BYTES + 1);
        assert!(matches!(
            DatabaseName::new(raw),
            Err(DatabaseNameError::TooLong { max: 63, .. })
        ));
    }

    #[rstest]
    fn prepare_drops_before_creating() {
        let mut provisioner = DatabaseProvisioner::new(SetAdmin::default());
        provisioner
            .prepare(&name("tobira_ui_test_3"))
            .expect("prepare");
        assert_eq!(
            provisioner.admin().calls,
            vec!["drop tobira_ui_test_3", "create tobira_ui_test_3"]
        );
    }

    #[rstest]
    fn prepare_twice_succeeds() {
        let mut provisioner = DatabaseProvisioner::new(SetAdmin::default());
        let db = name("tobira_ui_test_1");
        provisioner.prepare(&db).expect("first prepare");
        provisioner.prepare(&db).expect("second prepare");
        assert!(provisioner.admin().databases.contains("tobira_ui_test_1"));
    }

    #[rstest]
    fn teardown_tolerates_missing_database() {
        let mut provisioner = DatabaseProvisioner::new(SetAdmin::default());
        provisioner
            .teardown(&name("tobira_ui_test_9"))
            .expect("teardown of an absent database");
        assert!(provisioner.admin().databases.is_empty());
    }
}
