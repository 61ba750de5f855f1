//! Connection bootstrap for the outline content database.
//!
//! Every connection handed to a content store has been opened here: foreign
//! keys are on and the `activities` / `content_elements` tables are at the
//! latest migration, tracked in `PRAGMA user_version`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Result of opening or migrating a content database.
pub type DbResult<T> = Result<T, DbError>;

/// Failures while opening or migrating a content database.
#[derive(Debug)]
pub enum DbError {
    /// SQLite rejected a statement, pragma or the file itself.
    Sqlite(rusqlite::Error),
    /// The file was written by a newer build with more migrations.
    SchemaTooNew {
        /// `user_version` stored in the file.
        found: u32,
        /// Highest migration this build knows.
        supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "content database is at migration {found}, this build supports up to {supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
