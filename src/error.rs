// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use std::io;

use thiserror::Error as ThisError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("SQL error")]
    SqlError(#[from] sqlx::Error),
    #[error("Object store error")]
    ObjectStoreError(#[from] object_store::Error),
    #[error("Archive file {} already exists", .0)]
    ArchiveExists(String),
    #[error("Invalid configuration: {}", .0)]
    InvalidConfig(String),
    #[error("Failed to parse date")]
    DateParserError(#[from] chrono::ParseError),
    #[error("Json serialization error")]
    JsonError(#[from] serde_json::Error),
    #[error("Unknown model: {}", .0)]
    UnknownModel(String),
    #[error("Model error: {}", .0)]
    ModelError(String),
    #[error("IO error")]
    IoError(#[from] io::Error),
}
