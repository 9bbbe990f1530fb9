use std::io;
use std::result;

use thiserror::Error;

use crate::types::ColumnIndex;

/// Custom result type for cursor operations
pub type Result<T> = result::Result<T, Error>;

/// Cursor engine error codes
#[derive(Error, Debug)]
pub enum Error {
    /// Parameter outside its valid domain (bad element size, empty name, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Column, name or row could not be located
    #[error("Not found: {0}")]
    NotFound(String),
    /// Column was already added; carries the index it was bound to
    #[error("Column already exists at index {0}")]
    ColumnExists(ColumnIndex),
    /// Name key is already in use
    #[error("Name already in use: {0}")]
    DuplicateName(String),
    /// Name resolves to more than one column
    #[error("Ambiguous column specification: {0}")]
    Ambiguous(String),
    /// Read requested on a column or cursor that cannot be read, or vice versa
    #[error("Wrong access mode: {0}")]
    WrongAccessMode(String),
    /// Operation is not valid in the current cursor state
    #[error("Invalid cursor state: {0}")]
    InvalidState(&'static str),
    /// Cursor is open and post-open adds were not permitted
    #[error("Cursor is locked against adding columns")]
    Locked,
    /// Destination buffer is too small; `required` is the row length in requested elements
    #[error("Buffer too small: {required} elements required")]
    BufferTooSmall { required: u32 },
    /// Stored and requested types (or element sizes) are not compatible
    #[error("Type mismatch: stored {stored}, requested {requested}")]
    TypeMismatch { stored: u32, requested: u32 },
    /// Allocation or capacity limit reached
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Schema production could not be resolved
    #[error("Column production undefined: {0}")]
    Undefined(String),
    /// Production was undefined because the table has no rows
    #[error("Table is empty")]
    TableEmpty,
    /// Serialized page map is malformed
    #[error("Corrupted page map: {0}")]
    Corrupted(String),
    /// Operating system error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Index of an already-present column, if this is the benign duplicate-add error
    pub fn existing_column(&self) -> Option<ColumnIndex> {
        match self {
            Error::ColumnExists(idx) => Some(*idx),
            _ => None,
        }
    }

    /// True for the "production undefined" family
    pub fn is_undefined(&self) -> bool {
        matches!(self, Error::Undefined(_))
    }
}
