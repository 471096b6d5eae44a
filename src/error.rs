//! Error types for template construction, binding and materialization

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A variable was redeclared with a different type.
    #[error("Variable '{name}' is already declared with type {existing}, cannot redeclare as {requested}")]
    TypeConflict {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// The runtime type of a bound value disagrees with the declared type.
    #[error("Type mismatch for variable '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Variable '{0}' is not free")]
    NotFree(String),

    /// A script references a variable the owning transaction never declared.
    #[error("Variable '{0}' must be declared on the transaction before it can be used by a script")]
    UndeclaredVariable(String),

    #[error("Invalid variable type: {0}")]
    InvalidType(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("A hook for variables {0:?} is already registered")]
    DuplicateHook(Vec<String>),

    #[error("A hook must watch at least one variable")]
    EmptyHookSet,

    #[error("Parent transaction is not ready")]
    ParentNotReady,

    #[error("Transaction is not ready: {0}")]
    NotReady(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Signature resolution failed because the key store has no key for the id.
    #[error("Unknown key id: {0}")]
    UnknownKey(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Script execution failed: {0}")]
    ScriptExecution(String),

    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, TemplateError>;

impl From<secp256k1::Error> for TemplateError {
    fn from(err: secp256k1::Error) -> Self {
        TemplateError::InvalidKey(err.to_string())
    }
}

impl From<hex::FromHexError> for TemplateError {
    fn from(err: hex::FromHexError) -> Self {
        TemplateError::Parse(format!("invalid hex: {}", err))
    }
}

impl From<bs58::decode::Error> for TemplateError {
    fn from(err: bs58::decode::Error) -> Self {
        TemplateError::Parse(format!("invalid base58: {}", err))
    }
}
