//! Error types for the dosetrack_core library.

use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The operation a surfaced error originated from.
///
/// Callers pair an error with its action so user-facing messages can say
/// what was being attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Append,
    Remove,
    Fetch,
    Change,
    SetSettings,
    Remember,
    Recall,
    Forget,
    Get,
    Times,
    Costs,
    Info,
    Names,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Append => "append",
            Action::Remove => "remove",
            Action::Fetch => "fetch",
            Action::Change => "change",
            Action::SetSettings => "set-settings",
            Action::Remember => "remember",
            Action::Recall => "recall",
            Action::Forget => "forget",
            Action::Get => "get",
            Action::Times => "times",
            Action::Costs => "costs",
            Action::Info => "info",
            Action::Names => "names",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ResourceLimit,
    NotFound,
    Semantic,
    Fetch,
    Transport,
    Cancelled,
    Config,
}

/// Core error type for dosetrack_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Driver error, prefixed with the component that observed it
    #[error("{component}: {message}")]
    Store {
        component: &'static str,
        message: String,
    },

    #[error("Networked store is not available in this build: {0}")]
    UnsupportedDriver(String),

    /// A statement was issued on a transaction that already failed
    #[error("Transaction aborted: {0}")]
    TxAborted(String),

    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    #[error("Context cancelled")]
    Cancelled,

    // ---- validation ----
    #[error("Combination of drug {drug:?}, route {route:?} and units {units:?} is not in the info table")]
    ComboInputError {
        drug: String,
        route: String,
        units: String,
    },

    #[error("Invalid column: {0:?}")]
    InvalidColInput(String),

    #[error("Invalid value {value:?} for column {column}")]
    InvalidValue { column: String, value: String },

    #[error("No such name type: {0:?}")]
    NoNametype(String),

    #[error("Expected 2 conversion names for {substance:?}, found {found}")]
    WrongAmountNames { substance: String, found: usize },

    #[error("Conversion {function} expects {expected} inputs, got {found}")]
    WrongAmountUnitInputs {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Unknown conversion function: {0:?}")]
    UnknownConversionFunction(String),

    // ---- resource limits ----
    #[error("User {username:?} reached the limit of {max} logs")]
    MaxLogsPerUser { username: String, max: i32 },

    // ---- not found ----
    #[error("No logs for user {0:?}")]
    NoLogs(String),

    #[error("No info for drug {0:?}")]
    NoDrugInfoTable(String),

    #[error("Log {id} doesn't exist for user {username:?}")]
    LogDoesntExist { username: String, id: i64 },

    #[error("No users returned")]
    NoUsersReturned,

    #[error("Empty list of drug names")]
    EmptyListDrugNames,

    #[error("No {name_type} names returned for {name:?}")]
    NoNamesReturned { name: String, name_type: String },

    #[error("Nothing is remembered for user {0:?}")]
    NotRemembered(String),

    // ---- semantic ----
    #[error("No info for route {route:?} of drug {drug:?}")]
    LoggedRouteInfo { drug: String, route: String },

    #[error("Logged units {logged:?} don't match info units {expected:?} for {drug:?}")]
    LoggedUnitsInfo {
        drug: String,
        logged: String,
        expected: String,
    },

    #[error("Dose {dose} is below the threshold of {threshold}")]
    DoseBelowThreshold { dose: f64, threshold: f64 },

    #[error("No density known for substance {0:?}")]
    NoDensitySubstance(String),

    #[error("Conversion result is zero")]
    ConvResultIsZero,

    #[error("Conversion returned an empty unit")]
    RetConvertUnitEmpty,

    // ---- fetch ----
    #[error("No routes of administration for substance {0:?}")]
    NoROAForSubs(String),

    #[error("Empty response from source for {0:?}")]
    PsychonautwikiEmptyResp(String),

    #[error("No rows to insert")]
    StructSliceEmpty,

    /// Error surfaced from a user-facing operation
    #[error("{action}: {source}")]
    Action {
        action: Action,
        #[source]
        source: Box<Error>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an error with the action that surfaced it.
    pub fn in_action(action: Action, err: Error) -> Self {
        Error::Action {
            action,
            source: Box::new(err),
        }
    }

    /// The error with every [`Error::Action`] wrapper removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Action { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost action tag, if any.
    pub fn action(&self) -> Option<Action> {
        match self {
            Error::Action { action, .. } => Some(*action),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::ComboInputError { .. }
            | Error::InvalidColInput(_)
            | Error::InvalidValue { .. }
            | Error::NoNametype(_)
            | Error::WrongAmountNames { .. }
            | Error::WrongAmountUnitInputs { .. }
            | Error::UnknownConversionFunction(_) => ErrorKind::Validation,
            Error::MaxLogsPerUser { .. } => ErrorKind::ResourceLimit,
            Error::NoLogs(_)
            | Error::NoDrugInfoTable(_)
            | Error::LogDoesntExist { .. }
            | Error::NoUsersReturned
            | Error::EmptyListDrugNames
            | Error::NoNamesReturned { .. }
            | Error::NotRemembered(_) => ErrorKind::NotFound,
            Error::LoggedRouteInfo { .. }
            | Error::LoggedUnitsInfo { .. }
            | Error::DoseBelowThreshold { .. }
            | Error::NoDensitySubstance(_)
            | Error::ConvResultIsZero
            | Error::RetConvertUnitEmpty => ErrorKind::Semantic,
            Error::NoROAForSubs(_) | Error::PsychonautwikiEmptyResp(_) | Error::StructSliceEmpty => {
                ErrorKind::Fetch
            }
            Error::DeadlineExceeded | Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) | Error::UnsupportedDriver(_) | Error::Toml(_) => ErrorKind::Config,
            Error::Io(_)
            | Error::Json(_)
            | Error::Csv(_)
            | Error::Store { .. }
            | Error::TxAborted(_)
            | Error::Other(_) => ErrorKind::Transport,
            Error::Action { .. } => unreachable!("root() strips action wrappers"),
        }
    }
}
