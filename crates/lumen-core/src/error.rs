//! Status lifting and the binding's error taxonomy.
//!
//! Two tiers exist. Engine-returned status codes are lifted into
//! [`EngineStatus`] and surfaced as values on every method whose engine
//! signature returns one. ABI misuse (slot-type confusion, wrong
//! argument counts, use-after-release) is a programming bug: debug
//! builds abort with a diagnostic, release builds are documented
//! undefined behavior and never produce an error value.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::ffi::NulError;
use std::str::Utf8Error;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// The engine's status codes. Zero is success; all others are failures.
#[repr(i32)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
pub enum EngineStatus {
    Ok = 0,
    Failed = 1,
    Unavailable = 2,
    Unconfigured = 3,
    Unauthorized = 4,
    ParameterRange = 5,
    OutOfMemory = 6,
    FileNotFound = 7,
    FileBadDrive = 8,
    FileBadPath = 9,
    FileNoPermission = 10,
    FileAlreadyInUse = 11,
    FileCantOpen = 12,
    FileCantWrite = 13,
    FileCantRead = 14,
    FileUnrecognized = 15,
    FileCorrupt = 16,
    FileMissingDependencies = 17,
    FileEof = 18,
    CantOpen = 19,
    CantCreate = 20,
    CantConnect = 21,
    CantResolve = 22,
    CantAcquireResource = 23,
    CantFork = 24,
    QueryFailed = 25,
    AlreadyInUse = 26,
    AlreadyExists = 27,
    Locked = 28,
    Timeout = 29,
    ConnectionError = 30,
    InvalidData = 31,
    InvalidParameter = 32,
    InvalidDeclaration = 33,
    DoesNotExist = 34,
    DatabaseCantRead = 35,
    DatabaseCantWrite = 36,
    CompilationFailed = 37,
    MethodNotFound = 38,
    LinkFailed = 39,
    ScriptFailed = 40,
    CyclicLink = 41,
    DuplicateSymbol = 42,
    ParseError = 43,
    Busy = 44,
    Skip = 45,
    Help = 46,
    Bug = 47,
}

impl EngineStatus {
    /// Lifts a raw engine status code. Zero is success; unknown codes
    /// collapse to [`EngineStatus::Bug`], which the engine documents as
    /// "should never be returned".
    pub fn from_code(code: i32) -> EngineResult<()> {
        if code == 0 {
            return Ok(());
        }
        let status = EngineStatus::try_from(code).unwrap_or(EngineStatus::Bug);
        Err(EngineError::Status(status))
    }

    pub fn is_ok(self) -> bool {
        self == EngineStatus::Ok
    }
}

/// An error surfaced by the binding at a call site.
///
/// The core neither logs nor retries these; propagation policy belongs
/// to the layer above.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine returned a non-zero status code.
    #[error("engine returned status {0:?}")]
    Status(EngineStatus),

    /// The engine returned a null handle where one was required.
    #[error("engine returned a null handle")]
    NullHandle,

    /// An owned handle slated for transfer to the engine still has
    /// other live records aliasing it.
    #[error("handle transfer requires a uniquely held record")]
    AliasedTransfer,

    /// No interface table has been installed yet.
    #[error("engine interface not installed")]
    InterfaceNotInstalled,

    /// The installed interface reports an incompatible major version.
    #[error("engine interface version {found} incompatible with {expected}")]
    IncompatibleInterface { expected: u32, found: u32 },

    /// The engine shared library could not be located or opened.
    #[error("failed to load engine library: {0}")]
    EngineLibrary(String),

    /// A variant conversion failed.
    #[error(transparent)]
    Variant(#[from] VariantError),

    /// Interior NUL while building a C string for the engine.
    #[error("string conversion: {0}")]
    StringConversion(#[from] NulError),

    /// Engine-side text was not valid UTF-8.
    #[error("utf-8 conversion: {0}")]
    Utf8Conversion(#[from] Utf8Error),
}

impl EngineError {
    pub fn status(&self) -> Option<EngineStatus> {
        match self {
            EngineError::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn is_status(&self, status: EngineStatus) -> bool {
        self.status() == Some(status)
    }
}

impl From<EngineStatus> for EngineError {
    fn from(status: EngineStatus) -> Self {
        EngineError::Status(status)
    }
}

/// Failure reading a variant or converting across the value bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariantError {
    /// The variant's tag disagrees with the requested type.
    #[error("variant type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// An integer did not fit the requested width.
    #[error("variant value {value} out of range for {target}")]
    Range { value: i64, target: &'static str },

    /// The variant holds an object handle that is no longer live.
    #[error("variant holds a dangling object handle")]
    Dangling,
}
