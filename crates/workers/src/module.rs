//! Computation module contract
//!
//! The computation backend is a black box to this crate. It is reached through
//! two traits:
//! - [`ModuleEntry`] - shared by a pool, loads one module instance inside each worker thread
//! - [`ComputationModule`] - the per-worker instance, driven only through `call`/`stream`
//!
//! A module instance never leaves the thread that loaded it, so it does not
//! need to be `Send`.

use serde::{Deserialize, Serialize};

use crate::stream::StreamCallbacks;

/// Opaque payload exchanged with a computation module
///
/// The orchestration layer forwards payloads without interpreting them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// No data
    #[default]
    Empty,
    /// UTF-8 text (e.g. FASTA input or JSON documents)
    Text(String),
    /// Packed binary buffer
    Binary(Vec<u8>),
}

impl Payload {
    /// Create a text payload
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Borrow the payload as text, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Take the payload as text, if it is text
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Raw bytes of the payload
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Error raised by a computation module
///
/// Modules report failures as values; panics inside a module are caught at the
/// worker boundary and converted into a `ModuleError` with kind `"panic"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ModuleError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub kind: Option<String>,

    /// Whether the module is unusable after this error
    ///
    /// A fatal error ends the worker thread once the error has been delivered.
    pub fatal: bool,
}

impl ModuleError {
    /// Create a recoverable error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            fatal: false,
        }
    }

    /// Create a fatal error (the worker exits after reporting it)
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            fatal: true,
        }
    }

    /// Set the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Error for a function name the module does not export
    pub fn unknown_function(function: &str) -> Self {
        Self::new(format!("unknown function: {function}")).with_kind("unknown_function")
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_kind("serialization")
    }
}

/// A loaded instance of the computation module, living on one worker thread
///
/// # Example
///
/// ```ignore
/// struct Upper;
///
/// impl ComputationModule for Upper {
///     fn initialize(&mut self) -> Result<(), ModuleError> {
///         Ok(())
///     }
///
///     fn call(&mut self, function: &str, args: Payload) -> Result<Payload, ModuleError> {
///         match function {
///             "upper" => Ok(Payload::text(args.as_text().unwrap_or_default().to_uppercase())),
///             other => Err(ModuleError::unknown_function(other)),
///         }
///     }
/// }
/// ```
pub trait ComputationModule {
    /// Initialize the module runtime. Called at most once per worker.
    fn initialize(&mut self) -> Result<(), ModuleError>;

    /// Request/response invocation
    fn call(&mut self, function: &str, args: Payload) -> Result<Payload, ModuleError>;

    /// Streaming invocation
    ///
    /// The module pushes items through `callbacks` and signals completion with
    /// [`StreamCallbacks::on_complete`]. Returning an error terminates the
    /// stream with that error; returning `Ok` without signalling completes it.
    fn stream(
        &mut self,
        function: &str,
        _args: Payload,
        _callbacks: &StreamCallbacks,
    ) -> Result<(), ModuleError> {
        Err(
            ModuleError::new(format!("function does not support streaming: {function}"))
                .with_kind("unsupported"),
        )
    }
}

/// Loads the computation module inside a worker's execution context
///
/// `load` runs on the worker thread during the spawn handshake. It must not
/// initialize the module runtime; that is a separate explicit step.
pub trait ModuleEntry: Send + Sync + 'static {
    /// Human-readable module name for logging
    fn name(&self) -> &str;

    /// Instantiate the module
    fn load(&self) -> Result<Box<dyn ComputationModule>, ModuleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let text = Payload::text("ACGT");
        assert_eq!(text.as_text(), Some("ACGT"));
        assert_eq!(text.len(), 4);
        assert!(!text.is_empty());

        let binary = Payload::from(vec![1u8, 2, 3]);
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.as_bytes(), &[1, 2, 3]);

        assert!(Payload::Empty.is_empty());
        assert_eq!(Payload::default(), Payload::Empty);
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let json = serde_json::to_value(Payload::text("x")).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["data"], "x");
    }

    #[test]
    fn test_module_error_builders() {
        let err = ModuleError::new("bad input").with_kind("parse");
        assert_eq!(err.to_string(), "bad input");
        assert_eq!(err.kind.as_deref(), Some("parse"));
        assert!(!err.fatal);

        assert!(ModuleError::fatal("out of memory").fatal);
        assert_eq!(
            ModuleError::unknown_function("nope").kind.as_deref(),
            Some("unknown_function")
        );
    }
}
