//! Cross-process failure propagation.
//!
//! A handler failure is captured as a [`Failure`], flattened to the wire
//! [`FailureRecord`] on the serving side and rebuilt on the calling side by a
//! [`FailureDecoder`]. Only failures whose module is on the allow-list *and*
//! which have a registered constructor are rebuilt as typed
//! [`RemoteException`]s; everything else arrives as a [`RemoteError`] that
//! keeps the class name, message and trace as plain strings.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use courier_types::FailureRecord;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

/// Suffix carried by the class and module of a rebuilt remote exception.
pub const REMOTE_POSTFIX: &str = "_Remote";

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Captured failures
// ---------------------------------------------------------------------------

/// A failure raised while handling a message, captured with enough detail to
/// be logged locally and returned to the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub class: String,
    pub module: String,
    pub message: String,
    pub trace: Vec<String>,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// An anticipated outcome of the call (e.g. "not found"). Still returned
    /// to the caller, but not logged as an error by the serving side.
    pub expected: bool,
}

impl Failure {
    pub fn new(
        module: impl Into<String>,
        class: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            class: class.into(),
            module: module.into(),
            args: vec![Value::String(message.clone())],
            message,
            trace: Vec::new(),
            kwargs: Map::new(),
            expected: false,
        }
    }

    /// Capture a Rust error. The type path gives the module and class, the
    /// `source()` chain becomes the trace.
    pub fn from_error<E: StdError + 'static>(err: &E) -> Self {
        let (module, class) = split_type_path(std::any::type_name::<E>());
        let mut failure = Self::new(module, class, err.to_string());
        let mut source = err.source();
        while let Some(cause) = source {
            failure.trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        failure
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Mark as an expected failure of the call.
    pub fn expected(mut self) -> Self {
        self.expected = true;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}: {}", self.module, self.class, self.message)
    }
}

/// `my_app::errors::NotFound<T>` -> (`my_app::errors`, `NotFound`).
fn split_type_path(path: &str) -> (&str, &str) {
    let path = path.split('<').next().unwrap_or(path);
    match path.rsplit_once("::") {
        Some((module, class)) => (module, class),
        None => ("", path),
    }
}

// ---------------------------------------------------------------------------
// Marshalling
// ---------------------------------------------------------------------------

/// Flatten a failure into its wire record.
///
/// A failure that was itself rebuilt from a remote peer (both class and
/// module end in `_Remote`) is recorded under its original names.
pub fn serialize_remote_exception(failure: &Failure, log_failure: bool) -> FailureRecord {
    if log_failure {
        error!(
            class = %failure.class,
            module = %failure.module,
            trace = ?failure.trace,
            "returning exception {} to caller",
            failure.message
        );
    }

    let (class, module) = match (
        failure.class.strip_suffix(REMOTE_POSTFIX),
        failure.module.strip_suffix(REMOTE_POSTFIX),
    ) {
        (Some(class), Some(module)) => (class, module),
        _ => (failure.class.as_str(), failure.module.as_str()),
    };

    FailureRecord {
        class: class.to_string(),
        module: module.to_string(),
        message: failure.message.clone(),
        tb: failure.trace.clone(),
        args: failure.args.clone(),
        kwargs: failure.kwargs.clone(),
    }
}

/// Constructor for one allow-listed failure type. Returns `None` when the
/// record's arguments do not fit the type.
pub type ExceptionCtor = fn(&FailureRecord) -> Option<BoxError>;

/// Explicit `(module, class) -> constructor` table. Types that are not
/// registered are never rebuilt, whatever the allow-list says.
#[derive(Clone, Default)]
pub struct ExceptionRegistry {
    ctors: HashMap<(String, String), ExceptionCtor>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows how to rebuild `std::io::Error`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let (module, class) = split_type_path(std::any::type_name::<std::io::Error>());
        registry.register(module, class, |record| {
            let message = record
                .args
                .first()
                .and_then(Value::as_str)
                .unwrap_or(&record.message);
            Some(Box::new(std::io::Error::other(message.to_string())))
        });
        registry
    }

    pub fn register(
        &mut self,
        module: impl Into<String>,
        class: impl Into<String>,
        ctor: ExceptionCtor,
    ) {
        self.ctors.insert((module.into(), class.into()), ctor);
    }

    /// Register `E` under its Rust type path.
    pub fn register_type<E: StdError + 'static>(&mut self, ctor: ExceptionCtor) {
        let (module, class) = split_type_path(std::any::type_name::<E>());
        self.register(module, class, ctor);
    }

    fn get(&self, module: &str, class: &str) -> Option<ExceptionCtor> {
        self.ctors
            .get(&(module.to_string(), class.to_string()))
            .copied()
    }
}

impl fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRegistry")
            .field("types", &self.ctors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Rebuilds failure records received from remote peers.
#[derive(Debug, Clone, Default)]
pub struct FailureDecoder {
    allowed_modules: Vec<String>,
    registry: ExceptionRegistry,
}

impl FailureDecoder {
    pub fn new(allowed_modules: Vec<String>, registry: ExceptionRegistry) -> Self {
        Self {
            allowed_modules,
            registry,
        }
    }

    pub fn deserialize(&self, record: FailureRecord) -> RemoteFailure {
        deserialize_remote_exception(record, &self.allowed_modules, &self.registry)
    }

    /// Decode a JSON failure record; undecodable input becomes a
    /// `RemoteError` carrying the raw text.
    pub fn deserialize_json(&self, data: &str) -> RemoteFailure {
        match FailureRecord::from_json(data) {
            Ok(record) => self.deserialize(record),
            Err(err) => RemoteFailure::Error(RemoteError {
                exc_type: "MalformedFailure".to_string(),
                value: err.to_string(),
                traceback: data.to_string(),
            }),
        }
    }
}

/// Rebuild a failure record.
///
/// Modules outside `allowed_modules` are never looked up in the registry.
pub fn deserialize_remote_exception(
    record: FailureRecord,
    allowed_modules: &[String],
    registry: &ExceptionRegistry,
) -> RemoteFailure {
    let allowed = allowed_modules.iter().any(|m| *m == record.module);
    let ctor = allowed
        .then(|| registry.get(&record.module, &record.class))
        .flatten();
    let inner = ctor.and_then(|ctor| ctor(&record));

    match inner {
        Some(inner) => {
            let mut message = record.message.clone();
            message.push('\n');
            message.push_str(&record.tb.join("\n"));
            RemoteFailure::Exception(RemoteException {
                class: format!("{}{REMOTE_POSTFIX}", record.class),
                module: format!("{}{REMOTE_POSTFIX}", record.module),
                message,
                record,
                inner,
            })
        }
        None => RemoteFailure::Error(RemoteError {
            exc_type: record.class,
            value: record.message,
            traceback: record.tb.join("\n"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Rebuilt failures
// ---------------------------------------------------------------------------

/// What a caller sees when the remote handler failed.
#[derive(Debug, Error)]
pub enum RemoteFailure {
    #[error(transparent)]
    Exception(RemoteException),

    #[error(transparent)]
    Error(RemoteError),
}

impl RemoteFailure {
    /// Class name as raised on the remote side.
    pub fn class_name(&self) -> &str {
        match self {
            RemoteFailure::Exception(e) => e.original_class(),
            RemoteFailure::Error(e) => &e.exc_type,
        }
    }

    /// Turn the failure back into a `Failure`, e.g. to pass it further up a
    /// chain of services.
    pub fn to_failure(&self) -> Failure {
        match self {
            RemoteFailure::Exception(e) => Failure {
                class: e.class.clone(),
                module: e.module.clone(),
                message: e.record.message.clone(),
                trace: e.record.tb.clone(),
                args: e.record.args.clone(),
                kwargs: e.record.kwargs.clone(),
                expected: false,
            },
            RemoteFailure::Error(e) => Failure::new("", e.exc_type.clone(), e.value.clone()),
        }
    }
}

/// A failure rebuilt as its original type. Class and module carry the
/// `_Remote` suffix, and the rendered message includes the remote trace.
#[derive(Debug)]
pub struct RemoteException {
    class: String,
    module: String,
    message: String,
    record: FailureRecord,
    inner: BoxError,
}

impl RemoteException {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn original_class(&self) -> &str {
        &self.record.class
    }

    pub fn original_module(&self) -> &str {
        &self.record.module
    }

    pub fn record(&self) -> &FailureRecord {
        &self.record
    }

    /// The rebuilt error value, if it is an `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for RemoteException {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// A remote failure that could not, or was not allowed to, be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Remote error: {exc_type} {value}\n{traceback}.")]
pub struct RemoteError {
    pub exc_type: String,
    pub value: String,
    pub traceback: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
