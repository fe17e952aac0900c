//! Error taxonomy: fatal runtime errors vs. script-raised exceptions,
//! in a layered error-code-plus-miette-diagnostic shape.

use miette::Diagnostic as MietteDiagnostic;
use miette::SourceSpan;
use thiserror::Error;

use crate::reference::Reference;

/// A coarse taxonomy code grouped by error family, numbered in the same
/// style as a layered diagnostic crate's own error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TypeMismatch = 401,
    ArityMismatch = 402,
    VisibilityViolation = 403,
    Overflow = 404,
    NotFound = 405,
    ClassGeneration = 406,
}

impl ErrorCode {
    pub fn prefix(self) -> String {
        format!("[MINT_{:03}]", self as u32)
    }

    pub fn summary(self) -> &'static str {
        match self {
            ErrorCode::TypeMismatch => "operand not supported by this operator",
            ErrorCode::ArityMismatch => "no signature matches the call's argument count",
            ErrorCode::VisibilityViolation => "member access violates its visibility",
            ErrorCode::Overflow => "allocation or table overflow",
            ErrorCode::NotFound => "subscript, symbol, or member not found",
            ErrorCode::ClassGeneration => "class linearization failed",
        }
    }
}

/// A fatal runtime error: distinct from a script-raised
/// exception, this aborts the current thread rather than being
/// reachable via `try`/`catch`.
#[derive(Debug, Clone, Error, MietteDiagnostic)]
#[error("{} {message}", code.prefix())]
pub struct CoreDiagnostic {
    pub code: ErrorCode,
    pub message: String,
    /// Source line if `DebugInfo` resolved one for the failing offset;
    /// `None` when running bytecode assembled without debug info.
    pub line: Option<u32>,
    #[label("here")]
    pub span: Option<SourceSpan>,
}

impl CoreDiagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        CoreDiagnostic { code, message: message.into(), line: None, span: None }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn type_mismatch(operator: &str, format: &str) -> Self {
        Self::new(ErrorCode::TypeMismatch, format!("'{operator}' is not defined for {format}"))
    }

    pub fn arity_mismatch(argc: usize) -> Self {
        Self::new(ErrorCode::ArityMismatch, format!("no signature accepts {argc} argument(s)"))
    }

    pub fn visibility_violation(member: &str) -> Self {
        Self::new(ErrorCode::VisibilityViolation, format!("'{member}' is not accessible from this context"))
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn overflow(what: &str) -> Self {
        Self::new(ErrorCode::Overflow, format!("{what} overflowed"))
    }
}

/// The result of running one dispatch step or call: either plain
/// success, a fatal [`CoreDiagnostic`], or a script-level exception
/// value carrying the raised `Reference`'s data — kept
/// distinct from `CoreDiagnostic` so the dispatch loop can route the
/// latter through retrieve-point unwinding instead of aborting. The
/// strong hold acquired when the exception was popped off the value
/// stack travels with the `Reference` itself rather than being dropped
/// and re-acquired from a bare handle.
#[derive(Debug)]
pub enum CoreError {
    Fatal(CoreDiagnostic),
    Raised(Reference),
}

impl From<CoreDiagnostic> for CoreError {
    fn from(diag: CoreDiagnostic) -> Self {
        CoreError::Fatal(diag)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
