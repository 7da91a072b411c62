//! Defect normalization.
//!
//! Validator and engine failures arrive in different shapes. This module turns
//! them into the uniform `Vec<String>` defect log stored on a session:
//!
//! ```
//! use refinery::defects::{Defect, normalize};
//!
//! let log = normalize(vec![
//!     Defect::syntax("invalid syntax (line 3)"),
//!     Defect::syntax("invalid syntax (line 3)"),
//!     Defect::syntax("   "),
//! ]);
//! assert_eq!(log, vec!["SyntaxError: invalid syntax (line 3)".to_string()]);
//! ```

use crate::errors::EngineError;
use crate::util::{tail_chars, truncate_chars};
use std::fmt;

const MAX_MESSAGE_CHARS: usize = 2000;

/// Informal classification used only for display and generator feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectClass {
    Syntax,
    Execution,
}

impl DefectClass {
    fn prefix(&self) -> &'static str {
        match self {
            DefectClass::Syntax => "SyntaxError",
            DefectClass::Execution => "ExecutionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    pub class: DefectClass,
    pub message: String,
}

impl Defect {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self {
            class: DefectClass::Syntax,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            class: DefectClass::Execution,
            message: message.into(),
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class.prefix(), self.message)
    }
}

/// Trim, drop empties, dedupe (keeping first occurrence order) and bound length.
///
/// Execution messages keep their tail, since stderr puts the cause last.
pub fn normalize(defects: impl IntoIterator<Item = Defect>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for defect in defects {
        let message = defect.message.trim();
        if message.is_empty() {
            continue;
        }
        let message = match defect.class {
            DefectClass::Syntax => truncate_chars(message, MAX_MESSAGE_CHARS),
            DefectClass::Execution => tail_chars(message, MAX_MESSAGE_CHARS),
        };
        let rendered = Defect {
            class: defect.class,
            message,
        }
        .to_string();
        if !out.contains(&rendered) {
            out.push(rendered);
        }
    }
    out
}

/// An engine failure always becomes exactly one execution defect.
pub fn from_engine_error(err: &EngineError) -> Vec<String> {
    let message = match err {
        EngineError::NonZeroExit { code, stderr } if !stderr.trim().is_empty() => {
            format!("backtest exited with code {}:\n{}", code, stderr.trim())
        }
        other => other.to_string(),
    };
    let log = normalize([Defect::execution(message)]);
    if log.is_empty() {
        vec![Defect::execution("backtest failed").to_string()]
    } else {
        log
    }
}
