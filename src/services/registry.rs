//! Shared lookup rules for the fixed, index-addressed registries
//! (datasets, classifiers, attacks).

use crate::error::{AppError, AppResult};
use serde::Serialize;

/// Public description of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    pub name: String,
    pub paper: String,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, paper: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paper: paper.into(),
        }
    }
}

fn is_integer(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a textual id. Text that is not an integer is `Unprocessable`; an
/// integer too large for `i64` cannot name anything and is `NotFound`.
pub fn parse_id(raw: &str, kind: &str) -> AppResult<i64> {
    let text = raw.trim();
    text.parse().map_err(|_| {
        if is_integer(text) {
            AppError::NotFound(format!("{kind} {text} does not exist"))
        } else {
            AppError::Unprocessable(format!("{kind} id has to be an integer"))
        }
    })
}

/// Parse a textual registry id and check it against `len`; an integer
/// outside `0..len` is `NotFound`.
pub fn parse_index(raw: &str, len: usize, kind: &str) -> AppResult<usize> {
    let id = parse_id(raw, kind)?;

    usize::try_from(id)
        .ok()
        .filter(|&index| index < len)
        .ok_or_else(|| AppError::NotFound(format!("{kind} {id} does not exist")))
}
