//! Edit operations exchanged by the Jupiter engine
//!
//! Positions and lengths count Unicode scalar values, never bytes.

use crate::{JupiterError, JupiterResult};
use serde::{Deserialize, Serialize};

/// A text edit.
///
/// Operations are immutable values; transformation always produces new
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Insert `text` at `position`
    Insert {
        position: usize,
        text: String,
        /// Position at which the insert was first generated
        origin: usize,
    },
    /// Delete `text`, which starts at `position`
    Delete { position: usize, text: String },
    /// Leave the document untouched
    NoOp,
    /// Two operations applied one after the other; the second is
    /// expressed in the document produced by the first
    Split(Box<Operation>, Box<Operation>),
}

impl Operation {
    /// Insert at `position`, originating there
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Operation::Insert {
            position,
            text: text.into(),
            origin: position,
        }
    }

    /// Insert with an explicit origin position
    pub fn insert_with_origin(position: usize, text: impl Into<String>, origin: usize) -> Self {
        Operation::Insert {
            position,
            text: text.into(),
            origin,
        }
    }

    /// Delete `text` starting at `position`
    pub fn delete(position: usize, text: impl Into<String>) -> Self {
        Operation::Delete {
            position,
            text: text.into(),
        }
    }

    /// The identity operation
    pub fn noop() -> Self {
        Operation::NoOp
    }

    /// Sequential pair of operations
    pub fn split(first: Operation, second: Operation) -> Self {
        Operation::Split(Box::new(first), Box::new(second))
    }

    /// Check if this is a no-op
    pub fn is_noop(&self) -> bool {
        matches!(self, Operation::NoOp)
    }

    /// Net change in document length
    pub fn len_delta(&self) -> isize {
        match self {
            Operation::Insert { text, .. } => char_len(text) as isize,
            Operation::Delete { text, .. } => -(char_len(text) as isize),
            Operation::NoOp => 0,
            Operation::Split(first, second) => first.len_delta() + second.len_delta(),
        }
    }

    /// Number of primitive (non-split) operations contained
    pub fn primitive_count(&self) -> usize {
        match self {
            Operation::Split(first, second) => first.primitive_count() + second.primitive_count(),
            _ => 1,
        }
    }

    /// Apply to `text`, returning the edited copy
    pub fn apply(&self, text: &str) -> JupiterResult<String> {
        let mut edited = text.to_string();
        self.apply_unchecked(&mut edited)?;
        Ok(edited)
    }

    /// Apply to `text` in place. On error `text` is left unchanged.
    pub fn apply_in_place(&self, text: &mut String) -> JupiterResult<()> {
        *text = self.apply(text)?;
        Ok(())
    }

    fn apply_unchecked(&self, text: &mut String) -> JupiterResult<()> {
        match self {
            Operation::Insert {
                position,
                text: inserted,
                ..
            } => {
                let at = byte_index(text, *position).ok_or_else(|| {
                    JupiterError::InvalidOperation(format!(
                        "insert at {} beyond length {}",
                        position,
                        char_len(text)
                    ))
                })?;
                text.insert_str(at, inserted);
            }
            Operation::Delete {
                position,
                text: deleted,
            } => {
                let end_position = position + char_len(deleted);
                let range = byte_index(text, *position)
                    .zip(byte_index(text, end_position))
                    .ok_or_else(|| {
                        JupiterError::InvalidOperation(format!(
                            "delete {}..{} beyond length {}",
                            position,
                            end_position,
                            char_len(text)
                        ))
                    })?;
                text.replace_range(range.0..range.1, "");
            }
            Operation::NoOp => {}
            Operation::Split(first, second) => {
                first.apply_unchecked(text)?;
                second.apply_unchecked(text)?;
            }
        }
        Ok(())
    }

    /// Map an index in the document before this operation to the
    /// document after it
    pub fn transform_index(&self, index: usize) -> usize {
        match self {
            Operation::Insert { position, text, .. } => {
                if index >= *position {
                    index + char_len(text)
                } else {
                    index
                }
            }
            Operation::Delete { position, text } => {
                let len = char_len(text);
                if index >= position + len {
                    index - len
                } else if index > *position {
                    *position
                } else {
                    index
                }
            }
            Operation::NoOp => index,
            Operation::Split(first, second) => {
                second.transform_index(first.transform_index(index))
            }
        }
    }
}

/// Length of `text` in Unicode scalar values
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Characters `start..end` of `text`
pub(crate) fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Byte offset of the character at `position`; the text length maps to
/// the end of the string
fn byte_index(text: &str, position: usize) -> Option<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .nth(position)
}
