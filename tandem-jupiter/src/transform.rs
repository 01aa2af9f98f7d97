//! Inclusion transformation
//!
//! `transform(op, against, privileged)` rewrites `op`, defined on some
//! document state `S`, so that it has the same intended effect on the
//! state `S` after `against` was applied. Both operations must be defined
//! on the same state.
//!
//! When two inserts land on the same position and share their origin,
//! `privileged` decides: a privileged insert stays in front. Calling the
//! pair with inverse flags satisfies TP1:
//!
//! ```text
//! apply(apply(S, a), transform(b, a, !p)) == apply(apply(S, b), transform(a, b, p))
//! ```

use crate::Operation;
use crate::operation::{char_len, char_slice};

/// Transform `op` against a concurrent `against`
pub fn transform(op: &Operation, against: &Operation, privileged: bool) -> Operation {
    match (op, against) {
        (Operation::Split(first, second), _) => {
            let first_t = transform(first, against, privileged);
            // `second` lives after `first`, so it must see `against` past `first`
            let against_t = transform(against, first, !privileged);
            let second_t = transform(second, &against_t, privileged);
            Operation::split(first_t, second_t)
        }
        (Operation::NoOp, _) | (_, Operation::NoOp) => op.clone(),
        (_, Operation::Split(first, second)) => {
            let after_first = transform(op, first, privileged);
            transform(&after_first, second, privileged)
        }
        (
            Operation::Insert {
                position,
                text,
                origin,
            },
            Operation::Insert {
                position: other_position,
                text: other_text,
                origin: other_origin,
            },
        ) => {
            let stays = position < other_position
                || (position == other_position && origin < other_origin)
                || (position == other_position && origin == other_origin && privileged);
            if stays {
                op.clone()
            } else {
                Operation::insert_with_origin(position + char_len(other_text), text.clone(), *origin)
            }
        }
        (
            Operation::Insert {
                position,
                text,
                origin,
            },
            Operation::Delete {
                position: deleted_at,
                text: deleted,
            },
        ) => {
            let deleted_len = char_len(deleted);
            if position <= deleted_at {
                op.clone()
            } else if *position >= deleted_at + deleted_len {
                Operation::insert_with_origin(position - deleted_len, text.clone(), *origin)
            } else {
                // inside the deleted range: collapse onto its start
                Operation::insert_with_origin(*deleted_at, text.clone(), *origin)
            }
        }
        (
            Operation::Delete { position, text },
            Operation::Insert {
                position: inserted_at,
                text: inserted,
                ..
            },
        ) => {
            let len = char_len(text);
            let inserted_len = char_len(inserted);
            if *inserted_at >= position + len {
                op.clone()
            } else if inserted_at <= position {
                Operation::delete(position + inserted_len, text.clone())
            } else {
                // the insert lands inside the range: delete around it
                let head = inserted_at - position;
                Operation::split(
                    Operation::delete(*position, char_slice(text, 0, head)),
                    Operation::delete(position + inserted_len, char_slice(text, head, len)),
                )
            }
        }
        (
            Operation::Delete { position, text },
            Operation::Delete {
                position: other_position,
                text: other_text,
            },
        ) => transform_delete_delete(*position, text, *other_position, other_text),
    }
}

fn transform_delete_delete(
    position: usize,
    text: &str,
    other_position: usize,
    other_text: &str,
) -> Operation {
    let len = char_len(text);
    let other_len = char_len(other_text);
    let end = position + len;
    let other_end = other_position + other_len;

    if end <= other_position {
        Operation::delete(position, text)
    } else if position >= other_end {
        Operation::delete(position - other_len, text)
    } else if other_position <= position && end <= other_end {
        // fully covered by the other delete
        Operation::NoOp
    } else if other_position <= position {
        Operation::delete(other_position, char_slice(text, other_end - position, len))
    } else if other_end >= end {
        Operation::delete(position, char_slice(text, 0, other_position - position))
    } else {
        let mut remaining = char_slice(text, 0, other_position - position);
        remaining.push_str(&char_slice(text, other_end - position, len));
        Operation::delete(position, remaining)
    }
}
