use super::{Index, Range};
use std::fmt::{self, Display};

/// A slice selector failed to apply
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SelectionError {
    /// The entry is neither an index nor an index range
    NotASelector(String),
    /// The resolved index falls outside the sliced value
    OutOfBounds(isize, usize),
}

impl Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::NotASelector(entry) => {
                write!(f, "'{}' is not a valid slice selector", entry)
            }
            SelectionError::OutOfBounds(index, length) => {
                write!(f, "index {} is out of range for a value of length {}", index, length)
            }
        }
    }
}

impl std::error::Error for SelectionError {}

/// Parses an index range of the forms `a..b`, `a..=b`, `a..`, and `..b`.
pub fn parse_index_range(input: &str) -> Option<Range> {
    let sep = input.find("..")?;
    let first = &input[..sep];
    if !first.is_empty() && first.parse::<isize>().is_err() {
        return None;
    }
    let mut rest = &input[sep + 2..];
    let inclusive = rest.starts_with('=');
    if inclusive {
        rest = &rest[1..];
    }

    if first.is_empty() && !rest.is_empty() {
        rest.parse::<isize>().map(|end| Range::to(Index::new(end))).ok()
    } else if rest.is_empty() {
        if inclusive {
            return None;
        }
        first.parse::<isize>().map(|start| Range::from(Index::new(start))).ok()
    } else {
        let start = first.parse::<isize>().ok()?;
        let end = rest.parse::<isize>().ok()?;
        Some(if inclusive {
            Range::inclusive(Index::new(start), Index::new(end))
        } else {
            Range::exclusive(Index::new(start), Index::new(end))
        })
    }
}

fn resolve_one(raw: isize, length: usize) -> Result<usize, SelectionError> {
    Index::new(raw)
        .resolve(length)
        .filter(|&n| n < length)
        .ok_or(SelectionError::OutOfBounds(raw, length))
}

/// Resolves one slice entry against a value of the given length.
///
/// An entry is either a single (possibly negative) index or an index
/// range. Negative indices wrap once by adding the length; anything still
/// outside `[0, length)` is an error, as is a non-selector entry.
pub fn indices_for(entry: &str, length: usize) -> Result<Vec<usize>, SelectionError> {
    if let Ok(index) = entry.parse::<isize>() {
        return resolve_one(index, length).map(|n| vec![n]);
    }
    if let Some(range) = parse_index_range(entry) {
        let start = range.start();
        let end = range.end();
        for endpoint in &[start, end] {
            let raw = match endpoint {
                Index::Forward(n) => *n as isize,
                Index::Backward(n) => -(*n as isize) - 1,
            };
            resolve_one(raw, length)?;
        }
        let (start, size) = range
            .bounds(length)
            .ok_or_else(|| SelectionError::NotASelector(entry.into()))?;
        return Ok((start..start + size).collect());
    }
    Err(SelectionError::NotASelector(entry.into()))
}
