use std::cmp::Ordering;

fn integer_range(start: i64, end: i64) -> Vec<String> {
    let mut out = Vec::with_capacity((start - end).abs() as usize + 1);
    let step: i64 = if start <= end { 1 } else { -1 };
    let mut value = start;
    loop {
        out.push(value.to_string());
        if value == end {
            break;
        }
        value += step;
    }
    out
}

fn codepoint_range(start: char, end: char) -> Vec<String> {
    let (low, high, rev) = match (start as u32).cmp(&(end as u32)) {
        Ordering::Greater => (end as u32, start as u32, true),
        _ => (start as u32, end as u32, false),
    };
    let mut out: Vec<String> = (low..=high)
        .filter_map(std::char::from_u32)
        .map(|c| c.to_string())
        .collect();
    if rev {
        out.reverse();
    }
    out
}

/// Expands the textual endpoints of a range into the full inclusive
/// sequence, stepping by one in either direction.
///
/// Both endpoints being single code points yields the code-point range;
/// both parsing as integers yields the integer range. Anything else is not
/// expandable and returns `None`.
pub fn expand_range(start: &str, end: &str) -> Option<Vec<String>> {
    let mut start_chars = start.chars();
    let mut end_chars = end.chars();
    if let (Some(s), None, Some(e), None) =
        (start_chars.next(), start_chars.next(), end_chars.next(), end_chars.next())
    {
        if !(s.is_ascii_digit() && e.is_ascii_digit()) {
            return Some(codepoint_range(s, e));
        }
    }
    match (start.parse::<i64>(), end.parse::<i64>()) {
        (Ok(s), Ok(e)) => Some(integer_range(s, e)),
        _ => None,
    }
}
