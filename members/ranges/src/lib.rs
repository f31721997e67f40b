mod expand;
mod range;
mod select;

pub use self::{expand::*, range::*, select::*};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let range = Range::exclusive(Index::new(1), Index::new(5));
        assert_eq!(Some((1, 4)), range.bounds(42));
        assert_eq!(Some((1, 4)), range.bounds(7));
        let range = Range::inclusive(Index::new(2), Index::new(-4));
        assert_eq!(Some((2, 5)), range.bounds(10));
        assert_eq!(None, range.bounds(3));
    }

    #[test]
    fn index_ranges() {
        let valid = vec![
            (Range::exclusive(Index::Forward(0), Index::Forward(3)), "0..3"),
            (Range::inclusive(Index::Forward(0), Index::Forward(4)), "0..=4"),
            (Range::inclusive(Index::Forward(2), Index::Backward(1)), "2..=-2"),
            (Range::from(Index::Backward(2)), "-3.."),
            (Range::to(Index::Forward(5)), "..5"),
        ];
        for (range, text) in valid {
            assert_eq!(Some(range), parse_index_range(text));
        }
        for text in &["0..A", "3-3..42", "0.=3", "=0..3"] {
            assert_eq!(None, parse_index_range(text));
        }
    }

    #[test]
    fn integer_expansion() {
        let up: Vec<String> = expand_range("7", "10").unwrap();
        assert_eq!(up, vec!["7", "8", "9", "10"]);
        let down: Vec<String> = expand_range("3", "-1").unwrap();
        assert_eq!(down, vec!["3", "2", "1", "0", "-1"]);
    }

    #[test]
    fn codepoint_expansion() {
        let fwd: Vec<String> = expand_range("a", "e").unwrap();
        assert_eq!(fwd, vec!["a", "b", "c", "d", "e"]);
        let rev: Vec<String> = expand_range("E", "A").unwrap();
        assert_eq!(rev, vec!["E", "D", "C", "B", "A"]);
    }

    #[test]
    fn unexpandable() {
        assert!(expand_range("abc", "z").is_none());
        assert!(expand_range("1", "xyz").is_none());
    }

    #[test]
    fn selection_wraps_negatives() {
        assert_eq!(indices_for("-1", 4), Ok(vec![3]));
        assert_eq!(indices_for("1..=2", 4), Ok(vec![1, 2]));
        assert_eq!(indices_for("-2..", 4), Ok(vec![2, 3]));
    }

    #[test]
    fn selection_rejects_out_of_range() {
        assert_eq!(indices_for("7", 4), Err(SelectionError::OutOfBounds(7, 4)));
        assert_eq!(indices_for("-9", 4), Err(SelectionError::OutOfBounds(-9, 4)));
        assert!(matches!(indices_for("pear", 4), Err(SelectionError::NotASelector(_))));
    }
}
