//! Immediate functions: compile-time transforms invoked as
//! `${name arg...}`. Each receives its argument nodes and returns a
//! replacement node that evaluates in their place.

pub mod globber;
pub mod math;

use crate::{
    ast::{NameWithPosition, Node, NodeKind},
    error::{Error, Result},
    parser::NativeParser,
    position::Position,
    shell::Shell,
    types::Str,
    value::{Value, Variable},
};
use itertools::Itertools;
use unicode_segmentation::UnicodeSegmentation;

/// Dispatches an immediate function by name.
pub fn invoke_immediate(
    shell: &mut Shell,
    name: &NameWithPosition,
    arguments: &[Node],
    position: Position,
) -> Result<Node> {
    let call = Call { shell, arguments, position };
    match name.name.as_str() {
        "length" => call.length(),
        "length_across" => call.length_across(),
        "split" => call.split(),
        "join" => call.join(),
        "remove_prefix" => call.remove_affix(Affix::Prefix),
        "remove_suffix" => call.remove_affix(Affix::Suffix),
        "regex_replace" => call.regex_replace(),
        "concat_lists" => call.concat_lists(),
        "filter_glob" => call.filter_glob(),
        "value_or_default" => call.parameter(Parameter::ValueOrDefault),
        "assign_default" => call.parameter(Parameter::AssignDefault),
        "error_if_empty" => call.parameter(Parameter::ErrorIfEmpty),
        "null_or_alternative" => call.parameter(Parameter::NullOrAlternative),
        "defined_value_or_default" => call.parameter(Parameter::DefinedValueOrDefault),
        "assign_defined_default" => call.parameter(Parameter::AssignDefinedDefault),
        "error_if_unset" => call.parameter(Parameter::ErrorIfUnset),
        "null_if_unset_or_alternative" => call.parameter(Parameter::NullIfUnsetOrAlternative),
        "reexpand" => call.reexpand(),
        "length_of_variable" => call.length_of_variable(),
        "math" => call.math(),
        unknown => Err(Error::syntax(
            format!("unknown immediate function '{}'", unknown),
            name.position,
        )),
    }
}

enum Affix {
    Prefix,
    Suffix,
}

enum Parameter {
    ValueOrDefault,
    AssignDefault,
    ErrorIfEmpty,
    NullOrAlternative,
    DefinedValueOrDefault,
    AssignDefinedDefault,
    ErrorIfUnset,
    NullIfUnsetOrAlternative,
}

struct Call<'a, 'b> {
    shell:     &'a mut Shell,
    arguments: &'b [Node],
    position:  Position,
}

impl<'a, 'b> Call<'a, 'b> {
    fn argument(&self, index: usize) -> Result<&'b Node> {
        self.arguments.get(index).ok_or_else(|| {
            Error::syntax("missing argument to immediate function", self.position)
        })
    }

    fn string_argument(&mut self, index: usize) -> Result<Str> {
        let node = self.argument(index)?;
        let value = node.run(self.shell)?;
        value.resolve_as_string(self.shell)
    }

    fn list_argument(&mut self, index: usize) -> Result<Vec<Str>> {
        let node = self.argument(index)?;
        let value = node.run(self.shell)?;
        value.resolve_as_list(self.shell)
    }

    fn numeral(&self, value: usize) -> Node {
        Node::new(
            NodeKind::BarewordLiteral { text: value.to_string() },
            self.position,
        )
    }

    fn string_node(&self, text: Str) -> Node {
        Node::new(NodeKind::SyntheticValue { value: Value::string(text) }, self.position)
    }

    fn list_node(&self, entries: Vec<Str>) -> Node {
        Node::new(
            NodeKind::SyntheticValue { value: Value::string_list(entries) },
            self.position,
        )
    }

    /// Whether the expression argument is list-shaped, syntactically or
    /// after resolution.
    fn infers_list(&mut self, node: &Node) -> Result<bool> {
        let syntactic = matches!(
            node.kind(),
            NodeKind::ListConcatenate { .. }
                | NodeKind::BraceExpansion { .. }
                | NodeKind::Range { .. }
                | NodeKind::CastToList { .. }
        );
        if syntactic {
            return Ok(true);
        }
        let value = node.run(self.shell)?;
        Ok(value.is_list())
    }

    fn length(mut self) -> Result<Node> {
        let (mode, expr_index) = match self.arguments.len() {
            1 => ("infer", 0),
            _ => {
                let mode = self.argument(0)?.literal_text().unwrap_or("infer");
                (mode, 1)
            }
        };
        let expr = self.argument(expr_index)?;
        let as_list = match mode {
            "list" => true,
            "string" => false,
            _ => self.infers_list(expr)?,
        };
        let length = if as_list {
            self.list_argument(expr_index)?.len()
        } else {
            self.string_argument(expr_index)?.len()
        };
        Ok(self.numeral(length))
    }

    fn length_across(mut self) -> Result<Node> {
        let mode = self.argument(0)?.literal_text().unwrap_or("infer").to_string();
        let entries = self.list_argument(1)?;
        let lengths = entries
            .iter()
            .map(|entry| match mode.as_str() {
                "list" => 1usize.to_string(),
                _ => entry.len().to_string(),
            })
            .collect();
        Ok(self.list_node(lengths))
    }

    fn split(mut self) -> Result<Node> {
        let delimiter = self.string_argument(0)?;
        let entries = self.list_argument(1)?;
        let mut out = Vec::new();
        for entry in entries {
            if delimiter.is_empty() {
                out.extend(entry.graphemes(true).map(Str::from));
            } else {
                out.extend(entry.split(delimiter.as_str()).map(Str::from));
            }
        }
        Ok(self.list_node(out))
    }

    fn join(mut self) -> Result<Node> {
        let delimiter = self.string_argument(0)?;
        let entries = self.list_argument(1)?;
        Ok(self.string_node(entries.iter().join(&delimiter)))
    }

    fn remove_affix(mut self, affix: Affix) -> Result<Node> {
        let pattern = self.string_argument(0)?;
        let entries = self.list_argument(1)?;
        let stripped = entries
            .into_iter()
            .map(|entry| strip_affix(&entry, &pattern, &affix))
            .collect();
        Ok(self.list_node(stripped))
    }

    fn regex_replace(mut self) -> Result<Node> {
        let pattern = self.string_argument(0)?;
        let replacement = self.string_argument(1)?;
        let subject = self.string_argument(2)?;
        let regex = regex::RegexBuilder::new(&pattern)
            .multi_line(true)
            .unicode(true)
            .build()
            .map_err(|err| {
                Error::syntax(format!("invalid regular expression: {}", err), self.position)
            })?;
        let replaced = regex.replace_all(&subject, replacement.as_str()).into_owned();
        Ok(self.string_node(replaced))
    }

    fn concat_lists(mut self) -> Result<Node> {
        let mut out = Vec::new();
        for index in 0..self.arguments.len() {
            out.extend(self.list_argument(index)?);
        }
        Ok(self.list_node(out))
    }

    fn filter_glob(mut self) -> Result<Node> {
        let pattern = self.string_argument(0)?;
        let entries = self.list_argument(1)?;
        let kept = entries
            .into_iter()
            .filter(|entry| globber::matches(&pattern, entry))
            .collect();
        Ok(self.list_node(kept))
    }

    fn parameter(mut self, kind: Parameter) -> Result<Node> {
        let name = self.string_argument(0)?;
        let current = self.shell.variable(&name);
        let is_set = current.is_some();
        let current_text =
            current.as_ref().map(Variable::to_joined_string).unwrap_or_default();
        let is_empty = current_text.is_empty();

        match kind {
            Parameter::ValueOrDefault => {
                if is_empty {
                    let fallback = self.string_argument(1)?;
                    Ok(self.string_node(fallback))
                } else {
                    Ok(self.string_node(current_text))
                }
            }
            Parameter::AssignDefault => {
                if is_empty {
                    let fallback = self.string_argument(1)?;
                    self.shell.assign_variable(&name, Variable::Str(fallback.clone()));
                    Ok(self.string_node(fallback))
                } else {
                    Ok(self.string_node(current_text))
                }
            }
            Parameter::ErrorIfEmpty => {
                if is_empty {
                    let message = self
                        .string_argument(1)
                        .unwrap_or_else(|_| format!("{}: parameter empty", name));
                    Err(Error::syntax(message, self.position))
                } else {
                    Ok(self.string_node(current_text))
                }
            }
            Parameter::NullOrAlternative => {
                if is_empty {
                    Ok(self.string_node(Str::new()))
                } else {
                    let alternative = self.string_argument(1)?;
                    Ok(self.string_node(alternative))
                }
            }
            Parameter::DefinedValueOrDefault => {
                if is_set {
                    Ok(self.string_node(current_text))
                } else {
                    let fallback = self.string_argument(1)?;
                    Ok(self.string_node(fallback))
                }
            }
            Parameter::AssignDefinedDefault => {
                if is_set {
                    Ok(self.string_node(current_text))
                } else {
                    let fallback = self.string_argument(1)?;
                    self.shell.assign_variable(&name, Variable::Str(fallback.clone()));
                    Ok(self.string_node(fallback))
                }
            }
            Parameter::ErrorIfUnset => {
                if is_set {
                    Ok(self.string_node(current_text))
                } else {
                    let message = self
                        .string_argument(1)
                        .unwrap_or_else(|_| format!("{}: parameter not set", name));
                    Err(Error::syntax(message, self.position))
                }
            }
            Parameter::NullIfUnsetOrAlternative => {
                if is_set {
                    let alternative = self.string_argument(1)?;
                    Ok(self.string_node(alternative))
                } else {
                    Ok(self.string_node(Str::new()))
                }
            }
        }
    }

    fn reexpand(mut self) -> Result<Node> {
        let entries = self.list_argument(0)?;
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            let tree = NativeParser::new(&entry).parse();
            // Unwrap the toplevel execute/sequence back to the expression.
            let node = match tree.kind() {
                NodeKind::Execute { command, .. } => match command.kind() {
                    NodeKind::Sequence { entries } if entries.len() == 1 => {
                        match entries[0].kind() {
                            NodeKind::CastToCommand { inner } => (**inner).clone(),
                            _ => entries[0].clone(),
                        }
                    }
                    _ => (**command).clone(),
                },
                _ => tree,
            };
            parsed.push(node);
        }
        Ok(Node::new(NodeKind::ListConcatenate { entries: parsed }, self.position))
    }

    fn length_of_variable(mut self) -> Result<Node> {
        let name = self.string_argument(0)?;
        let length = self
            .shell
            .variable(&name)
            .map(|variable| variable.to_joined_string().len())
            .unwrap_or(0);
        Ok(self.numeral(length))
    }

    fn math(mut self) -> Result<Node> {
        // Operator characters would glob or expand if evaluated; take the
        // written text of each argument instead.
        let mut parts = Vec::with_capacity(self.arguments.len());
        for index in 0..self.arguments.len() {
            let node = self.argument(index)?;
            match node.literal_text() {
                Some(text) => parts.push(Str::from(text)),
                None => parts.push(self.string_argument(index)?),
            }
        }
        let source = parts.join(" ");
        let result = math::evaluate(self.shell, &source)?;
        Ok(Node::new(
            NodeKind::BarewordLiteral { text: result.to_string() },
            self.position,
        ))
    }
}

/// Strips a (possibly glob) pattern from one end of a string, preferring
/// the shortest match.
fn strip_affix(entry: &str, pattern: &str, affix: &Affix) -> Str {
    let has_glob = pattern.contains('*') || pattern.contains('?') || pattern.contains('[');
    match affix {
        Affix::Prefix => {
            if !has_glob {
                return entry.strip_prefix(pattern).unwrap_or(entry).into();
            }
            for split in entry
                .char_indices()
                .map(|(index, _)| index)
                .chain(std::iter::once(entry.len()))
            {
                if globber::matches(pattern, &entry[..split]) {
                    return entry[split..].into();
                }
            }
            entry.into()
        }
        Affix::Suffix => {
            if !has_glob {
                return entry.strip_suffix(pattern).unwrap_or(entry).into();
            }
            for split in entry
                .char_indices()
                .map(|(index, _)| index)
                .chain(std::iter::once(entry.len()))
                .rev()
            {
                if globber::matches(pattern, &entry[split..]) {
                    return entry[..split].into();
                }
            }
            entry.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Enclosure, shell::Shell};

    fn bareword(text: &str) -> Node {
        Node::new(
            NodeKind::BarewordLiteral { text: text.into() },
            Position::default(),
        )
    }

    fn literal(text: &str) -> Node {
        Node::new(
            NodeKind::StringLiteral { text: text.into(), enclosure: Enclosure::SingleQuotes },
            Position::default(),
        )
    }

    fn call(shell: &mut Shell, name: &str, arguments: Vec<Node>) -> Result<Vec<Str>> {
        let name = NameWithPosition { name: name.into(), position: Position::default() };
        let node = invoke_immediate(shell, &name, &arguments, Position::default())?;
        let value = node.run(shell)?;
        value.resolve_as_list(shell)
    }

    #[test]
    fn length_infers_string_for_plain_words() {
        let mut shell = Shell::library();
        let result = call(&mut shell, "length", vec![bareword("hello")]).unwrap();
        assert_eq!(result, vec!["5"]);
    }

    #[test]
    fn length_of_explicit_list() {
        let mut shell = Shell::library();
        let list = Node::new(
            NodeKind::ListConcatenate {
                entries: vec![bareword("a"), bareword("b"), bareword("c")],
            },
            Position::default(),
        );
        let result = call(&mut shell, "length", vec![list]).unwrap();
        assert_eq!(result, vec!["3"]);
    }

    #[test]
    fn split_and_join_are_inverses_without_adjacent_delims() {
        let mut shell = Shell::library();
        let split = call(&mut shell, "split", vec![literal(":"), bareword("a:b:c")]).unwrap();
        assert_eq!(split, vec!["a", "b", "c"]);
        let list = Node::new(
            NodeKind::ListConcatenate {
                entries: split.iter().map(|entry| bareword(entry)).collect(),
            },
            Position::default(),
        );
        let joined = call(&mut shell, "join", vec![literal(":"), list]).unwrap();
        assert_eq!(joined, vec!["a:b:c"]);
    }

    #[test]
    fn split_with_empty_delimiter_yields_code_points() {
        let mut shell = Shell::library();
        let result = call(&mut shell, "split", vec![literal(""), bareword("abc")]).unwrap();
        assert_eq!(result, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_prefix_and_suffix() {
        let mut shell = Shell::library();
        let result =
            call(&mut shell, "remove_prefix", vec![literal("foo-"), bareword("foo-bar")]).unwrap();
        assert_eq!(result, vec!["bar"]);
        let result =
            call(&mut shell, "remove_suffix", vec![literal(".txt"), bareword("a.txt")]).unwrap();
        assert_eq!(result, vec!["a"]);
    }

    #[test]
    fn remove_suffix_with_glob_strips_smallest() {
        let mut shell = Shell::library();
        let result =
            call(&mut shell, "remove_suffix", vec![literal(".*"), bareword("a.b.c")]).unwrap();
        assert_eq!(result, vec!["a.b"]);
    }

    #[test]
    fn value_or_default_falls_back_on_empty() {
        let mut shell = Shell::library();
        let result = call(
            &mut shell,
            "value_or_default",
            vec![bareword("UNSET_THING"), bareword("fallback")],
        )
        .unwrap();
        assert_eq!(result, vec!["fallback"]);
    }

    #[test]
    fn assign_default_also_assigns() {
        let mut shell = Shell::library();
        let result = call(
            &mut shell,
            "assign_default",
            vec![bareword("ASSIGNED_THING"), bareword("v")],
        )
        .unwrap();
        assert_eq!(result, vec!["v"]);
        assert_eq!(shell.variable("ASSIGNED_THING").unwrap().to_joined_string(), "v");
    }

    #[test]
    fn unset_aware_forms_distinguish_empty_from_unset() {
        let mut shell = Shell::library();
        shell.assign_variable("EMPTY_THING", Variable::Str(Str::new()));
        let result = call(
            &mut shell,
            "defined_value_or_default",
            vec![bareword("EMPTY_THING"), bareword("fallback")],
        )
        .unwrap();
        assert_eq!(result, vec![""]);
    }

    #[test]
    fn error_if_unset_raises() {
        let mut shell = Shell::library();
        let result = call(
            &mut shell,
            "error_if_unset",
            vec![bareword("MISSING_THING"), bareword("gone")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn filter_glob_keeps_matches() {
        let mut shell = Shell::library();
        let list = Node::new(
            NodeKind::ListConcatenate {
                entries: vec![bareword("a.rs"), bareword("b.txt"), bareword("c.rs")],
            },
            Position::default(),
        );
        let result = call(&mut shell, "filter_glob", vec![literal("*.rs"), list]).unwrap();
        assert_eq!(result, vec!["a.rs", "c.rs"]);
    }

    #[test]
    fn regex_replace_is_global() {
        let mut shell = Shell::library();
        let result = call(
            &mut shell,
            "regex_replace",
            vec![literal("o"), literal("0"), bareword("foo boo")],
        )
        .unwrap();
        assert_eq!(result, vec!["f00 b00"]);
    }

    #[test]
    fn math_returns_a_numeral() {
        let mut shell = Shell::library();
        let result = call(&mut shell, "math", vec![literal("2 * 3 + 4")]).unwrap();
        assert_eq!(result, vec!["10"]);
    }

    #[test]
    fn concat_lists_flattens() {
        let mut shell = Shell::library();
        let first = Node::new(
            NodeKind::ListConcatenate { entries: vec![bareword("a"), bareword("b")] },
            Position::default(),
        );
        let second = Node::new(
            NodeKind::ListConcatenate { entries: vec![bareword("c")] },
            Position::default(),
        );
        let result = call(&mut shell, "concat_lists", vec![first, second]).unwrap();
        assert_eq!(result, vec!["a", "b", "c"]);
    }

    #[test]
    fn reexpand_reparses_each_entry() {
        let mut shell = Shell::library();
        let result = call(&mut shell, "reexpand", vec![literal("one two")]).unwrap();
        assert_eq!(result, vec!["one", "two"]);
    }
}
