use std::collections::BTreeMap;

use winnow::ascii::digit1;
use winnow::combinator::{alt, opt, preceded};
use winnow::token::{literal, rest};
use winnow::{ModalResult, Parser};

use flowrun_types::FlowError;

use crate::ast::*;

/// Left-hand side of a `key=value` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Node,
    Command,
    Pipe,
    From,
    To,
    Concatenate,
    Parts,
    Part(usize),
    Stderr,
    File,
    Name,
}

/// Parse a key. `part_<index>` must be tried before `parts`.
fn key(input: &mut &str) -> ModalResult<Key> {
    alt((
        preceded(literal("part_"), digit1.parse_to::<usize>()).map(Key::Part),
        literal("parts").value(Key::Parts),
        literal("node").value(Key::Node),
        literal("command").value(Key::Command),
        literal("pipe").value(Key::Pipe),
        literal("from").value(Key::From),
        literal("to").value(Key::To),
        literal("concatenate").value(Key::Concatenate),
        literal("stderr").value(Key::Stderr),
        literal("file").value(Key::File),
        literal("name").value(Key::Name),
    ))
    .parse_next(input)
}

/// Parse one entry: key '=' value. The value is everything after the first '='.
fn entry<'i>(input: &mut &'i str) -> ModalResult<(Key, &'i str)> {
    let k = key.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let value = rest.parse_next(input)?;
    Ok((k, value))
}

/// Leading decimal digits of a `parts=` value; anything else declares no slots.
fn slot_count(input: &mut &str) -> ModalResult<usize> {
    opt(digit1.parse_to::<usize>())
        .map(|n| n.unwrap_or(0))
        .parse_next(input)
}

/// A block whose attributes are still being collected.
enum Pending {
    Command { command: Option<String> },
    Pipe { from: Option<String>, to: Option<String> },
    Concatenation {
        declared: usize,
        slots: BTreeMap<usize, String>,
    },
    StderrMerge { from: Option<String> },
    File { path: Option<String> },
}

struct Open {
    name: String,
    line: usize,
    text: String,
    pending: Pending,
}

impl Open {
    /// Apply an attribute. Returns `false` when it does not belong to this block.
    fn apply(&mut self, key: Key, value: &str) -> bool {
        let value = value.to_string();
        match (&mut self.pending, key) {
            (Pending::Command { command }, Key::Command) => *command = Some(value),
            (Pending::Pipe { from, .. }, Key::From) => *from = Some(value),
            (Pending::Pipe { to, .. }, Key::To) => *to = Some(value),
            (Pending::StderrMerge { from }, Key::From) => *from = Some(value),
            (Pending::File { path }, Key::Name) => *path = Some(value),
            (Pending::Concatenation { declared, slots }, Key::Parts) => {
                *declared = slot_count.parse_next(&mut value.as_str()).unwrap_or(0);
                slots.clear();
            }
            (Pending::Concatenation { declared, slots }, Key::Part(index)) => {
                // Out-of-range indices are dropped, like any other stray line.
                if index >= *declared {
                    return false;
                }
                slots.insert(index, value);
            }
            _ => return false,
        }
        true
    }

    fn finish(self) -> Result<BlockDef, FlowError> {
        let body = match self.pending {
            Pending::Command { command } => BlockBody::Command { command },
            Pending::Pipe { from, to } => BlockBody::Pipe { from, to },
            Pending::StderrMerge { from } => BlockBody::StderrMerge { from },
            Pending::File { path } => BlockBody::File { path },
            Pending::Concatenation { declared, mut slots } => {
                // Slots are only materialized as `part_<i>` lines arrive, so the
                // first gap is found within one step past the last filled slot.
                let mut parts = Vec::with_capacity(slots.len());
                for index in 0..declared {
                    match slots.remove(&index) {
                        Some(part) => parts.push(part),
                        None => {
                            return Err(FlowError::ParseError {
                                line: self.line,
                                col: 1,
                                message: format!(
                                    "concatenation '{}' declares {} parts but part_{} is missing",
                                    self.name, declared, index
                                ),
                                source_snippet: Some(self.text),
                            })
                        }
                    }
                }
                BlockBody::Concatenation { parts }
            }
        };
        Ok(BlockDef {
            name: self.name,
            line: self.line,
            body,
        })
    }
}

/// Public entry point.
pub fn parse(input: &str) -> Result<FlowFile, FlowError> {
    let mut blocks = Vec::new();
    let mut open: Option<Open> = None;

    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        if raw.is_empty() {
            continue;
        }

        let mut remaining = raw;
        let (k, value) = match entry.parse_next(&mut remaining) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::debug!(line, text = raw, "ignoring unrecognized line");
                continue;
            }
        };

        let pending = match k {
            Key::Node => Some(Pending::Command { command: None }),
            Key::Pipe => Some(Pending::Pipe { from: None, to: None }),
            Key::Concatenate => Some(Pending::Concatenation {
                declared: 0,
                slots: BTreeMap::new(),
            }),
            Key::Stderr => Some(Pending::StderrMerge { from: None }),
            Key::File => Some(Pending::File { path: None }),
            _ => None,
        };

        match pending {
            Some(pending) => {
                if let Some(done) = open.take() {
                    blocks.push(done.finish()?);
                }
                open = Some(Open {
                    name: value.to_string(),
                    line,
                    text: raw.to_string(),
                    pending,
                });
            }
            None => {
                let applied = open.as_mut().is_some_and(|block| block.apply(k, value));
                if !applied {
                    tracing::debug!(line, text = raw, "ignoring attribute outside its block");
                }
            }
        }
    }

    if let Some(done) = open.take() {
        blocks.push(done.finish()?);
    }

    Ok(FlowFile { blocks })
}
