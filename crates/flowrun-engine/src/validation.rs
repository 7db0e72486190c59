//! Flow validation: lint rules and diagnostics.
//!
//! Only `Error` diagnostics block a run. The blocking structural check walks
//! pipe edges alone; cycles through concatenations and stderr merges are
//! reported as warnings and left to the runtime guards. Call [`validate`] for
//! advisory diagnostics or [`validate_or_raise`] to fail on any error.

use std::collections::{HashMap, HashSet};

use flowrun_types::{ExecutionLimits, FlowError, Result};

use crate::store::{Block, BlockStore};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub block: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Pipe chain walk
// ---------------------------------------------------------------------------

/// Follow pipe edges from the source of every pipe, in declaration order.
///
/// Fails on the first name that reappears on the current path, on a chain
/// end that resolves to nothing (or to a pipe nobody pipes from), and on a
/// path longer than `capacity`.
pub fn check_pipe_chains(store: &BlockStore, capacity: usize) -> Result<()> {
    let mut walk = ChainWalk {
        store,
        capacity,
        verified: HashMap::new(),
    };
    for (from, _) in store.pipe_edges() {
        let mut path = Vec::new();
        walk.visit(from, from, &mut path)?;
    }
    Ok(())
}

struct ChainWalk<'a> {
    store: &'a BlockStore,
    capacity: usize,
    /// Names whose whole chain was already walked without error, with the
    /// number of names on their longest chain.
    verified: HashMap<&'a str, usize>,
}

impl<'a> ChainWalk<'a> {
    /// Returns the number of names on the longest chain starting at `name`.
    fn visit(&mut self, start: &str, name: &'a str, path: &mut Vec<&'a str>) -> Result<usize> {
        if path.contains(&name) {
            let mut cycle = path.join(" -> ");
            cycle.push_str(" -> ");
            cycle.push_str(name);
            return Err(FlowError::GraphInvalid(format!("pipe cycle {cycle}")));
        }
        // A verified chain can still overflow when reached through a longer path.
        let height = self.verified.get(name).copied();
        let overflow = match height {
            Some(height) => path.len() + height > self.capacity,
            None => path.len() >= self.capacity,
        };
        if overflow {
            return Err(FlowError::ValidationCapacity {
                start: start.to_string(),
                capacity: self.capacity,
            });
        }
        if let Some(height) = height {
            return Ok(height);
        }

        path.push(name);
        let store = self.store;
        let mut longest = None;
        for to in store.pipe_targets(name) {
            let below = self.visit(start, to, path)?;
            longest = Some(longest.map_or(below, |l: usize| l.max(below)));
        }

        if longest.is_none() {
            match store.kind_of(name) {
                Some(kind) if kind.is_terminal() => {}
                Some(_) => {
                    return Err(FlowError::GraphInvalid(format!(
                        "pipe endpoint '{name}' is a pipe that nothing pipes from"
                    )))
                }
                None => {
                    return Err(FlowError::GraphInvalid(format!(
                        "pipe endpoint '{name}' does not name any block"
                    )))
                }
            }
        }
        path.pop();

        let height = 1 + longest.unwrap_or(0);
        self.verified.insert(name, height);
        Ok(height)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct CommandPresentRule;
impl LintRule for CommandPresentRule {
    fn name(&self) -> &str { "command_present" }
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic> {
        if store.has_commands() {
            return vec![];
        }
        vec![Diagnostic {
            rule: self.name().into(),
            severity: Severity::Error,
            message: "Flow has no node (command) blocks".into(),
            block: None,
            fix: Some("Add a block with node=<name> and command=<program>".into()),
        }]
    }
}

/// Reported from the single chain walk done by [`lint`].
struct PipeChainRule {
    capacity: usize,
}
impl PipeChainRule {
    const NAME: &'static str = "pipe_chain";

    fn diagnostic(&self, err: &FlowError) -> Diagnostic {
        Diagnostic {
            rule: Self::NAME.into(),
            severity: Severity::Error,
            message: match err {
                FlowError::GraphInvalid(msg) => msg.clone(),
                other => other.to_string(),
            },
            block: None,
            fix: Some("Make every pipe chain end in a command, stderr, concatenation or file block without looping".into()),
        }
    }
}

/// Cycles in the full reference graph: pipe sources and targets, concatenation
/// parts, stderr sources. These recurse at runtime until a guard trips.
struct ReferenceCycleRule;
impl ReferenceCycleRule {
    fn visit<'a>(
        store: &'a BlockStore,
        name: &'a str,
        path: &mut Vec<&'a str>,
        finished: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<&'a str>>,
    ) {
        if finished.contains(name) {
            return;
        }
        if let Some(pos) = path.iter().position(|n| *n == name) {
            cycles.push(path[pos..].to_vec());
            return;
        }
        let Some(block) = store.resolve(name) else {
            return;
        };
        path.push(name);
        for next in block.references() {
            Self::visit(store, next, path, finished, cycles);
        }
        path.pop();
        finished.insert(name);
    }
}
impl LintRule for ReferenceCycleRule {
    fn name(&self) -> &str { "reference_cycle" }
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic> {
        let mut finished = HashSet::new();
        let mut cycles = Vec::new();
        for block in store.records() {
            let mut path = Vec::new();
            Self::visit(store, block.name(), &mut path, &mut finished, &mut cycles);
        }

        cycles
            .into_iter()
            .map(|cycle| {
                let head = cycle[0];
                let mut shown = cycle.join(" -> ");
                shown.push_str(" -> ");
                shown.push_str(head);
                Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!(
                        "Block '{head}' refers back to itself ({shown}); only the runtime depth and fork limits stop it"
                    ),
                    block: Some(head.to_string()),
                    fix: Some(format!("Break the loop through '{head}'")),
                }
            })
            .collect()
    }
}

struct UnresolvedReferenceRule;
impl LintRule for UnresolvedReferenceRule {
    fn name(&self) -> &str { "unresolved_reference" }
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for block in store.records() {
            let (label, targets) = match block {
                Block::Concatenation { parts, .. } => ("part", parts.iter().collect::<Vec<_>>()),
                Block::StderrMerge { from, .. } => ("source", vec![from]),
                _ => continue,
            };
            for target in targets {
                if !store.directive_exists(target) {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Block '{}' has {label} '{target}' which does not exist; it will be skipped",
                            block.name()
                        ),
                        block: Some(block.name().to_string()),
                        fix: Some(format!("Add block '{target}' or fix the reference")),
                    });
                }
            }
        }
        diags
    }
}

struct ShadowedNameRule;
impl LintRule for ShadowedNameRule {
    fn name(&self) -> &str { "shadowed_name" }
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic> {
        store
            .shadowed()
            .filter_map(|lost| {
                let winner = store.kind_of(lost.name())?;
                Some(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!(
                        "Name '{}' is declared more than once; the {} block is used and the {} block is ignored",
                        lost.name(),
                        winner.as_str(),
                        lost.kind().as_str()
                    ),
                    block: Some(lost.name().to_string()),
                    fix: Some("Give every block a unique name".into()),
                })
            })
            .collect()
    }
}

struct EmptyCommandRule;
impl LintRule for EmptyCommandRule {
    fn name(&self) -> &str { "empty_command" }
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic> {
        store
            .records()
            .iter()
            .filter_map(|b| match b {
                Block::Command { name, argv_source } if argv_source.trim_matches(' ').is_empty() => {
                    Some(name)
                }
                _ => None,
            })
            .map(|name| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Command block '{name}' has no command; launching it will fail"),
                block: Some(name.clone()),
                fix: Some(format!("Add command=<program> to '{name}'")),
            })
            .collect()
    }
}

struct FileRoleRule;
impl LintRule for FileRoleRule {
    fn name(&self) -> &str { "file_role" }
    fn apply(&self, store: &BlockStore) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for block in store.records() {
            let Block::FileEndpoint { name, path } = block else {
                continue;
            };
            if path.is_empty() {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!("File block '{name}' has no path"),
                    block: Some(name.clone()),
                    fix: Some(format!("Add name=<path> to '{name}'")),
                });
            }
            if store.file_role(name).is_none() {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Info,
                    message: format!("File block '{name}' is not wired by any pipe and does nothing"),
                    block: Some(name.clone()),
                    fix: None,
                });
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every rule once. The pipe-chain outcome is returned alongside the
/// diagnostics so callers can tell a capacity overflow from other errors.
fn lint(store: &BlockStore, limits: &ExecutionLimits) -> (Vec<Diagnostic>, Result<()>) {
    let chain = PipeChainRule {
        capacity: limits.validation_capacity,
    };
    let chain_result = check_pipe_chains(store, chain.capacity);

    let mut diagnostics = CommandPresentRule.apply(store);
    if let Err(err) = &chain_result {
        diagnostics.push(chain.diagnostic(err));
    }

    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(ReferenceCycleRule),
        Box::new(UnresolvedReferenceRule),
        Box::new(ShadowedNameRule),
        Box::new(EmptyCommandRule),
        Box::new(FileRoleRule),
    ];
    for rule in &rules {
        diagnostics.extend(rule.apply(store));
    }
    (diagnostics, chain_result)
}

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(store: &BlockStore, limits: &ExecutionLimits) -> Vec<Diagnostic> {
    lint(store, limits).0
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
/// An over-long pipe chain is reported as its own fatal error.
pub fn validate_or_raise(store: &BlockStore, limits: &ExecutionLimits) -> Result<Vec<Diagnostic>> {
    let (diagnostics, chain_result) = lint(store, limits);
    if let Err(err @ FlowError::ValidationCapacity { .. }) = chain_result {
        return Err(err);
    }

    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(FlowError::GraphInvalid(messages.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn load(src: &str) -> BlockStore {
        let flow = flowrun_format::parse(src).unwrap();
        BlockStore::from_flow(&flow)
    }

    fn errors(store: &BlockStore) -> Vec<Diagnostic> {
        validate(store, &ExecutionLimits::default())
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    const PIPELINE: &str = "\
node=ls
command=ls
node=wc
command=wc -l
pipe=count
from=ls
to=wc
";

    #[test]
    fn valid_pipeline_passes() {
        let store = load(PIPELINE);
        assert!(errors(&store).is_empty(), "{:?}", errors(&store));
        assert!(check_pipe_chains(&store, 256).is_ok());
    }

    #[test]
    fn pipe_cycle_is_error() {
        let store = load("node=x\ncommand=true\npipe=p1\nfrom=a\nto=b\npipe=p2\nfrom=b\nto=a\n");
        let err = check_pipe_chains(&store, 256).unwrap_err();
        match err {
            FlowError::GraphInvalid(msg) => assert!(msg.contains("a -> b -> a"), "{msg}"),
            other => panic!("expected GraphInvalid, got {other:?}"),
        }
        assert!(errors(&store).iter().any(|d| d.rule == "pipe_chain"));
    }

    #[test]
    fn self_pipe_is_cycle() {
        let store = load("node=a\ncommand=true\npipe=p\nfrom=a\nto=a\n");
        assert!(matches!(
            check_pipe_chains(&store, 256),
            Err(FlowError::GraphInvalid(_))
        ));
    }

    #[test]
    fn cycle_detected_among_unrelated_blocks() {
        let src = format!(
            "{PIPELINE}node=other\ncommand=true\npipe=p1\nfrom=a\nto=b\npipe=p2\nfrom=b\nto=a\n"
        );
        let store = load(&src);
        assert!(check_pipe_chains(&store, 256).is_err());
    }

    #[test]
    fn dangling_pipe_target_is_error() {
        let store = load("node=a\ncommand=true\npipe=p\nfrom=a\nto=ghost\n");
        match check_pipe_chains(&store, 256) {
            Err(FlowError::GraphInvalid(msg)) => assert!(msg.contains("ghost"), "{msg}"),
            other => panic!("expected GraphInvalid, got {other:?}"),
        }
    }

    #[test]
    fn dangling_pipe_source_is_error() {
        let store = load("node=b\ncommand=true\npipe=p\nfrom=ghost\nto=b\n");
        // `ghost` pipes into `b`, so the walk only checks `b`; a missing source
        // is only caught when it is itself a chain end.
        assert!(check_pipe_chains(&store, 256).is_ok());

        let store = load("node=b\ncommand=true\npipe=p\nfrom=b\nto=\n");
        assert!(check_pipe_chains(&store, 256).is_err());
    }

    #[test]
    fn pipe_name_as_chain_end_is_error() {
        let store = load("node=a\ncommand=true\nnode=b\ncommand=true\npipe=inner\nfrom=a\nto=b\npipe=outer\nfrom=a\nto=inner\n");
        match check_pipe_chains(&store, 256) {
            Err(FlowError::GraphInvalid(msg)) => assert!(msg.contains("inner"), "{msg}"),
            other => panic!("expected GraphInvalid, got {other:?}"),
        }
    }

    #[test]
    fn pipe_used_as_source_of_another_pipe_is_valid() {
        let store = load("node=ls\ncommand=ls\nnode=wc\ncommand=wc\nnode=cat\ncommand=cat\npipe=p1\nfrom=ls\nto=wc\npipe=p2\nfrom=p1\nto=cat\n");
        assert!(check_pipe_chains(&store, 256).is_ok());
    }

    #[test]
    fn every_terminal_kind_accepted() {
        let store = load(
            "node=src\ncommand=true\nconcatenate=c\nstderr=s\nfrom=src\nfile=f\nname=out\npipe=p1\nfrom=src\nto=c\npipe=p2\nfrom=src\nto=s\npipe=p3\nfrom=src\nto=f\n",
        );
        assert!(check_pipe_chains(&store, 256).is_ok());
    }

    #[test]
    fn capacity_exceeded_is_fatal() {
        let store = load("node=a\ncommand=true\nnode=b\ncommand=true\nnode=c\ncommand=true\npipe=p1\nfrom=a\nto=b\npipe=p2\nfrom=b\nto=c\n");
        assert!(check_pipe_chains(&store, 3).is_ok());
        match check_pipe_chains(&store, 2) {
            Err(FlowError::ValidationCapacity { start, capacity }) => {
                assert_eq!(start, "a");
                assert_eq!(capacity, 2);
            }
            other => panic!("expected ValidationCapacity, got {other:?}"),
        }

        let limits = ExecutionLimits {
            validation_capacity: 2,
            ..ExecutionLimits::default()
        };
        assert!(matches!(
            validate_or_raise(&store, &limits),
            Err(FlowError::ValidationCapacity { .. })
        ));
    }

    #[test]
    fn wide_diamond_chains_walk_each_name_once() {
        // 40 layers of two names, each piping into both names of the next
        // layer: 2^40 distinct paths.
        let mut src = String::from("node=sink\ncommand=cat\n");
        for layer in 0..40 {
            for side in ["l", "r"] {
                src.push_str(&format!("node={side}{layer}\ncommand=cat\n"));
            }
        }
        for layer in 0..40 {
            for from in ["l", "r"] {
                if layer == 39 {
                    src.push_str(&format!("pipe=p{from}{layer}\nfrom={from}{layer}\nto=sink\n"));
                    continue;
                }
                for to in ["l", "r"] {
                    src.push_str(&format!(
                        "pipe=p{from}{layer}{to}\nfrom={from}{layer}\nto={to}{}\n",
                        layer + 1
                    ));
                }
            }
        }
        let store = load(&src);
        assert!(check_pipe_chains(&store, 256).is_ok());
        assert!(validate_or_raise(&store, &ExecutionLimits::default()).is_ok());
        assert!(matches!(
            check_pipe_chains(&store, 30),
            Err(FlowError::ValidationCapacity { capacity: 30, .. })
        ));
    }

    #[test]
    fn verified_chain_reached_through_longer_path_still_overflows() {
        // `c -> d` is verified from `c` first; reaching it again from `a`
        // pushes the chain to four names.
        let store = load("node=a\ncommand=true\nnode=b\ncommand=true\nnode=c\ncommand=true\nnode=d\ncommand=true\npipe=p1\nfrom=c\nto=d\npipe=p2\nfrom=a\nto=b\npipe=p3\nfrom=b\nto=c\n");
        assert!(check_pipe_chains(&store, 4).is_ok());
        match check_pipe_chains(&store, 3) {
            Err(FlowError::ValidationCapacity { start, .. }) => assert_eq!(start, "a"),
            other => panic!("expected ValidationCapacity, got {other:?}"),
        }
    }

    #[test]
    fn pipe_chain_error_reported_once() {
        let store = load("node=x\ncommand=true\npipe=p\nfrom=x\nto=ghost\n");
        let chain: Vec<_> = validate(&store, &ExecutionLimits::default())
            .into_iter()
            .filter(|d| d.rule == "pipe_chain")
            .collect();
        assert_eq!(chain.len(), 1);
        match validate_or_raise(&store, &ExecutionLimits::default()) {
            Err(FlowError::GraphInvalid(msg)) => {
                assert_eq!(msg, "pipe endpoint 'ghost' does not name any block")
            }
            other => panic!("expected GraphInvalid, got {other:?}"),
        }
    }

    #[test]
    fn no_commands_is_error() {
        let store = load("file=f\nname=x\n");
        assert!(errors(&store).iter().any(|d| d.rule == "command_present"));
        assert!(matches!(
            validate_or_raise(&store, &ExecutionLimits::default()),
            Err(FlowError::GraphInvalid(_))
        ));
    }

    #[test]
    fn concatenation_self_reference_is_only_a_warning() {
        let store = load("node=a\ncommand=true\nconcatenate=c\nparts=2\npart_0=a\npart_1=c\n");
        assert!(check_pipe_chains(&store, 256).is_ok());
        let diags = validate_or_raise(&store, &ExecutionLimits::default()).unwrap();
        let cycle = diags
            .iter()
            .find(|d| d.rule == "reference_cycle")
            .expect("reference_cycle warning");
        assert_eq!(cycle.severity, Severity::Warning);
        assert!(cycle.message.contains("c -> c"), "{}", cycle.message);
    }

    #[test]
    fn stderr_cycle_through_concatenation_is_warning() {
        let store = load("node=a\ncommand=true\nstderr=s\nfrom=c\nconcatenate=c\nparts=1\npart_0=s\n");
        let diags = validate(&store, &ExecutionLimits::default());
        let cycles: Vec<_> = diags.iter().filter(|d| d.rule == "reference_cycle").collect();
        assert_eq!(cycles.len(), 1, "{cycles:?}");
    }

    #[test]
    fn acyclic_references_have_no_cycle_warning() {
        let store = load("node=a\ncommand=true\nconcatenate=c\nparts=3\npart_0=a\npart_1=a\npart_2=s\nstderr=s\nfrom=a\n");
        assert!(!validate(&store, &ExecutionLimits::default())
            .iter()
            .any(|d| d.rule == "reference_cycle"));
    }

    #[test]
    fn unresolved_part_warning() {
        let store = load("node=a\ncommand=true\nconcatenate=c\nparts=1\npart_0=ghost\nstderr=s\nfrom=phantom\n");
        let diags: Vec<_> = validate(&store, &ExecutionLimits::default())
            .into_iter()
            .filter(|d| d.rule == "unresolved_reference")
            .collect();
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn shadowed_name_warning() {
        let store = load("file=x\nname=x.txt\nnode=x\ncommand=true\n");
        let diag = validate(&store, &ExecutionLimits::default())
            .into_iter()
            .find(|d| d.rule == "shadowed_name")
            .expect("shadowed_name warning");
        assert!(diag.message.contains("command block is used"), "{}", diag.message);
    }

    #[test]
    fn empty_command_warning() {
        let store = load("node=a\nnode=b\ncommand=   \nnode=c\ncommand=true\n");
        let names: Vec<_> = validate(&store, &ExecutionLimits::default())
            .into_iter()
            .filter(|d| d.rule == "empty_command")
            .filter_map(|d| d.block)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn unwired_file_is_info() {
        let store = load("node=a\ncommand=true\nfile=f\nname=out.txt\nfile=g\n");
        let diags: Vec<_> = validate(&store, &ExecutionLimits::default())
            .into_iter()
            .filter(|d| d.rule == "file_role")
            .collect();
        assert!(diags
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("'g' has no path")));
        assert_eq!(
            diags.iter().filter(|d| d.severity == Severity::Info).count(),
            2
        );
    }
}
