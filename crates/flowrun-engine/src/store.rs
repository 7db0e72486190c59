use std::collections::HashMap;

use flowrun_format::{BlockBody, FlowFile};

/// Kind tag of a block. Declaration order is the resolution precedence used
/// when one name is declared as more than one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKind {
    Command,
    Pipe,
    Concatenation,
    StderrMerge,
    FileEndpoint,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Command => "command",
            BlockKind::Pipe => "pipe",
            BlockKind::Concatenation => "concatenation",
            BlockKind::StderrMerge => "stderr",
            BlockKind::FileEndpoint => "file",
        }
    }

    /// Kinds that may end a chain of pipe edges.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BlockKind::Pipe)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Command { name: String, argv_source: String },
    Pipe { name: String, from: String, to: String },
    Concatenation { name: String, parts: Vec<String> },
    StderrMerge { name: String, from: String },
    FileEndpoint { name: String, path: String },
}

impl Block {
    pub fn name(&self) -> &str {
        match self {
            Block::Command { name, .. }
            | Block::Pipe { name, .. }
            | Block::Concatenation { name, .. }
            | Block::StderrMerge { name, .. }
            | Block::FileEndpoint { name, .. } => name,
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Command { .. } => BlockKind::Command,
            Block::Pipe { .. } => BlockKind::Pipe,
            Block::Concatenation { .. } => BlockKind::Concatenation,
            Block::StderrMerge { .. } => BlockKind::StderrMerge,
            Block::FileEndpoint { .. } => BlockKind::FileEndpoint,
        }
    }

    /// Names this block refers to, in declaration order.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Block::Command { .. } | Block::FileEndpoint { .. } => Vec::new(),
            Block::Pipe { from, to, .. } => vec![from.as_str(), to.as_str()],
            Block::Concatenation { parts, .. } => parts.iter().map(String::as_str).collect(),
            Block::StderrMerge { from, .. } => vec![from.as_str()],
        }
    }
}

/// Direction a file endpoint is wired in, inferred from the pipes naming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// Some pipe reads from the file: its bytes go to the ambient stdout.
    Source,
    /// Some pipe writes into the file: the ambient stdin is stored in it.
    Sink,
}

/// All blocks of one flow, read-only for the run.
///
/// Every record is kept in declaration order so that pipe edges of a shadowed
/// record still take part in validation and role inference. Lookups by name
/// go through `index`, which holds the record winning the kind precedence.
#[derive(Debug, Clone, Default)]
pub struct BlockStore {
    records: Vec<Block>,
    index: HashMap<String, usize>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flow(flow: &FlowFile) -> Self {
        let mut store = BlockStore::new();
        for def in &flow.blocks {
            let name = def.name.clone();
            let block = match &def.body {
                BlockBody::Command { command } => Block::Command {
                    name,
                    argv_source: command.clone().unwrap_or_default(),
                },
                BlockBody::Pipe { from, to } => Block::Pipe {
                    name,
                    from: from.clone().unwrap_or_default(),
                    to: to.clone().unwrap_or_default(),
                },
                BlockBody::Concatenation { parts } => Block::Concatenation {
                    name,
                    parts: parts.clone(),
                },
                BlockBody::StderrMerge { from } => Block::StderrMerge {
                    name,
                    from: from.clone().unwrap_or_default(),
                },
                BlockBody::File { path } => Block::FileEndpoint {
                    name,
                    path: path.clone().unwrap_or_default(),
                },
            };
            store.insert(block);
        }
        store
    }

    /// Add a record. The name index keeps the earlier record unless the new
    /// one has a kind of higher precedence.
    pub fn insert(&mut self, block: Block) {
        let position = self.records.len();
        let kind = block.kind();
        match self.index.get(block.name()) {
            Some(&existing) if self.records[existing].kind() <= kind => {}
            _ => {
                self.index.insert(block.name().to_string(), position);
            }
        }
        self.records.push(block);
    }

    pub fn resolve(&self, name: &str) -> Option<&Block> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    pub fn kind_of(&self, name: &str) -> Option<BlockKind> {
        self.resolve(name).map(Block::kind)
    }

    pub fn directive_exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn has_commands(&self) -> bool {
        self.records
            .iter()
            .any(|b| b.kind() == BlockKind::Command)
    }

    /// Every record, including shadowed ones, in declaration order.
    pub fn records(&self) -> &[Block] {
        &self.records
    }

    /// Records that lost name resolution to an earlier or higher-precedence one.
    pub fn shadowed(&self) -> impl Iterator<Item = &Block> {
        self.records
            .iter()
            .enumerate()
            .filter(|(i, b)| self.index.get(b.name()) != Some(i))
            .map(|(_, b)| b)
    }

    /// `(from, to)` of every pipe record, in declaration order.
    pub fn pipe_edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records.iter().filter_map(|b| match b {
            Block::Pipe { from, to, .. } => Some((from.as_str(), to.as_str())),
            _ => None,
        })
    }

    /// Targets of pipes whose source is `name`.
    pub fn pipe_targets<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pipe_edges()
            .filter(move |(from, _)| *from == name)
            .map(|(_, to)| to)
    }

    /// The first pipe mentioning `name` decides whether the file is read or written.
    pub fn file_role(&self, name: &str) -> Option<FileRole> {
        self.pipe_edges().find_map(|(from, to)| {
            if from == name {
                Some(FileRole::Source)
            } else if to == name {
                Some(FileRole::Sink)
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(src: &str) -> BlockStore {
        let flow = flowrun_format::parse(src).unwrap();
        BlockStore::from_flow(&flow)
    }

    #[test]
    fn from_flow_resolves_each_kind() {
        let store = load(
            "node=a\ncommand=echo a\npipe=p\nfrom=a\nto=f\nconcatenate=c\nparts=1\npart_0=a\nstderr=s\nfrom=a\nfile=f\nname=out.txt\n",
        );
        assert_eq!(store.len(), 5);
        assert_eq!(store.kind_of("a"), Some(BlockKind::Command));
        assert_eq!(store.kind_of("p"), Some(BlockKind::Pipe));
        assert_eq!(store.kind_of("c"), Some(BlockKind::Concatenation));
        assert_eq!(store.kind_of("s"), Some(BlockKind::StderrMerge));
        assert_eq!(store.kind_of("f"), Some(BlockKind::FileEndpoint));
        assert_eq!(store.kind_of("missing"), None);
        assert!(store.directive_exists("p"));
        assert!(!store.directive_exists("missing"));
        assert!(store.has_commands());
    }

    #[test]
    fn missing_attributes_become_empty_strings() {
        let store = load("node=a\npipe=p\nfile=f\n");
        assert_eq!(
            store.resolve("a"),
            Some(&Block::Command {
                name: "a".into(),
                argv_source: String::new()
            })
        );
        assert_eq!(
            store.resolve("p"),
            Some(&Block::Pipe {
                name: "p".into(),
                from: String::new(),
                to: String::new()
            })
        );
    }

    #[test]
    fn collision_prefers_kind_precedence() {
        // File declared first, command later: the command wins.
        let store = load("file=x\nname=x.txt\nnode=x\ncommand=echo x\n");
        assert_eq!(store.kind_of("x"), Some(BlockKind::Command));
        let shadowed: Vec<_> = store.shadowed().map(Block::kind).collect();
        assert_eq!(shadowed, vec![BlockKind::FileEndpoint]);
    }

    #[test]
    fn collision_within_kind_keeps_first() {
        let store = load("node=x\ncommand=echo first\nnode=x\ncommand=echo second\n");
        assert_eq!(
            store.resolve("x"),
            Some(&Block::Command {
                name: "x".into(),
                argv_source: "echo first".into()
            })
        );
        assert_eq!(store.shadowed().count(), 1);
    }

    #[test]
    fn shadowed_pipes_still_contribute_edges() {
        let store = load("node=p\ncommand=true\npipe=p\nfrom=a\nto=b\n");
        assert_eq!(store.kind_of("p"), Some(BlockKind::Command));
        let edges: Vec<_> = store.pipe_edges().collect();
        assert_eq!(edges, vec![("a", "b")]);
    }

    #[test]
    fn no_commands() {
        let store = load("pipe=p\nfrom=a\nto=b\n");
        assert!(!store.has_commands());
        assert!(BlockStore::new().is_empty());
    }

    #[test]
    fn pipe_targets_in_declaration_order() {
        let store = load("pipe=p1\nfrom=a\nto=b\npipe=p2\nfrom=c\nto=d\npipe=p3\nfrom=a\nto=e\n");
        let targets: Vec<_> = store.pipe_targets("a").collect();
        assert_eq!(targets, vec!["b", "e"]);
        assert_eq!(store.pipe_targets("b").count(), 0);
    }

    #[test]
    fn file_role_first_mention_wins() {
        let store = load("pipe=p1\nfrom=in\nto=cat\npipe=p2\nfrom=cat\nto=out\npipe=p3\nfrom=out\nto=x\n");
        assert_eq!(store.file_role("in"), Some(FileRole::Source));
        assert_eq!(store.file_role("out"), Some(FileRole::Sink));
        assert_eq!(store.file_role("unused"), None);
    }

    #[test]
    fn references_by_kind() {
        let store = load("concatenate=c\nparts=2\npart_0=x\npart_1=y\nstderr=s\nfrom=c\n");
        assert_eq!(store.resolve("c").unwrap().references(), vec!["x", "y"]);
        assert_eq!(store.resolve("s").unwrap().references(), vec!["c"]);
    }

    #[test]
    fn only_pipe_is_not_terminal() {
        assert!(BlockKind::Command.is_terminal());
        assert!(BlockKind::Concatenation.is_terminal());
        assert!(BlockKind::StderrMerge.is_terminal());
        assert!(BlockKind::FileEndpoint.is_terminal());
        assert!(!BlockKind::Pipe.is_terminal());
    }
}
