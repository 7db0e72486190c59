use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowFile {
    pub blocks: Vec<BlockDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDef {
    pub name: String,
    /// 1-based line of the opening `kind=name` entry.
    pub line: usize,
    pub body: BlockBody,
}

/// Attributes of a block as written in the flow file. Missing attributes stay
/// `None`; the engine decides how to treat them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockBody {
    Command { command: Option<String> },
    Pipe { from: Option<String>, to: Option<String> },
    Concatenation { parts: Vec<String> },
    StderrMerge { from: Option<String> },
    File { path: Option<String> },
}

impl BlockBody {
    /// The keyword that opens this kind of block in a flow file.
    pub fn keyword(&self) -> &'static str {
        match self {
            BlockBody::Command { .. } => "node",
            BlockBody::Pipe { .. } => "pipe",
            BlockBody::Concatenation { .. } => "concatenate",
            BlockBody::StderrMerge { .. } => "stderr",
            BlockBody::File { .. } => "file",
        }
    }
}

impl FlowFile {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks opened with the given keyword (`node`, `pipe`, ...).
    pub fn count_keyword(&self, keyword: &str) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.body.keyword() == keyword)
            .count()
    }
}
