//! Depth-first rendering of the tree.
//!
//! Three formats: an indented text dump for eyeballing structure, a
//! Graphviz digraph for plotting it, and a bare in-order key/value listing
//! that doubles as the index's sorted enumeration.

use std::io::Write;

use eyre::{bail, eyre, Result};

use super::BTreeIndex;
use crate::cache::{BlockCache, BlockId};
use crate::node::{Node, NodeType};

/// Output format for [`BTreeIndex::display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Indented text, one node per line, children below their parent.
    Depth,
    /// Graphviz DOT digraph.
    DepthDot,
    /// In-order `(key,value)` pairs, one per line.
    SortedKeyval,
}

impl<'a, C: BlockCache> BTreeIndex<'a, C> {
    /// Writes a depth-first rendering of the tree to `out`.
    pub fn display(&mut self, out: &mut dyn Write, mode: DisplayMode) -> Result<()> {
        let sb = self.superblock.as_ref().ok_or_else(|| eyre!("index not attached"))?;
        let root = sb.rootnode();

        if mode == DisplayMode::DepthDot {
            writeln!(out, "digraph btree {{")?;
        }
        self.display_node(out, root, 0, mode)?;
        if mode == DisplayMode::DepthDot {
            writeln!(out, "}}")?;
        }
        Ok(())
    }

    fn display_node(
        &mut self,
        out: &mut dyn Write,
        block: BlockId,
        depth: usize,
        mode: DisplayMode,
    ) -> Result<()> {
        let node = Node::read(self.cache, block)?;
        let n = node.numkeys();

        match node.node_type() {
            NodeType::Leaf => match mode {
                DisplayMode::Depth => {
                    write!(out, "{:indent$}{}: Leaf", "", block, indent = depth * 2)?;
                    for i in 0..n {
                        write!(
                            out,
                            " ({},{})",
                            render(node.key_at(i)?),
                            render(node.value_at(i)?)
                        )?;
                    }
                    writeln!(out)?;
                }
                DisplayMode::DepthDot => {
                    write!(out, "  {} [ label=\"{}:", block, block)?;
                    for i in 0..n {
                        write!(out, " {}", render(node.key_at(i)?))?;
                    }
                    writeln!(out, "\" ];")?;
                }
                DisplayMode::SortedKeyval => {
                    for i in 0..n {
                        writeln!(
                            out,
                            "({},{})",
                            render(node.key_at(i)?),
                            render(node.value_at(i)?)
                        )?;
                    }
                }
            },
            NodeType::Root | NodeType::Interior => {
                match mode {
                    DisplayMode::Depth => {
                        write!(out, "{:indent$}{}: Interior", "", block, indent = depth * 2)?;
                        for i in 0..n {
                            write!(out, " *{} {}", node.ptr_at(i)?, render(node.key_at(i)?))?;
                        }
                        if n > 0 {
                            write!(out, " *{}", node.ptr_at(n)?)?;
                        }
                        writeln!(out)?;
                    }
                    DisplayMode::DepthDot => {
                        write!(out, "  {} [ label=\"{}:", block, block)?;
                        for i in 0..n {
                            write!(out, " {}", render(node.key_at(i)?))?;
                        }
                        writeln!(out, "\" ];")?;
                        if n > 0 {
                            for i in 0..=n {
                                writeln!(out, "  {} -> {};", block, node.ptr_at(i)?)?;
                            }
                        }
                    }
                    DisplayMode::SortedKeyval => {}
                }
                if n > 0 {
                    for i in 0..=n {
                        self.display_node(out, node.ptr_at(i)?, depth + 1, mode)?;
                    }
                }
            }
            other => bail!("block {}: {:?} node reachable from the root", block, other),
        }
        Ok(())
    }
}

/// Keys and values are opaque bytes; print them as text when they are
/// printable ASCII and as hex otherwise.
fn render(bytes: &[u8]) -> String {
    if bytes.iter().all(|&b| b.is_ascii_graphic()) {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
