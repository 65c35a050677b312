//! Memory paths: naming objects independently of their identifiers.
//!
//! A path starts at a program root (a global, a local variable or a return
//! slot at some call depth) and follows pointer fields by their bit offsets.
//! Paths survive joins and abstraction, which renumber objects, so they are
//! used as keys for blocked abstraction candidates.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PathRoot {
    Global(Arc<str>),
    Local { depth: usize, function: Arc<str>, variable: Arc<str> },
    Return { depth: usize, function: Arc<str> },
}

impl fmt::Display for PathRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRoot::Global(name) => write!(f, "{}", name),
            PathRoot::Local {
                depth,
                function,
                variable,
            } => write!(f, "{}@{}:{}", function, depth, variable),
            PathRoot::Return { depth, function } => write!(f, "{}@{}:return", function, depth),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryPath {
    root: PathRoot,
    offsets: Vec<u64>,
}

impl MemoryPath {
    pub fn new(root: PathRoot) -> Self {
        Self {
            root,
            offsets: Vec::new(),
        }
    }

    pub fn root(&self) -> &PathRoot {
        &self.root
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// The path reached by following the pointer stored at `offset`.
    pub fn child(&self, offset: u64) -> Self {
        let mut offsets = self.offsets.clone();
        offsets.push(offset);
        Self {
            root: self.root.clone(),
            offsets,
        }
    }

    pub fn depth(&self) -> usize {
        self.offsets.len()
    }
}

impl fmt::Display for MemoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for offset in &self.offsets {
            write!(f, "->[{}]", offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_child_paths() {
        let root = MemoryPath::new(PathRoot::Global("list".into()));
        let p = root.child(64).child(0);
        assert_eq!(p.depth(), 2);
        assert_eq!(p.offsets(), &[64, 0]);
        assert_eq!(p.to_string(), "list->[64]->[0]");
        assert!(root < p);
    }
}
