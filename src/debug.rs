//! Debug utilities for inspecting memory objects.
//!
//! These descriptions are used in violation messages and are handy in tests
//! and during development.

use std::fmt;
use std::sync::Arc;

use crate::memory::LanguageMemory;
use crate::object::ObjectKind;
use crate::types::ObjectId;

/// Where an object lives.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MemoryClass {
    Null,
    Global,
    Stack { function: Arc<str> },
    Heap,
    External,
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryClass::Null => write!(f, "null"),
            MemoryClass::Global => write!(f, "global"),
            MemoryClass::Stack { function } => write!(f, "stack ({})", function),
            MemoryClass::Heap => write!(f, "heap"),
            MemoryClass::External => write!(f, "external"),
        }
    }
}

/// Detailed information about a single object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub label: Arc<str>,
    /// Size in bits
    pub size: u64,
    pub kind: ObjectKind,
    /// Nesting level (0 for top-level objects)
    pub level: u32,
    pub valid: bool,
    pub class: MemoryClass,
    /// Number of has-value edges pointing into the object
    pub incoming: usize,
    /// Shortest access path from a program variable, if reachable
    pub path: Option<String>,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} object `{}` ({}, {} bits, {}{})",
            self.class,
            self.label,
            self.id,
            self.size,
            self.kind,
            if self.valid { "" } else { ", freed" }
        )?;
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        Ok(())
    }
}

impl LanguageMemory {
    /// Get detailed information about a single object.
    pub fn object_info(&self, id: ObjectId) -> Option<ObjectInfo> {
        let object = self.smg().object(id)?;
        let class = if id.is_null() {
            MemoryClass::Null
        } else if self.is_global(id) {
            MemoryClass::Global
        } else if let Some(depth) = self.frame_depth_of(id) {
            let function = self
                .frame(depth)
                .map(|frame| frame.function().name.clone())
                .unwrap_or_else(|| Arc::from("?"));
            MemoryClass::Stack { function }
        } else if self.is_external(id) {
            MemoryClass::External
        } else {
            MemoryClass::Heap
        };
        Some(ObjectInfo {
            id,
            label: object.label_arc(),
            size: object.size(),
            kind: object.kind(),
            level: object.level(),
            valid: self.smg().is_valid(id),
            class,
            incoming: self.smg().incoming_reference_count(id),
            path: self.object_paths().get(&id).map(|p| p.to_string()),
        })
    }

    /// One-line description of an object, or its bare id if it is gone.
    pub fn describe_object(&self, id: ObjectId) -> String {
        self.object_info(id).map_or_else(|| id.to_string(), |info| info.to_string())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::frame::FunctionDecl;
    use crate::object::SmgObject;

    #[test]
    fn test_object_info() {
        let mut memory = LanguageMemory::new();
        memory.add_stack_frame(FunctionDecl::void("main"), None);
        memory
            .add_stack_object(SmgObject::region(ObjectId::new(1), 32, "x"))
            .unwrap();
        memory.add_heap_object(SmgObject::region(ObjectId::new(2), 64, "node"));
        memory.smg_mut().set_validity(ObjectId::new(2), false);

        let x = memory.object_info(ObjectId::new(1)).unwrap();
        assert_eq!(x.class, MemoryClass::Stack { function: "main".into() });
        assert_eq!(x.path.as_deref(), Some("main@0:x"));

        let node = memory.object_info(ObjectId::new(2)).unwrap();
        assert_eq!(node.class, MemoryClass::Heap);
        assert!(!node.valid);
        assert_eq!(node.to_string(), "heap object `node` (#2, 64 bits, REG, freed)");

        assert_eq!(memory.describe_object(ObjectId::new(9)), "#9");
    }
}
