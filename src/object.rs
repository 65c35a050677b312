//! Memory objects: concrete regions, list segments, optional objects and the Null object.

use std::fmt;
use std::sync::Arc;

use crate::types::ObjectId;

/// The kind of a memory object.
///
/// The set of kinds is closed: every kind has its own materialization
/// behaviour, so all dispatch over kinds is an exhaustive `match`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ObjectKind {
    /// The unique Null object.
    Null,
    /// A concrete region of memory.
    Region,
    /// A singly-linked list segment of at least `min_length` nodes.
    Sll { hfo: u64, nfo: u64, min_length: u32 },
    /// A doubly-linked list segment of at least `min_length` nodes.
    Dll { hfo: u64, nfo: u64, pfo: u64, min_length: u32 },
    /// A region that may or may not exist.
    Optional,
}

impl ObjectKind {
    pub fn is_abstract(&self) -> bool {
        matches!(self, ObjectKind::Sll { .. } | ObjectKind::Dll { .. } | ObjectKind::Optional)
    }

    pub fn is_list_segment(&self) -> bool {
        matches!(self, ObjectKind::Sll { .. } | ObjectKind::Dll { .. })
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Null => write!(f, "NULL"),
            ObjectKind::Region => write!(f, "REG"),
            ObjectKind::Sll { hfo, nfo, min_length } => {
                write!(f, "SLL({}+, hfo={}, nfo={})", min_length, hfo, nfo)
            }
            ObjectKind::Dll {
                hfo,
                nfo,
                pfo,
                min_length,
            } => write!(f, "DLL({}+, hfo={}, nfo={}, pfo={})", min_length, hfo, nfo, pfo),
            ObjectKind::Optional => write!(f, "OPT"),
        }
    }
}

/// A typed region of memory with a fixed size in bits.
///
/// Validity is not stored here but in the graph's validity map, so freeing an
/// object does not change its identity.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SmgObject {
    id: ObjectId,
    size: u64,
    label: Arc<str>,
    level: u32,
    kind: ObjectKind,
}

impl SmgObject {
    pub fn new(id: ObjectId, size: u64, label: impl Into<Arc<str>>, level: u32, kind: ObjectKind) -> Self {
        assert!(
            !matches!(kind, ObjectKind::Null) || id.is_null(),
            "Only object #0 may be the Null object"
        );
        Self {
            id,
            size,
            label: label.into(),
            level,
            kind,
        }
    }

    pub fn null() -> Self {
        Self::new(ObjectId::NULL, 0, "NULL", 0, ObjectKind::Null)
    }

    pub fn region(id: ObjectId, size: u64, label: impl Into<Arc<str>>) -> Self {
        Self::new(id, size, label, 0, ObjectKind::Region)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn label_arc(&self) -> Arc<str> {
        self.label.clone()
    }
    pub fn level(&self) -> u32 {
        self.level
    }
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ObjectKind::Null)
    }
    pub fn is_region(&self) -> bool {
        matches!(self.kind, ObjectKind::Region)
    }
    pub fn is_abstract(&self) -> bool {
        self.kind.is_abstract()
    }
    pub fn is_list_segment(&self) -> bool {
        self.kind.is_list_segment()
    }

    /// Minimum number of concrete nodes this object stands for.
    ///
    /// Regions count as one node; optional objects as zero.
    pub fn min_length(&self) -> u32 {
        match self.kind {
            ObjectKind::Null | ObjectKind::Optional => 0,
            ObjectKind::Region => 1,
            ObjectKind::Sll { min_length, .. } | ObjectKind::Dll { min_length, .. } => min_length,
        }
    }

    /// Offset that list pointers target, if this is a list segment.
    pub fn hfo(&self) -> Option<u64> {
        match self.kind {
            ObjectKind::Sll { hfo, .. } | ObjectKind::Dll { hfo, .. } => Some(hfo),
            _ => None,
        }
    }

    /// Offset of the "next" field, if this is a list segment.
    pub fn nfo(&self) -> Option<u64> {
        match self.kind {
            ObjectKind::Sll { nfo, .. } | ObjectKind::Dll { nfo, .. } => Some(nfo),
            _ => None,
        }
    }

    /// Offset of the "previous" field, if this is a doubly-linked segment.
    pub fn pfo(&self) -> Option<u64> {
        match self.kind {
            ObjectKind::Dll { pfo, .. } => Some(pfo),
            _ => None,
        }
    }

    /// Checks whether `offset` is one of the link fields of this segment.
    pub fn is_link_offset(&self, offset: u64) -> bool {
        self.nfo() == Some(offset) || self.pfo() == Some(offset)
    }

    /// Same object with a different identity.
    pub fn with_id(&self, id: ObjectId) -> Self {
        Self { id, ..self.clone() }
    }

    pub fn with_kind(&self, kind: ObjectKind) -> Self {
        Self { kind, ..self.clone() }
    }

    pub fn with_level(&self, level: u32) -> Self {
        Self { level, ..self.clone() }
    }

    /// Same list segment with a different minimum length.
    ///
    /// # Panics
    ///
    /// Panics if the object is not a list segment.
    pub fn with_min_length(&self, length: u32) -> Self {
        let kind = match self.kind {
            ObjectKind::Sll { hfo, nfo, .. } => ObjectKind::Sll {
                hfo,
                nfo,
                min_length: length,
            },
            ObjectKind::Dll { hfo, nfo, pfo, .. } => ObjectKind::Dll {
                hfo,
                nfo,
                pfo,
                min_length: length,
            },
            other => panic!("Object of kind {} has no minimum length", other),
        };
        self.with_kind(kind)
    }

    /// Checks whether two objects may describe the same kind of node.
    ///
    /// Sizes must agree and list segments must use the same link offsets.
    pub fn shape_compatible(&self, other: &SmgObject) -> bool {
        if self.size != other.size {
            return false;
        }
        match (self.kind, other.kind) {
            (ObjectKind::Null, ObjectKind::Null) => true,
            (ObjectKind::Null, _) | (_, ObjectKind::Null) => false,
            (ObjectKind::Region, _) | (_, ObjectKind::Region) => true,
            (ObjectKind::Optional, _) | (_, ObjectKind::Optional) => true,
            (ObjectKind::Sll { hfo: h1, nfo: n1, .. }, ObjectKind::Sll { hfo: h2, nfo: n2, .. }) => h1 == h2 && n1 == n2,
            (
                ObjectKind::Dll {
                    hfo: h1,
                    nfo: n1,
                    pfo: p1,
                    ..
                },
                ObjectKind::Dll {
                    hfo: h2,
                    nfo: n2,
                    pfo: p2,
                    ..
                },
            ) => h1 == h2 && n1 == n2 && p1 == p2,
            (ObjectKind::Sll { .. }, ObjectKind::Dll { .. }) | (ObjectKind::Dll { .. }, ObjectKind::Sll { .. }) => false,
        }
    }
}

impl fmt::Display for SmgObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} {} bits, {}", self.id, self.label, self.size, self.kind)?;
        if self.level > 0 {
            write!(f, ", level {}", self.level)?;
        }
        write!(f, "]")
    }
}
