//! Has-value and points-to edges.

use std::fmt;

use crate::types::{ObjectId, TargetSpecifier, ValueId};

/// "Object holds `value` in `size` bits starting at bit `offset`."
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HasValueEdge {
    pub object: ObjectId,
    pub offset: u64,
    pub size: u64,
    pub value: ValueId,
}

impl HasValueEdge {
    pub const fn new(object: ObjectId, offset: u64, size: u64, value: ValueId) -> Self {
        Self {
            object,
            offset,
            size,
            value,
        }
    }

    /// First bit after the edge.
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub const fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Checks whether the bit range of this edge intersects `[offset, offset + size)`.
    pub const fn overlaps(&self, offset: u64, size: u64) -> bool {
        self.offset < offset + size && offset < self.end()
    }

    /// Checks whether this edge fully covers `[offset, offset + size)`.
    pub const fn covers(&self, offset: u64, size: u64) -> bool {
        self.offset <= offset && offset + size <= self.end()
    }

    pub fn with_value(&self, value: ValueId) -> Self {
        Self { value, ..*self }
    }

    pub fn with_object(&self, object: ObjectId) -> Self {
        Self { object, ..*self }
    }
}

impl fmt::Display for HasValueEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{}) -> {}", self.object, self.offset, self.end(), self.value)
    }
}

/// "Value is a pointer to `object` at bit `offset`."
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PointsToEdge {
    pub value: ValueId,
    pub object: ObjectId,
    pub offset: u64,
    pub specifier: TargetSpecifier,
}

impl PointsToEdge {
    pub const fn new(value: ValueId, object: ObjectId, offset: u64, specifier: TargetSpecifier) -> Self {
        Self {
            value,
            object,
            offset,
            specifier,
        }
    }

    pub fn with_target(&self, object: ObjectId, specifier: TargetSpecifier) -> Self {
        Self {
            object,
            specifier,
            ..*self
        }
    }

    pub fn with_value(&self, value: ValueId) -> Self {
        Self { value, ..*self }
    }
}

impl fmt::Display for PointsToEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}+{} ({})", self.value, self.object, self.offset, self.specifier)
    }
}

/// Selection of has-value edges by any combination of their components.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct HasValueFilter {
    object: Option<ObjectId>,
    offset: Option<u64>,
    size: Option<u64>,
    value: Option<ValueId>,
    excluded_value: Option<ValueId>,
}

impl HasValueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(object: ObjectId) -> Self {
        Self::new().with_object(object)
    }

    pub fn with_object(self, object: ObjectId) -> Self {
        Self {
            object: Some(object),
            ..self
        }
    }

    pub fn with_offset(self, offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..self
        }
    }

    pub fn with_size(self, size: u64) -> Self {
        Self { size: Some(size), ..self }
    }

    pub fn with_value(self, value: ValueId) -> Self {
        Self {
            value: Some(value),
            ..self
        }
    }

    pub fn without_value(self, value: ValueId) -> Self {
        Self {
            excluded_value: Some(value),
            ..self
        }
    }

    pub fn target_object(&self) -> Option<ObjectId> {
        self.object
    }

    pub fn matches(&self, edge: &HasValueEdge) -> bool {
        self.object.map_or(true, |o| o == edge.object)
            && self.offset.map_or(true, |o| o == edge.offset)
            && self.size.map_or(true, |s| s == edge.size)
            && self.value.map_or(true, |v| v == edge.value)
            && self.excluded_value.map_or(true, |v| v != edge.value)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_overlaps() {
        let e = HasValueEdge::new(ObjectId::new(1), 32, 32, ValueId::new(2));
        assert!(e.overlaps(0, 64));
        assert!(e.overlaps(40, 8));
        assert!(!e.overlaps(0, 32));
        assert!(!e.overlaps(64, 8));
    }

    #[test]
    fn test_covers() {
        let e = HasValueEdge::new(ObjectId::new(1), 0, 64, ValueId::ZERO);
        assert!(e.covers(0, 64));
        assert!(e.covers(8, 8));
        assert!(!e.covers(56, 16));
    }

    #[test]
    fn test_filter() {
        let o = ObjectId::new(1);
        let e = HasValueEdge::new(o, 0, 64, ValueId::new(3));
        assert!(HasValueFilter::object(o).matches(&e));
        assert!(HasValueFilter::object(o).with_offset(0).with_size(64).matches(&e));
        assert!(!HasValueFilter::object(o).with_offset(8).matches(&e));
        assert!(!HasValueFilter::new().without_value(ValueId::new(3)).matches(&e));
        assert!(HasValueFilter::new().with_value(ValueId::new(3)).matches(&e));
    }
}
