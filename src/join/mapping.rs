//! Correspondence between the elements of an input graph and the joined graph.

use std::collections::BTreeMap;

use crate::types::{ObjectId, ValueId};

/// Maps objects and values of one input to the destination graph.
#[derive(Debug, Clone, Default)]
pub struct NodeMapping {
    objects: BTreeMap<ObjectId, ObjectId>,
    values: BTreeMap<ValueId, ValueId>,
}

impl NodeMapping {
    /// A mapping relating the Null object and the Zero value to themselves.
    pub fn new() -> Self {
        let mut mapping = Self::default();
        mapping.objects.insert(ObjectId::NULL, ObjectId::NULL);
        mapping.values.insert(ValueId::ZERO, ValueId::ZERO);
        mapping
    }

    pub fn object(&self, object: ObjectId) -> Option<ObjectId> {
        self.objects.get(&object).copied()
    }

    pub fn value(&self, value: ValueId) -> Option<ValueId> {
        self.values.get(&value).copied()
    }

    pub fn map_object(&mut self, from: ObjectId, to: ObjectId) {
        self.objects.insert(from, to);
    }

    pub fn map_value(&mut self, from: ValueId, to: ValueId) {
        self.values.insert(from, to);
    }

    pub fn values(&self) -> impl Iterator<Item = (ValueId, ValueId)> + '_ {
        self.values.iter().map(|(a, b)| (*a, *b))
    }

    /// Checks whether some input object is mapped to `target`.
    pub fn has_object_target(&self, target: ObjectId) -> bool {
        self.objects.values().any(|&o| o == target)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_reserved_elements_premapped() {
        let m = NodeMapping::new();
        assert_eq!(m.object(ObjectId::NULL), Some(ObjectId::NULL));
        assert_eq!(m.value(ValueId::ZERO), Some(ValueId::ZERO));
        assert_eq!(m.value(ValueId::new(3)), None);
    }
}
