//! Intersection of two states: the memory both of them describe.
//!
//! Where join generalizes, intersection demands agreement: every pointer must
//! face a pointer to corresponding targets and known numbers must coincide.
//! Information present on only one side is kept.

use std::collections::{BTreeSet, VecDeque};

use log::debug;
use num_bigint::BigInt;

use crate::abstraction::template::field_value;
use crate::context::AnalysisContext;
use crate::edge::{HasValueEdge, PointsToEdge};
use crate::error::Result;
use crate::explicit::ExplicitValues;
use crate::frame::RETURN_OBJECT_LABEL;
use crate::join::mapping::NodeMapping;
use crate::memory::LanguageMemory;
use crate::object::{ObjectKind, SmgObject};
use crate::state::SmgState;
use crate::types::{ObjectId, ValueId};

struct Intersector<'a> {
    left: &'a SmgState,
    right: &'a SmgState,
    ctx: &'a AnalysisContext,
    memory: LanguageMemory,
    explicit: ExplicitValues,
    left_mapping: NodeMapping,
    right_mapping: NodeMapping,
    pending: VecDeque<(ObjectId, ObjectId, ObjectId)>,
}

impl<'a> Intersector<'a> {
    fn new(left: &'a SmgState, right: &'a SmgState) -> Self {
        Self {
            left,
            right,
            ctx: left.context(),
            memory: LanguageMemory::new(),
            explicit: ExplicitValues::new(),
            left_mapping: NodeMapping::new(),
            right_mapping: NodeMapping::new(),
            pending: VecDeque::new(),
        }
    }

    fn run(mut self) -> Result<Option<(LanguageMemory, ExplicitValues)>> {
        if !self.seed()? {
            return Ok(None);
        }
        while let Some((o1, o2, d)) = self.pending.pop_front() {
            self.ctx.check_shutdown()?;
            if !self.intersect_objects(o1, o2, d)? {
                debug!("intersect: {} and {} disagree", o1, o2);
                return Ok(None);
            }
        }
        if !self.intersect_disequalities() {
            return Ok(None);
        }
        Ok(Some((self.memory, self.explicit)))
    }

    fn seed(&mut self) -> Result<bool> {
        let (left, right) = (self.left, self.right);
        let (m1, m2) = (left.memory(), right.memory());
        if m1.stack_depth() != m2.stack_depth() || m1.globals().count() != m2.globals().count() {
            return Ok(false);
        }
        for (name, o1) in m1.globals() {
            let Some(o2) = m2.global(name) else {
                return Ok(false);
            };
            let Some(size) = self.same_size(o1, o2) else {
                return Ok(false);
            };
            let d = self.ctx.fresh_object_id();
            self.memory.add_global_object(SmgObject::region(d, size, name.clone()))?;
            self.relate(o1, o2, d);
        }
        for (f1, f2) in m1.frames().zip(m2.frames()) {
            if f1.function().name != f2.function().name || f1.variables().count() != f2.variables().count() {
                return Ok(false);
            }
            let return_object = match (f1.return_object(), f2.return_object()) {
                (None, None) => None,
                (Some(r1), Some(r2)) => {
                    let Some(size) = self.same_size(r1, r2) else {
                        return Ok(false);
                    };
                    let d = self.ctx.fresh_object_id();
                    self.relate(r1, r2, d);
                    Some(SmgObject::region(d, size, RETURN_OBJECT_LABEL))
                }
                _ => return Ok(false),
            };
            self.memory.add_stack_frame(f1.function().clone(), return_object);
            for (name, o1) in f1.variables() {
                let Some(o2) = f2.variable(name) else {
                    return Ok(false);
                };
                let Some(size) = self.same_size(o1, o2) else {
                    return Ok(false);
                };
                let d = self.ctx.fresh_object_id();
                self.memory.add_stack_object(SmgObject::region(d, size, name.clone()))?;
                self.relate(o1, o2, d);
            }
        }
        Ok(true)
    }

    fn same_size(&self, o1: ObjectId, o2: ObjectId) -> Option<u64> {
        let size = self.left.smg().object(o1)?.size();
        (self.right.smg().object(o2)?.size() == size).then_some(size)
    }

    fn relate(&mut self, o1: ObjectId, o2: ObjectId, d: ObjectId) {
        self.left_mapping.map_object(o1, d);
        self.right_mapping.map_object(o2, d);
        self.pending.push_back((o1, o2, d));
    }

    fn intersect_objects(&mut self, o1: ObjectId, o2: ObjectId, d: ObjectId) -> Result<bool> {
        let (left, right) = (self.left, self.right);
        let keys: BTreeSet<(u64, u64)> = left
            .smg()
            .edges_of(o1)
            .into_iter()
            .chain(right.smg().edges_of(o2))
            .map(|e| (e.offset, e.size))
            .collect();
        for (offset, size) in keys {
            let value = match (field_value(left, o1, offset, size), field_value(right, o2, offset, size)) {
                (None, None) => continue,
                (Some(v1), Some(v2)) => self.intersect_values(v1, v2)?,
                (Some(v), None) => self.one_sided_scalar(true, v),
                (None, Some(v)) => self.one_sided_scalar(false, v),
            };
            let Some(value) = value else {
                return Ok(false);
            };
            self.memory
                .smg_mut()
                .add_has_value_edge(HasValueEdge::new(d, offset, size, value));
        }
        Ok(true)
    }

    fn is_address(state: &SmgState, value: ValueId) -> bool {
        state.smg().points_to(value).is_some_and(|pt| !pt.object.is_null())
    }

    fn fresh_value(&mut self) -> ValueId {
        let value = self.ctx.fresh_value_id();
        self.memory.smg_mut().add_value(value);
        value
    }

    /// Finds or creates the destination value for a scalar, honouring both
    /// existing correspondences and a known number.
    fn scalar(&mut self, mapped: [Option<ValueId>; 2], number: Option<&BigInt>) -> Option<ValueId> {
        let mapped = match mapped {
            [Some(a), Some(b)] if a != b => return None,
            [a, b] => a.or(b),
        };
        match (mapped, number) {
            (Some(value), None) => Some(value),
            (Some(value), Some(number)) => match self.explicit.get(value) {
                Some(known) => (known == number).then_some(value),
                None if self.explicit.value_of(number).is_none() => {
                    self.explicit.put(value, number.clone());
                    Some(value)
                }
                None => None,
            },
            (None, Some(number)) => Some(match self.explicit.value_of(number) {
                Some(value) => value,
                None => {
                    let value = self.fresh_value();
                    self.explicit.put(value, number.clone());
                    value
                }
            }),
            (None, None) => Some(self.fresh_value()),
        }
    }

    fn one_sided_scalar(&mut self, left_side: bool, v: ValueId) -> Option<ValueId> {
        let state = if left_side { self.left } else { self.right };
        if Self::is_address(state, v) {
            return None;
        }
        let mapping = if left_side { &self.left_mapping } else { &self.right_mapping };
        let value = self.scalar([mapping.value(v), None], state.explicit_value(v))?;
        let mapping = if left_side { &mut self.left_mapping } else { &mut self.right_mapping };
        mapping.map_value(v, value);
        Some(value)
    }

    fn intersect_values(&mut self, v1: ValueId, v2: ValueId) -> Result<Option<ValueId>> {
        let (left, right) = (self.left, self.right);
        let mapped = [self.left_mapping.value(v1), self.right_mapping.value(v2)];
        let value = match (left.smg().points_to(v1), right.smg().points_to(v2)) {
            (Some(pt1), Some(pt2)) if !pt1.object.is_null() || !pt2.object.is_null() => {
                if pt1.offset != pt2.offset || pt1.specifier != pt2.specifier {
                    return Ok(None);
                }
                let Some(target) = self.intersect_targets(pt1.object, pt2.object)? else {
                    return Ok(None);
                };
                let pointer = match self.memory.smg().find_pointer(target, pt1.offset, pt1.specifier) {
                    Some(pointer) => pointer,
                    None => {
                        let pointer = self.fresh_value();
                        self.memory.smg_mut().add_points_to_edge(PointsToEdge::new(
                            pointer,
                            target,
                            pt1.offset,
                            pt1.specifier,
                        ));
                        pointer
                    }
                };
                if mapped.iter().flatten().any(|&m| m != pointer) {
                    return Ok(None);
                }
                pointer
            }
            _ if Self::is_address(left, v1) || Self::is_address(right, v2) => return Ok(None),
            _ => {
                let number = match (left.explicit_value(v1), right.explicit_value(v2)) {
                    (Some(a), Some(b)) if a != b => return Ok(None),
                    (a, b) => a.or(b),
                };
                let Some(value) = self.scalar(mapped, number) else {
                    return Ok(None);
                };
                value
            }
        };
        self.left_mapping.map_value(v1, value);
        self.right_mapping.map_value(v2, value);
        Ok(Some(value))
    }

    fn intersect_targets(&mut self, o1: ObjectId, o2: ObjectId) -> Result<Option<ObjectId>> {
        match (self.left_mapping.object(o1), self.right_mapping.object(o2)) {
            (Some(a), Some(b)) => return Ok((a == b).then_some(a)),
            (None, None) => {}
            _ => return Ok(None),
        }
        let (left, right) = (self.left, self.right);
        let (Some(obj1), Some(obj2)) = (left.smg().object(o1), right.smg().object(o2)) else {
            return Ok(None);
        };
        if obj1.size() != obj2.size()
            || obj1.level() != obj2.level()
            || left.smg().is_valid(o1) != right.smg().is_valid(o2)
            || !left.memory().is_heap_object(o1)
            || !right.memory().is_heap_object(o2)
        {
            return Ok(None);
        }
        let kind = match (obj1.kind(), obj2.kind()) {
            (ObjectKind::Region, ObjectKind::Region) | (ObjectKind::Optional, ObjectKind::Optional) => obj1.kind(),
            (ObjectKind::Sll { .. }, ObjectKind::Sll { .. }) | (ObjectKind::Dll { .. }, ObjectKind::Dll { .. })
                if obj1.shape_compatible(obj2) =>
            {
                obj1.with_min_length(obj1.min_length().max(obj2.min_length())).kind()
            }
            _ => return Ok(None),
        };
        let d = self.ctx.fresh_object_id();
        self.memory
            .add_heap_object(SmgObject::new(d, obj1.size(), obj1.label_arc(), obj1.level(), kind));
        self.memory.smg_mut().set_validity(d, left.smg().is_valid(o1));
        if left.memory().is_external(o1) && right.memory().is_external(o2) {
            self.memory.set_external(d, true);
        }
        self.relate(o1, o2, d);
        Ok(Some(d))
    }

    /// Adds the disequalities of both inputs; fails if one relates a value to itself.
    fn intersect_disequalities(&mut self) -> bool {
        let inputs = [(self.left, &self.left_mapping), (self.right, &self.right_mapping)];
        let mut pairs = BTreeSet::new();
        for (state, mapping) in inputs {
            for (a, b) in state.smg().neq_pairs() {
                if let (Some(a), Some(b)) = (mapping.value(a), mapping.value(b)) {
                    if a == b {
                        return false;
                    }
                    pairs.insert((a.min(b), a.max(b)));
                }
            }
        }
        for (a, b) in pairs {
            self.memory.smg_mut().add_neq(a, b);
        }
        true
    }
}

impl SmgState {
    /// The state describing the memory described by both `self` and `other`.
    ///
    /// Returns `None` if the two states contradict each other.
    pub fn intersect(&self, other: &SmgState) -> Result<Option<SmgState>> {
        let Some((memory, explicit)) = Intersector::new(self, other).run()? else {
            return Ok(None);
        };
        let errors = self.errors().merge(other.errors());
        let state = SmgState::from_parts(self.context().clone(), memory, explicit, errors).finish()?;
        debug!("intersect({}, {}) = {}", self.id(), other.id(), state.id());
        Ok(Some(state))
    }
}
