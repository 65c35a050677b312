//! The join traversal.
//!
//! The two input graphs are walked in lockstep from their program variables.
//! Every pair of corresponding input objects gets one destination object;
//! their fields are joined value by value, following pointers to further
//! object pairs. The traversal keeps track of how the inputs relate
//! ([`JoinStatus`]) and gives up as soon as the shapes cannot be reconciled.

use std::collections::{BTreeSet, VecDeque};

use log::debug;
use num_bigint::BigInt;

use crate::abstraction::finder::link_value;
use crate::abstraction::template::field_value;
use crate::context::AnalysisContext;
use crate::edge::{HasValueEdge, PointsToEdge};
use crate::error::Result;
use crate::explicit::ExplicitValues;
use crate::join::mapping::NodeMapping;
use crate::join::status::JoinStatus;
use crate::memory::LanguageMemory;
use crate::object::{ObjectKind, SmgObject};
use crate::state::SmgState;
use crate::types::{ObjectId, TargetSpecifier, ValueId};

/// Which input a one-sided step works on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Side {
    Left,
    Right,
}

impl Side {
    /// Status when this side holds strictly more information.
    fn more_specific(self) -> JoinStatus {
        match self {
            Side::Left => JoinStatus::LeftEntails,
            Side::Right => JoinStatus::RightEntails,
        }
    }
}

/// The output of a defined join.
#[derive(Debug, Clone)]
pub(crate) struct JoinedGraph {
    pub status: JoinStatus,
    pub memory: LanguageMemory,
    pub explicit: ExplicitValues,
}

pub(crate) struct Joiner<'a> {
    left: &'a SmgState,
    right: &'a SmgState,
    ctx: &'a AnalysisContext,
    memory: LanguageMemory,
    explicit: ExplicitValues,
    left_mapping: NodeMapping,
    right_mapping: NodeMapping,
    status: JoinStatus,
    pending: VecDeque<(ObjectId, ObjectId, ObjectId)>,
}

impl<'a> Joiner<'a> {
    pub fn new(left: &'a SmgState, right: &'a SmgState) -> Self {
        Self {
            left,
            right,
            ctx: left.context(),
            memory: LanguageMemory::new(),
            explicit: ExplicitValues::new(),
            left_mapping: NodeMapping::new(),
            right_mapping: NodeMapping::new(),
            status: JoinStatus::Equal,
            pending: VecDeque::new(),
        }
    }

    fn state(&self, side: Side) -> &'a SmgState {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    fn mapping(&self, side: Side) -> &NodeMapping {
        match side {
            Side::Left => &self.left_mapping,
            Side::Right => &self.right_mapping,
        }
    }

    fn mapping_mut(&mut self, side: Side) -> &mut NodeMapping {
        match side {
            Side::Left => &mut self.left_mapping,
            Side::Right => &mut self.right_mapping,
        }
    }

    fn update(&mut self, status: JoinStatus) {
        let updated = self.status.update(status);
        if updated != self.status {
            debug!("join status {} -> {}", self.status, updated);
        }
        self.status = updated;
    }

    /// Runs the join; `None` if the inputs cannot be joined.
    pub fn run(mut self) -> Result<Option<JoinedGraph>> {
        if !self.seed()? {
            debug!("join: variables do not correspond");
            return Ok(None);
        }
        while let Some((o1, o2, d)) = self.pending.pop_front() {
            self.ctx.check_shutdown()?;
            if !self.join_sub_smgs(o1, o2, d)? {
                debug!("join: {} and {} cannot be joined", o1, o2);
                return Ok(None);
            }
        }
        self.join_disequalities();
        Ok(Some(JoinedGraph {
            status: self.status,
            memory: self.memory,
            explicit: self.explicit,
        }))
    }

    /// Relates globals and stack variables of both inputs.
    fn seed(&mut self) -> Result<bool> {
        let (left, right) = (self.left, self.right);
        let (m1, m2) = (left.memory(), right.memory());
        if m1.stack_depth() != m2.stack_depth() {
            return Ok(false);
        }

        let globals1: Vec<(String, ObjectId)> = m1.globals().map(|(n, o)| (n.to_string(), o)).collect();
        if globals1.len() != m2.globals().count() {
            return Ok(false);
        }
        for (name, o1) in globals1 {
            let Some(o2) = m2.global(&name) else {
                return Ok(false);
            };
            let Some(size) = self.root_size(o1, o2) else {
                return Ok(false);
            };
            let d = self.ctx.fresh_object_id();
            self.memory.add_global_object(SmgObject::region(d, size, name.as_str()))?;
            self.relate_objects(o1, o2, d);
        }

        for (f1, f2) in m1.frames().zip(m2.frames()) {
            if f1.function().name != f2.function().name {
                return Ok(false);
            }
            let return_object = match (f1.return_object(), f2.return_object()) {
                (None, None) => None,
                (Some(r1), Some(r2)) => {
                    let Some(size) = self.root_size(r1, r2) else {
                        return Ok(false);
                    };
                    let d = self.ctx.fresh_object_id();
                    self.relate_objects(r1, r2, d);
                    Some(SmgObject::region(d, size, crate::frame::RETURN_OBJECT_LABEL))
                }
                _ => return Ok(false),
            };
            self.memory.add_stack_frame(f1.function().clone(), return_object);
            if f1.variables().count() != f2.variables().count() {
                return Ok(false);
            }
            for (name, o1) in f1.variables() {
                let Some(o2) = f2.variable(name) else {
                    return Ok(false);
                };
                let Some(size) = self.root_size(o1, o2) else {
                    return Ok(false);
                };
                let d = self.ctx.fresh_object_id();
                self.memory.add_stack_object(SmgObject::region(d, size, name.clone()))?;
                self.relate_objects(o1, o2, d);
            }
        }
        Ok(true)
    }

    fn root_size(&self, o1: ObjectId, o2: ObjectId) -> Option<u64> {
        let size1 = self.left.smg().object(o1)?.size();
        let size2 = self.right.smg().object(o2)?.size();
        (size1 == size2).then_some(size1)
    }

    fn relate_objects(&mut self, o1: ObjectId, o2: ObjectId, d: ObjectId) {
        self.left_mapping.map_object(o1, d);
        self.right_mapping.map_object(o2, d);
        self.pending.push_back((o1, o2, d));
    }

    /// Joins the fields of `o1` and `o2` into `d`.
    fn join_sub_smgs(&mut self, o1: ObjectId, o2: ObjectId, d: ObjectId) -> Result<bool> {
        let keys: BTreeSet<(u64, u64)> = self
            .left
            .smg()
            .edges_of(o1)
            .into_iter()
            .chain(self.right.smg().edges_of(o2))
            .map(|e| (e.offset, e.size))
            .collect();
        for (offset, size) in keys {
            let v1 = field_value(self.left, o1, offset, size);
            let v2 = field_value(self.right, o2, offset, size);
            match (v1, v2) {
                (None, None) => {}
                (Some(v), None) | (None, Some(v)) => {
                    let side = if v1.is_some() { Side::Left } else { Side::Right };
                    if self.is_address(side, v) {
                        return Ok(false);
                    }
                    self.update(side.more_specific());
                }
                (Some(v1), Some(v2)) => {
                    let Some(value) = self.join_values(v1, v2)? else {
                        return Ok(false);
                    };
                    self.memory
                        .smg_mut()
                        .add_has_value_edge(HasValueEdge::new(d, offset, size, value));
                }
            }
        }
        Ok(true)
    }

    fn is_address(&self, side: Side, value: ValueId) -> bool {
        self.address_of(side, value).is_some()
    }

    fn address_of(&self, side: Side, value: ValueId) -> Option<PointsToEdge> {
        self.state(side)
            .smg()
            .points_to(value)
            .filter(|pt| !pt.object.is_null())
            .copied()
    }

    fn add_fresh_value(&mut self) -> ValueId {
        let value = self.ctx.fresh_value_id();
        self.memory.smg_mut().add_value(value);
        value
    }

    fn value_for_number(&mut self, number: &BigInt) -> ValueId {
        if let Some(value) = self.explicit.value_of(number) {
            return value;
        }
        let value = self.add_fresh_value();
        self.explicit.put(value, number.clone());
        value
    }

    /// Joins two values found in corresponding fields.
    pub(crate) fn join_values(&mut self, v1: ValueId, v2: ValueId) -> Result<Option<ValueId>> {
        if let (Some(a), Some(b)) = (self.left_mapping.value(v1), self.right_mapping.value(v2)) {
            if a == b {
                return Ok(Some(a));
            }
        }
        match (self.address_of(Side::Left, v1), self.address_of(Side::Right, v2)) {
            (None, None) => Ok(Some(self.join_scalars(v1, v2))),
            (Some(pt1), Some(pt2)) => self.join_pointers(v1, pt1, v2, pt2),
            (Some(pt1), None) => self.insert_one_sided(Side::Left, v1, pt1, v2),
            (None, Some(pt2)) => self.insert_one_sided(Side::Right, v2, pt2, v1),
        }
    }

    fn join_scalars(&mut self, v1: ValueId, v2: ValueId) -> ValueId {
        let (left, right) = (self.left, self.right);
        let n1 = left.explicit_value(v1);
        let n2 = right.explicit_value(v2);
        match (n1, n2) {
            (Some(a), Some(b)) if a == b => {
                let value = self.value_for_number(a);
                self.left_mapping.map_value(v1, value);
                self.right_mapping.map_value(v2, value);
                value
            }
            (Some(_), Some(_)) => {
                self.update(JoinStatus::Incomparable);
                self.add_fresh_value()
            }
            (Some(_), None) => {
                self.update(JoinStatus::LeftEntails);
                let value = self.add_fresh_value();
                if self.right_mapping.value(v2).is_none() {
                    self.right_mapping.map_value(v2, value);
                }
                value
            }
            (None, Some(_)) => {
                self.update(JoinStatus::RightEntails);
                let value = self.add_fresh_value();
                if self.left_mapping.value(v1).is_none() {
                    self.left_mapping.map_value(v1, value);
                }
                value
            }
            (None, None) => {
                let value = self.add_fresh_value();
                match (self.left_mapping.value(v1), self.right_mapping.value(v2)) {
                    (None, None) => {
                        self.left_mapping.map_value(v1, value);
                        self.right_mapping.map_value(v2, value);
                    }
                    (Some(_), None) => {
                        self.update(JoinStatus::LeftEntails);
                        self.right_mapping.map_value(v2, value);
                    }
                    (None, Some(_)) => {
                        self.update(JoinStatus::RightEntails);
                        self.left_mapping.map_value(v1, value);
                    }
                    (Some(_), Some(_)) => self.update(JoinStatus::Incomparable),
                }
                value
            }
        }
    }

    fn join_pointers(&mut self, v1: ValueId, pt1: PointsToEdge, v2: ValueId, pt2: PointsToEdge) -> Result<Option<ValueId>> {
        let specifier = match (pt1.specifier, pt2.specifier) {
            (a, b) if a == b => Some(a),
            (TargetSpecifier::Region, s) | (s, TargetSpecifier::Region)
                if matches!(s, TargetSpecifier::First | TargetSpecifier::Last) =>
            {
                Some(s)
            }
            _ => None,
        };
        let target = match specifier {
            Some(_) if pt1.offset == pt2.offset => self.join_target_objects(pt1.object, pt2.object)?,
            _ => None,
        };
        let (Some(specifier), Some(target)) = (specifier, target) else {
            if self.is_insertable_segment(Side::Left, pt1) {
                return self.insert_one_sided(Side::Left, v1, pt1, v2);
            }
            return self.insert_one_sided(Side::Right, v2, pt2, v1);
        };

        let is_segment = self
            .memory
            .smg()
            .object(target)
            .is_some_and(|o| o.is_list_segment());
        let specifier = match specifier {
            TargetSpecifier::Region if is_segment => TargetSpecifier::First,
            s => s,
        };
        let value = self.pointer_to(target, pt1.offset, specifier);
        for (side, v) in [(Side::Left, v1), (Side::Right, v2)] {
            match self.mapping(side).value(v) {
                Some(existing) if existing != value => return Ok(None),
                _ => self.mapping_mut(side).map_value(v, value),
            }
        }
        Ok(Some(value))
    }

    fn pointer_to(&mut self, object: ObjectId, offset: u64, specifier: TargetSpecifier) -> ValueId {
        if let Some(value) = self.memory.smg().find_pointer(object, offset, specifier) {
            return value;
        }
        let value = self.add_fresh_value();
        self.memory
            .smg_mut()
            .add_points_to_edge(PointsToEdge::new(value, object, offset, specifier));
        value
    }

    /// Joins two pointer targets into one destination object.
    fn join_target_objects(&mut self, o1: ObjectId, o2: ObjectId) -> Result<Option<ObjectId>> {
        match (self.left_mapping.object(o1), self.right_mapping.object(o2)) {
            (Some(a), Some(b)) if a == b => return Ok(Some(a)),
            (None, None) => {}
            _ => return Ok(None),
        }
        let (left, right) = (self.left, self.right);
        let (Some(obj1), Some(obj2)) = (left.smg().object(o1), right.smg().object(o2)) else {
            return Ok(None);
        };
        if obj1.is_null() || obj2.is_null() || obj1.size() != obj2.size() || obj1.level() != obj2.level() {
            return Ok(None);
        }
        let valid = left.smg().is_valid(o1);
        if valid != right.smg().is_valid(o2) {
            return Ok(None);
        }
        let (m1, m2) = (left.memory(), right.memory());
        if !m1.is_heap_object(o1) || !m2.is_heap_object(o2) {
            return Ok(None);
        }
        let Some((kind, status)) = join_kinds(obj1, obj2) else {
            return Ok(None);
        };
        self.update(status);

        let d = self.ctx.fresh_object_id();
        let object = SmgObject::new(d, obj1.size(), obj1.label_arc(), obj1.level(), kind);
        debug!("join_target_objects({}, {}) -> {}", o1, o2, object);
        self.memory.add_heap_object(object);
        if m1.is_external(o1) || m2.is_external(o2) {
            self.memory.set_external(d, true);
        }
        self.memory.smg_mut().set_validity(d, valid);
        self.relate_objects(o1, o2, d);
        Ok(Some(d))
    }

    fn is_insertable_segment(&self, side: Side, pt: PointsToEdge) -> bool {
        self.state(side)
            .smg()
            .object(pt.object)
            .is_some_and(|o| o.is_list_segment() && o.min_length() == 0)
            && pt.specifier == TargetSpecifier::First
            && self.mapping(side).object(pt.object).is_none()
    }

    /// Handles a pointer on `side` that has no pointer counterpart.
    ///
    /// A possibly empty list segment is copied and its successor joined with
    /// the other value; a pointer-free region opposite the null pointer
    /// becomes an optional object.
    fn insert_one_sided(&mut self, side: Side, value: ValueId, pt: PointsToEdge, other: ValueId) -> Result<Option<ValueId>> {
        let state = self.state(side);
        let Some(object) = state.smg().object(pt.object).cloned() else {
            return Ok(None);
        };
        if self.mapping(side).object(pt.object).is_some() || self.mapping(side).value(value).is_some() {
            return Ok(None);
        }
        let other_side = match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        };

        if self.is_insertable_segment(side, pt) {
            let Some(nfo) = object.nfo() else {
                return Ok(None);
            };
            let Some(next) = link_value(state, pt.object, nfo) else {
                return Ok(None);
            };
            let d = self.copy_shallow(side, &object, object.kind());
            let joined_next = match side {
                Side::Left => self.join_values(next, other)?,
                Side::Right => self.join_values(other, next)?,
            };
            let Some(joined_next) = joined_next else {
                return Ok(None);
            };
            let pointer_size = self.ctx.machine().pointer_bits;
            self.memory
                .smg_mut()
                .add_has_value_edge(HasValueEdge::new(d, nfo, pointer_size, joined_next));
            debug!("join: inserted 0+ segment {} for {}", d, pt.object);
            self.update(other_side.more_specific());
            let pointer = self.pointer_to(d, pt.offset, TargetSpecifier::First);
            self.mapping_mut(side).map_value(value, pointer);
            return Ok(Some(pointer));
        }

        let pointer_free = state.smg().edges_of(pt.object).iter().all(|e| !self.is_address(side, e.value));
        let optional_candidate = matches!(object.kind(), ObjectKind::Region | ObjectKind::Optional)
            && state.memory().is_heap_object(pt.object)
            && state.smg().is_valid(pt.object)
            && pointer_free;
        if other.is_zero() && optional_candidate && pt.offset == 0 {
            let d = self.copy_shallow(side, &object, ObjectKind::Optional);
            debug!("join: inserted optional {} for {}", d, pt.object);
            // A definite region turned optional covers neither input exactly.
            if object.kind() == ObjectKind::Optional {
                self.update(other_side.more_specific());
            } else {
                self.update(JoinStatus::Incomparable);
            }
            let pointer = self.pointer_to(d, 0, TargetSpecifier::Region);
            self.mapping_mut(side).map_value(value, pointer);
            return Ok(Some(pointer));
        }
        Ok(None)
    }

    /// Creates a destination copy of a one-sided object, keeping only zero fields.
    fn copy_shallow(&mut self, side: Side, object: &SmgObject, kind: ObjectKind) -> ObjectId {
        let d = self.ctx.fresh_object_id();
        let copy = SmgObject::new(d, object.size(), object.label_arc(), object.level(), kind);
        self.memory.add_heap_object(copy);
        self.mapping_mut(side).map_object(object.id(), d);
        let state = self.state(side);
        for edge in state.smg().edges_of(object.id()) {
            if edge.is_zero() && !object.is_link_offset(edge.offset) {
                self.memory
                    .smg_mut()
                    .add_has_value_edge(HasValueEdge::new(d, edge.offset, edge.size, ValueId::ZERO));
            }
        }
        d
    }

    /// Keeps the disequalities that hold in both inputs.
    fn join_disequalities(&mut self) {
        let mapped = |state: &SmgState, mapping: &NodeMapping| -> BTreeSet<(ValueId, ValueId)> {
            state
                .smg()
                .neq_pairs()
                .into_iter()
                .filter_map(|(a, b)| {
                    let (a, b) = (mapping.value(a)?, mapping.value(b)?);
                    (a != b).then_some((a.min(b), a.max(b)))
                })
                .collect()
        };
        let left = mapped(self.left, &self.left_mapping);
        let right = mapped(self.right, &self.right_mapping);
        for &(a, b) in left.intersection(&right) {
            self.memory.smg_mut().add_neq(a, b);
        }
        if left.difference(&right).next().is_some() {
            self.update(JoinStatus::LeftEntails);
        }
        if right.difference(&left).next().is_some() {
            self.update(JoinStatus::RightEntails);
        }
    }
}

fn covered_by(covered: bool, status: JoinStatus) -> JoinStatus {
    if covered {
        status
    } else {
        JoinStatus::Incomparable
    }
}

/// The kind of the joined object and how the inputs relate.
fn join_kinds(obj1: &SmgObject, obj2: &SmgObject) -> Option<(ObjectKind, JoinStatus)> {
    use ObjectKind::*;
    let by_length = |m1: u32, m2: u32| match m1.cmp(&m2) {
        std::cmp::Ordering::Equal => JoinStatus::Equal,
        std::cmp::Ordering::Less => JoinStatus::RightEntails,
        std::cmp::Ordering::Greater => JoinStatus::LeftEntails,
    };
    match (obj1.kind(), obj2.kind()) {
        (Region, Region) => Some((Region, JoinStatus::Equal)),
        (Optional, Optional) => Some((Optional, JoinStatus::Equal)),
        (Optional, Region) => Some((Optional, JoinStatus::RightEntails)),
        (Region, Optional) => Some((Optional, JoinStatus::LeftEntails)),
        (Sll { .. }, Sll { .. }) | (Dll { .. }, Dll { .. }) if obj1.shape_compatible(obj2) => {
            let (m1, m2) = (obj1.min_length(), obj2.min_length());
            Some((obj1.with_min_length(m1.min(m2)).kind(), by_length(m1, m2)))
        }
        // A single node is covered by a segment only if its minimum length is at most one.
        (Region, Sll { .. } | Dll { .. }) => {
            let status = covered_by(obj2.min_length() <= 1, JoinStatus::LeftEntails);
            Some((obj2.with_min_length(obj2.min_length().min(1)).kind(), status))
        }
        (Sll { .. } | Dll { .. }, Region) => {
            let status = covered_by(obj1.min_length() <= 1, JoinStatus::RightEntails);
            Some((obj1.with_min_length(obj1.min_length().min(1)).kind(), status))
        }
        // An optional object stands for zero or one node.
        (Optional, Sll { .. } | Dll { .. }) => {
            let status = covered_by(obj2.min_length() == 0, JoinStatus::LeftEntails);
            Some((obj2.with_min_length(0).kind(), status))
        }
        (Sll { .. } | Dll { .. }, Optional) => {
            let status = covered_by(obj1.min_length() == 0, JoinStatus::RightEntails);
            Some((obj1.with_min_length(0).kind(), status))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::types::ObjectId;

    fn sll(len: u32) -> SmgObject {
        SmgObject::new(
            ObjectId::new(5),
            128,
            "n",
            0,
            ObjectKind::Sll {
                hfo: 0,
                nfo: 64,
                min_length: len,
            },
        )
    }

    #[test]
    fn test_join_kinds() {
        let region = SmgObject::region(ObjectId::new(1), 128, "r");
        let (kind, status) = join_kinds(&region, &region).unwrap();
        assert_eq!((kind, status), (ObjectKind::Region, JoinStatus::Equal));

        let (kind, status) = join_kinds(&sll(2), &sll(4)).unwrap();
        assert_eq!(status, JoinStatus::RightEntails);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 2, .. }));

        let (kind, status) = join_kinds(&region, &sll(3)).unwrap();
        assert_eq!(status, JoinStatus::Incomparable);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 1, .. }));
        let (_, status) = join_kinds(&sll(3), &region).unwrap();
        assert_eq!(status, JoinStatus::Incomparable);

        let (kind, status) = join_kinds(&region, &sll(1)).unwrap();
        assert_eq!(status, JoinStatus::LeftEntails);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 1, .. }));

        let (kind, status) = join_kinds(&sll(0), &region).unwrap();
        assert_eq!(status, JoinStatus::RightEntails);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 0, .. }));
    }

    #[test]
    fn test_join_kinds_optional_with_segment() {
        let optional = SmgObject::region(ObjectId::new(2), 128, "o").with_kind(ObjectKind::Optional);

        let (kind, status) = join_kinds(&optional, &sll(0)).unwrap();
        assert_eq!(status, JoinStatus::LeftEntails);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 0, .. }));

        let (kind, status) = join_kinds(&sll(0), &optional).unwrap();
        assert_eq!(status, JoinStatus::RightEntails);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 0, .. }));

        let (kind, status) = join_kinds(&optional, &sll(2)).unwrap();
        assert_eq!(status, JoinStatus::Incomparable);
        assert!(matches!(kind, ObjectKind::Sll { min_length: 0, .. }));
    }
}
