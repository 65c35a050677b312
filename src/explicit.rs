//! Explicit (concrete integer) values attached to symbolic values.
//!
//! The mapping is a bijection: a symbolic value has at most one integer, and
//! an integer belongs to at most one symbolic value. The Zero value always
//! owns `0`.

use im::OrdMap;
use log::debug;
use num_bigint::BigInt;
use num_traits::{One, Zero};

use crate::types::ValueId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitValues {
    by_value: OrdMap<ValueId, BigInt>,
    by_number: OrdMap<BigInt, ValueId>,
}

impl Default for ExplicitValues {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplicitValues {
    pub fn new() -> Self {
        let mut by_value = OrdMap::new();
        let mut by_number = OrdMap::new();
        by_value.insert(ValueId::ZERO, BigInt::zero());
        by_number.insert(BigInt::zero(), ValueId::ZERO);
        Self { by_value, by_number }
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    pub fn get(&self, value: ValueId) -> Option<&BigInt> {
        self.by_value.get(&value)
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.by_value.contains_key(&value)
    }

    /// The symbolic value owning `number`, if any.
    pub fn value_of(&self, number: &BigInt) -> Option<ValueId> {
        self.by_number.get(number).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &BigInt)> {
        self.by_value.iter().map(|(v, n)| (*v, n))
    }

    /// Assigns `number` to `value`.
    ///
    /// Returns the value that already owned `number`, if it is different from
    /// `value`. In that case the mapping is left untouched and the caller must
    /// identify both values first.
    pub fn put(&mut self, value: ValueId, number: BigInt) -> Option<ValueId> {
        if let Some(&owner) = self.by_number.get(&number) {
            if owner != value {
                debug!("explicit {} already owned by {} (requested for {})", number, owner, value);
                return Some(owner);
            }
            return None;
        }
        assert!(
            !value.is_zero() || number.is_zero(),
            "The Zero value must stay mapped to 0"
        );
        if let Some(old) = self.by_value.insert(value, number.clone()) {
            self.by_number.remove(&old);
        }
        self.by_number.insert(number, value);
        None
    }

    pub fn remove(&mut self, value: ValueId) {
        if value.is_zero() {
            return;
        }
        if let Some(number) = self.by_value.remove(&value) {
            self.by_number.remove(&number);
        }
    }

    /// Transfers the explicit value of `removed` to `kept` after the two
    /// values have been identified.
    pub fn merge(&mut self, kept: ValueId, removed: ValueId) {
        if let Some(number) = self.by_value.remove(&removed) {
            self.by_number.remove(&number);
            if !self.by_value.contains_key(&kept) {
                self.by_value.insert(kept, number.clone());
                self.by_number.insert(number, kept);
            }
        }
    }

    /// Keeps only the mappings of values accepted by `keep` (Zero always stays).
    pub fn retain(&mut self, mut keep: impl FnMut(ValueId) -> bool) {
        let removed: Vec<ValueId> = self
            .by_value
            .keys()
            .copied()
            .filter(|&v| !v.is_zero() && !keep(v))
            .collect();
        for v in removed {
            self.remove(v);
        }
    }
}

/// Bit mask with the lowest `bits` bits set.
pub fn mask(bits: u64) -> BigInt {
    (BigInt::one() << bits) - BigInt::one()
}

/// Wraps `number` into an unsigned `bits`-wide integer.
pub fn wrap_unsigned(number: &BigInt, bits: u64) -> BigInt {
    if bits == 0 {
        return BigInt::zero();
    }
    let m = BigInt::one() << bits;
    let r = number % &m;
    if r < BigInt::zero() {
        r + m
    } else {
        r
    }
}

/// Wraps `number` into a signed two's-complement `bits`-wide integer.
pub fn wrap_signed(number: &BigInt, bits: u64) -> BigInt {
    if bits == 0 {
        return BigInt::zero();
    }
    let u = wrap_unsigned(number, bits);
    let half = BigInt::one() << (bits - 1);
    if u >= half {
        u - (BigInt::one() << bits)
    } else {
        u
    }
}

/// Extracts `size` bits starting at bit `shift` of `number` (little-endian).
pub fn extract_bits(number: &BigInt, shift: u64, size: u64) -> BigInt {
    let unsigned = wrap_unsigned(number, shift + size);
    (unsigned >> shift) & mask(size)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_zero_is_preset() {
        let ev = ExplicitValues::new();
        assert_eq!(ev.get(ValueId::ZERO), Some(&BigInt::zero()));
        assert_eq!(ev.value_of(&BigInt::zero()), Some(ValueId::ZERO));
    }

    #[test]
    fn test_put_is_bijective() {
        let mut ev = ExplicitValues::new();
        let a = ValueId::new(1);
        let b = ValueId::new(2);
        assert_eq!(ev.put(a, BigInt::from(5)), None);
        assert_eq!(ev.put(b, BigInt::from(5)), Some(a));
        assert_eq!(ev.get(b), None);
        assert_eq!(ev.put(b, BigInt::zero()), Some(ValueId::ZERO));
    }

    #[test]
    fn test_reassign_drops_old_number() {
        let mut ev = ExplicitValues::new();
        let a = ValueId::new(1);
        ev.put(a, BigInt::from(5));
        ev.put(a, BigInt::from(6));
        assert_eq!(ev.value_of(&BigInt::from(5)), None);
        assert_eq!(ev.value_of(&BigInt::from(6)), Some(a));
    }

    #[test]
    fn test_merge_moves_number() {
        let mut ev = ExplicitValues::new();
        let a = ValueId::new(1);
        let b = ValueId::new(2);
        ev.put(b, BigInt::from(7));
        ev.merge(a, b);
        assert_eq!(ev.get(a), Some(&BigInt::from(7)));
        assert_eq!(ev.get(b), None);
    }

    #[test]
    fn test_retain_keeps_zero() {
        let mut ev = ExplicitValues::new();
        ev.put(ValueId::new(1), BigInt::from(1));
        ev.retain(|_| false);
        assert_eq!(ev.len(), 1);
        assert!(ev.contains(ValueId::ZERO));
    }

    #[test]
    fn test_bit_helpers() {
        assert_eq!(wrap_unsigned(&BigInt::from(-1), 8), BigInt::from(255));
        assert_eq!(wrap_signed(&BigInt::from(255), 8), BigInt::from(-1));
        assert_eq!(wrap_signed(&BigInt::from(127), 8), BigInt::from(127));
        assert_eq!(extract_bits(&BigInt::from(0x1234), 8, 8), BigInt::from(0x12));
        assert_eq!(extract_bits(&BigInt::from(0x1234), 0, 8), BigInt::from(0x34));
        assert_eq!(extract_bits(&BigInt::from(-1), 0, 16), BigInt::from(0xffff));
    }
}
