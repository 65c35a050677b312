//! Machine model: sizes and alignments of C types.

use std::fmt;

/// A C type, as far as its memory layout is concerned.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum CType {
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Pointer,
    Array(Box<CType>, u64),
    Struct(Vec<CType>),
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Char => write!(f, "char"),
            CType::Short => write!(f, "short"),
            CType::Int => write!(f, "int"),
            CType::Long => write!(f, "long"),
            CType::LongLong => write!(f, "long long"),
            CType::Pointer => write!(f, "void*"),
            CType::Array(elem, len) => write!(f, "{}[{}]", elem, len),
            CType::Struct(fields) => {
                write!(f, "struct {{")?;
                for field in fields {
                    write!(f, " {};", field)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// Bit sizes of the primitive types of the analyzed platform.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MachineModel {
    pub char_bits: u64,
    pub short_bits: u64,
    pub int_bits: u64,
    pub long_bits: u64,
    pub long_long_bits: u64,
    pub pointer_bits: u64,
}

impl Default for MachineModel {
    fn default() -> Self {
        Self::lp64()
    }
}

impl MachineModel {
    /// 64-bit Linux.
    pub const fn lp64() -> Self {
        Self {
            char_bits: 8,
            short_bits: 16,
            int_bits: 32,
            long_bits: 64,
            long_long_bits: 64,
            pointer_bits: 64,
        }
    }

    /// 32-bit Linux.
    pub const fn ilp32() -> Self {
        Self {
            char_bits: 8,
            short_bits: 16,
            int_bits: 32,
            long_bits: 32,
            long_long_bits: 64,
            pointer_bits: 32,
        }
    }

    pub fn size_of(&self, ty: &CType) -> u64 {
        match ty {
            CType::Char => self.char_bits,
            CType::Short => self.short_bits,
            CType::Int => self.int_bits,
            CType::Long => self.long_bits,
            CType::LongLong => self.long_long_bits,
            CType::Pointer => self.pointer_bits,
            CType::Array(elem, len) => self.size_of(elem) * len,
            CType::Struct(fields) => {
                let mut size = 0;
                for field in fields {
                    size = align_up(size, self.align_of(field)) + self.size_of(field);
                }
                align_up(size, self.align_of(ty))
            }
        }
    }

    pub fn align_of(&self, ty: &CType) -> u64 {
        match ty {
            CType::Array(elem, _) => self.align_of(elem),
            CType::Struct(fields) => fields.iter().map(|f| self.align_of(f)).max().unwrap_or(self.char_bits),
            _ => self.size_of(ty),
        }
    }

    /// Bit offsets of the fields of a struct type.
    pub fn field_offsets(&self, fields: &[CType]) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut size = 0;
        for field in fields {
            let offset = align_up(size, self.align_of(field));
            offsets.push(offset);
            size = offset + self.size_of(field);
        }
        offsets
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_primitive_sizes() {
        let m = MachineModel::lp64();
        assert_eq!(m.size_of(&CType::Int), 32);
        assert_eq!(m.size_of(&CType::Pointer), 64);
        assert_eq!(MachineModel::ilp32().size_of(&CType::Pointer), 32);
    }

    #[test]
    fn test_struct_layout_with_padding() {
        let m = MachineModel::lp64();
        let node = vec![CType::Int, CType::Pointer];
        assert_eq!(m.field_offsets(&node), vec![0, 64]);
        assert_eq!(m.size_of(&CType::Struct(node)), 128);
        let packed = vec![CType::Char, CType::Char, CType::Short];
        assert_eq!(m.field_offsets(&packed), vec![0, 8, 16]);
        assert_eq!(m.size_of(&CType::Struct(packed)), 32);
    }

    #[test]
    fn test_array_size() {
        let m = MachineModel::lp64();
        assert_eq!(m.size_of(&CType::Array(Box::new(CType::Int), 4)), 128);
        assert_eq!(m.align_of(&CType::Array(Box::new(CType::Int), 4)), 32);
    }
}
