//! The type table.
//!
//! Types are integer handles ([`TypeId`]) into a table owned by the
//! analyzer. Primitive integer and derived pointer/array types are interned
//! so equality after alias-stripping is handle equality; records and
//! interfaces are nominal and every declaration mints a fresh handle.

use cowc_util::{Interner, Name};
use rustc_hash::FxHashMap;

/// Handle to a type in the [`TypeTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One field of a record, with its resolved byte offset.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: Name,
    pub ty: TypeId,
    pub offset: u32,
}

/// A record type. `fields` holds only the record's own fields; inherited
/// ones are found by walking `base`.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordType {
    pub name: Name,
    pub base: Option<TypeId>,
    pub fields: Vec<FieldInfo>,
    pub size: u32,
}

/// An interface type: a function-pointer shape with named parameter and
/// return slots. The slot symbols are the static storage every
/// implementation shares.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceType {
    pub name: Name,
    /// Parameter slot symbols, in order.
    pub params: Vec<crate::symtab::SymId>,
    /// Return slot symbols, in order.
    pub rets: Vec<crate::symtab::SymId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    /// Primitive integer. `width` is in bytes: 1, 2 or 4. Pointer-sized
    /// integers are the 2-byte kinds on this target.
    Int { signed: bool, width: u8 },
    Pointer(TypeId),
    Array { elem: TypeId, len: u32 },
    Record(RecordType),
    Alias { name: Name, target: TypeId },
    Interface(InterfaceType),
}

/// Owning table of all types in one compilation.
#[derive(Debug, Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    pointer_cache: FxHashMap<TypeId, TypeId>,
    array_cache: FxHashMap<(TypeId, u32), TypeId>,
}

/// Pre-interned primitive handles, fixed by `TypeTable::new`.
pub const T_I8: TypeId = TypeId(0);
pub const T_U8: TypeId = TypeId(1);
pub const T_I16: TypeId = TypeId(2);
pub const T_U16: TypeId = TypeId(3);
pub const T_I32: TypeId = TypeId(4);
pub const T_U32: TypeId = TypeId(5);

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self::default();
        // Order must match the T_* constants.
        table.kinds.push(TypeKind::Int { signed: true, width: 1 });
        table.kinds.push(TypeKind::Int { signed: false, width: 1 });
        table.kinds.push(TypeKind::Int { signed: true, width: 2 });
        table.kinds.push(TypeKind::Int { signed: false, width: 2 });
        table.kinds.push(TypeKind::Int { signed: true, width: 4 });
        table.kinds.push(TypeKind::Int { signed: false, width: 4 });
        table
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind);
        id
    }

    /// Strip typedef aliases down to the underlying type.
    pub fn strip(&self, mut id: TypeId) -> TypeId {
        while let TypeKind::Alias { target, .. } = self.kind(id) {
            id = *target;
        }
        id
    }

    /// Canonical equality: identical after alias-stripping.
    pub fn equal(&self, a: TypeId, b: TypeId) -> bool {
        self.strip(a) == self.strip(b)
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        if let Some(&id) = self.pointer_cache.get(&pointee) {
            return id;
        }
        let id = self.push(TypeKind::Pointer(pointee));
        self.pointer_cache.insert(pointee, id);
        id
    }

    pub fn array_of(&mut self, elem: TypeId, len: u32) -> TypeId {
        if let Some(&id) = self.array_cache.get(&(elem, len)) {
            return id;
        }
        let id = self.push(TypeKind::Array { elem, len });
        self.array_cache.insert((elem, len), id);
        id
    }

    pub fn alias(&mut self, name: Name, target: TypeId) -> TypeId {
        self.push(TypeKind::Alias { name, target })
    }

    pub fn record(&mut self, record: RecordType) -> TypeId {
        self.push(TypeKind::Record(record))
    }

    pub fn interface(&mut self, iface: InterfaceType) -> TypeId {
        self.push(TypeKind::Interface(iface))
    }

    /// Byte size of a value of this type.
    pub fn size_of(&self, id: TypeId) -> u32 {
        match self.kind(self.strip(id)) {
            TypeKind::Int { width, .. } => *width as u32,
            TypeKind::Pointer(_) | TypeKind::Interface(_) => 2,
            TypeKind::Array { elem, len } => self.size_of(*elem) * len,
            TypeKind::Record(r) => r.size,
            TypeKind::Alias { .. } => unreachable!("stripped"),
        }
    }

    pub fn is_int(&self, id: TypeId) -> bool {
        matches!(self.kind(self.strip(id)), TypeKind::Int { .. })
    }

    /// `(signed, width_in_bytes)` for integer types.
    pub fn int_info(&self, id: TypeId) -> Option<(bool, u32)> {
        match self.kind(self.strip(id)) {
            TypeKind::Int { signed, width } => Some((*signed, *width as u32)),
            _ => None,
        }
    }

    pub fn is_signed(&self, id: TypeId) -> bool {
        matches!(self.kind(self.strip(id)), TypeKind::Int { signed: true, .. })
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(self.strip(id)), TypeKind::Pointer(_))
    }

    pub fn is_interface(&self, id: TypeId) -> bool {
        matches!(self.kind(self.strip(id)), TypeKind::Interface(_))
    }

    /// Scalars fit the A/HL evaluation model: integers, pointers and
    /// interface values.
    pub fn is_scalar(&self, id: TypeId) -> bool {
        matches!(
            self.kind(self.strip(id)),
            TypeKind::Int { .. } | TypeKind::Pointer(_) | TypeKind::Interface(_)
        )
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(self.strip(id)) {
            TypeKind::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn array_elem(&self, id: TypeId) -> Option<(TypeId, u32)> {
        match self.kind(self.strip(id)) {
            TypeKind::Array { elem, len } => Some((*elem, *len)),
            _ => None,
        }
    }

    /// The narrowest natural index type for an array of `len` elements.
    pub fn index_type(len: u32) -> TypeId {
        if len <= 256 {
            T_U8
        } else {
            T_U16
        }
    }

    /// Find a field by name, walking the inheritance chain.
    pub fn find_field(&self, record: TypeId, name: Name) -> Option<FieldInfo> {
        let mut current = self.strip(record);
        loop {
            match self.kind(current) {
                TypeKind::Record(r) => {
                    if let Some(f) = r.fields.iter().find(|f| f.name == name) {
                        return Some(f.clone());
                    }
                    match r.base {
                        Some(base) => current = self.strip(base),
                        None => return None,
                    }
                }
                _ => return None,
            }
        }
    }

    /// Human-readable type name for diagnostics.
    pub fn display(&self, id: TypeId, interner: &Interner) -> String {
        match self.kind(id) {
            TypeKind::Int { signed, width } => {
                format!("{}int{}", if *signed { "" } else { "u" }, *width as u32 * 8)
            }
            TypeKind::Pointer(p) => format!("[{}]", self.display(*p, interner)),
            TypeKind::Array { elem, len } => {
                format!("{}[{}]", self.display(*elem, interner), len)
            }
            TypeKind::Record(r) => interner.resolve(r.name).to_string(),
            TypeKind::Alias { name, .. } => interner.resolve(*name).to_string(),
            TypeKind::Interface(i) => interner.resolve(i.name).to_string(),
        }
    }
}

/// Reduce a value to the target's 2's-complement representation at the
/// given width: unsigned types wrap into `0..2^bits`, signed ones into
/// `-2^(bits-1)..2^(bits-1)`.
pub fn wrap_value(v: i64, signed: bool, width_bytes: u32) -> i64 {
    let bits = width_bytes * 8;
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let wrapped = (v as u64) & mask;
    if signed && bits < 64 && (wrapped >> (bits - 1)) & 1 == 1 {
        (wrapped | !mask) as i64
    } else {
        wrapped as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_value() {
        assert_eq!(wrap_value(300, false, 1), 44);
        assert_eq!(wrap_value(-1, false, 1), 255);
        assert_eq!(wrap_value(255, true, 1), -1);
        assert_eq!(wrap_value(0x1_0000, false, 2), 0);
        assert_eq!(wrap_value(-32769, true, 2), 32767);
        assert_eq!(wrap_value(70000, false, 4), 70000);
    }

    #[test]
    fn test_primitive_sizes() {
        let t = TypeTable::new();
        assert_eq!(t.size_of(T_U8), 1);
        assert_eq!(t.size_of(T_I16), 2);
        assert_eq!(t.size_of(T_U32), 4);
    }

    #[test]
    fn test_pointer_interning() {
        let mut t = TypeTable::new();
        let a = t.pointer_to(T_U8);
        let b = t.pointer_to(T_U8);
        assert_eq!(a, b);
        assert_eq!(t.size_of(a), 2);
        assert_ne!(t.pointer_to(T_U16), a);
    }

    #[test]
    fn test_alias_stripping() {
        let mut t = TypeTable::new();
        let mut interner = Interner::new();
        let byte = t.alias(interner.intern("byte"), T_U8);
        assert!(t.equal(byte, T_U8));
        assert_eq!(t.size_of(byte), 1);
        assert!(!t.equal(byte, T_I8));
    }

    #[test]
    fn test_array_size_and_index_type() {
        let mut t = TypeTable::new();
        let a = t.array_of(T_I16, 10);
        assert_eq!(t.size_of(a), 20);
        assert_eq!(TypeTable::index_type(10), T_U8);
        assert_eq!(TypeTable::index_type(256), T_U8);
        assert_eq!(TypeTable::index_type(257), T_U16);
    }

    #[test]
    fn test_field_lookup_walks_base() {
        let mut t = TypeTable::new();
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let z = interner.intern("z");
        let point = t.record(RecordType {
            name: interner.intern("Point"),
            base: None,
            fields: vec![
                FieldInfo { name: x, ty: T_I16, offset: 0 },
                FieldInfo { name: interner.intern("y"), ty: T_I16, offset: 2 },
            ],
            size: 4,
        });
        let point3d = t.record(RecordType {
            name: interner.intern("Point3D"),
            base: Some(point),
            fields: vec![FieldInfo { name: z, ty: T_I16, offset: 4 }],
            size: 6,
        });
        assert_eq!(t.find_field(point3d, z).unwrap().offset, 4);
        assert_eq!(t.find_field(point3d, x).unwrap().offset, 0);
    }
}
