//! The type lattice.
//!
//! Types form a rooted tree: every type except the root `any` and the unit
//! type `void` has a parent, and the least common ancestor of two types is
//! the meet the phi-normalization step uses to reconcile operand types.
//! `void` is disjoint from the tree and only shows up as the "no common
//! ancestor" sentinel.
//!
//! Types are hash-consed by name in a [`TypeStore`], so within one program
//! two types are equal exactly when their handles are equal. Pointer types
//! are synthesized lazily and cached per pointee.

use crate::entity::packed_option::PackedOption;
use crate::entity::{entity_impl, PrimaryMap};
use crate::fx::FxHashMap;
use core::fmt;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// An opaque reference to a type in a [`TypeStore`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Type(u32);
entity_impl!(Type, "ty");

/// The root of the lattice. Every registered type without an explicit parent
/// hangs below `any`.
pub const ANY: Type = Type(0);
/// The disjoint unit type, used only as the "no common ancestor" sentinel.
pub const VOID: Type = Type(1);
/// Boolean truth values.
pub const BOOL: Type = Type(2);
/// A single character.
pub const CHAR: Type = Type(3);
/// A character string.
pub const STR: Type = Type(4);
/// Double-precision floating point. The parent of `INT` so that integer
/// values promote to float at a phi.
pub const FLOAT: Type = Type(5);
/// A 64-bit integer, a child of `FLOAT`.
pub const INT: Type = Type(6);

/// Number of seeded types; registration starts handing out handles here.
const NUM_SEEDED: usize = 7;

/// The payload of one type node.
struct TypeData {
    /// The base name. Pointer types share the base name of their pointee and
    /// print trailing `*`s instead.
    name: String,
    /// Size of the representation in bytes.
    size: u32,
    /// Whether values of this type are integral.
    integral: bool,
    /// Parent in the lattice; `None` only for `any` and `void`.
    parent: PackedOption<Type>,
    /// For pointer types, the pointee.
    pointee: PackedOption<Type>,
    /// For compound types, the ordered member list.
    members: Vec<Type>,
}

/// Owner of all types in one program.
///
/// The store is seeded with the built-in lattice (`any`, `void`, `bool`,
/// `char`, `str`, `float`, `int`); further types are registered by name and
/// hash-consed, so registering the same name twice yields the same handle.
pub struct TypeStore {
    data: PrimaryMap<Type, TypeData>,
    by_name: FxHashMap<String, Type>,
    pointers: FxHashMap<Type, Type>,
}

impl TypeStore {
    /// Create a store seeded with the built-in lattice.
    pub fn new() -> Self {
        let mut store = Self {
            data: PrimaryMap::new(),
            by_name: FxHashMap::default(),
            pointers: FxHashMap::default(),
        };
        let any = store.seed("any", 8, false, None);
        let void = store.seed("void", 0, false, None);
        let boolean = store.seed("bool", 1, true, Some(any));
        let character = store.seed("char", 4, true, Some(any));
        let string = store.seed("str", 16, false, Some(any));
        let float = store.seed("float", 8, false, Some(any));
        let int = store.seed("int", 8, true, Some(float));
        debug_assert_eq!(any, ANY);
        debug_assert_eq!(void, VOID);
        debug_assert_eq!(boolean, BOOL);
        debug_assert_eq!(character, CHAR);
        debug_assert_eq!(string, STR);
        debug_assert_eq!(float, FLOAT);
        debug_assert_eq!(int, INT);
        debug_assert_eq!(store.data.len(), NUM_SEEDED);
        store
    }

    fn seed(&mut self, name: &str, size: u32, integral: bool, parent: Option<Type>) -> Type {
        let ty = self.data.push(TypeData {
            name: name.to_string(),
            size,
            integral,
            parent: parent.into(),
            pointee: None.into(),
            members: Vec::new(),
        });
        self.by_name.insert(name.to_string(), ty);
        ty
    }

    /// Register a named primitive type, or return the existing handle if the
    /// name is already taken. A `None` parent means `any`.
    pub fn register(
        &mut self,
        name: &str,
        size: u32,
        integral: bool,
        parent: Option<Type>,
    ) -> Type {
        if let Some(&existing) = self.by_name.get(name) {
            return existing;
        }
        self.seed(name, size, integral, Some(parent.unwrap_or(ANY)))
    }

    /// Register a named compound type with an ordered member list.
    ///
    /// # Panics
    ///
    /// Panics if the members' sizes sum to more than the declared size; that
    /// is an inconsistent registration, which is a programming error.
    pub fn register_compound(
        &mut self,
        name: &str,
        size: u32,
        members: &[Type],
        parent: Option<Type>,
    ) -> Type {
        if let Some(&existing) = self.by_name.get(name) {
            return existing;
        }
        let members_size: u32 = members.iter().map(|&m| self.size(m)).sum();
        assert!(
            members_size <= size,
            "compound type `{name}` declares {size} bytes but its members need {members_size}"
        );
        let ty = self.seed(name, size, false, Some(parent.unwrap_or(ANY)));
        self.data[ty].members = members.to_vec();
        ty
    }

    /// Get the pointer type to `pointee`, synthesizing it on first request.
    ///
    /// Pointer types hang directly below `any`, are integral, and have the
    /// size of a pointer.
    pub fn pointer_to(&mut self, pointee: Type) -> Type {
        if let Some(&existing) = self.pointers.get(&pointee) {
            return existing;
        }
        let name = self.data[pointee].name.clone();
        let ty = self.data.push(TypeData {
            name,
            size: core::mem::size_of::<usize>() as u32,
            integral: true,
            parent: ANY.into(),
            pointee: pointee.into(),
            members: Vec::new(),
        });
        self.pointers.insert(pointee, ty);
        ty
    }

    /// The base name of `ty` (without pointer decorations).
    pub fn name(&self, ty: Type) -> &str {
        &self.data[ty].name
    }

    /// The size of `ty`'s representation in bytes.
    pub fn size(&self, ty: Type) -> u32 {
        self.data[ty].size
    }

    /// Whether `ty` is integral.
    pub fn is_integral(&self, ty: Type) -> bool {
        self.data[ty].integral
    }

    /// The parent of `ty`, or `None` for `any` and `void`.
    pub fn parent(&self, ty: Type) -> Option<Type> {
        self.data[ty].parent.expand()
    }

    /// The pointee of `ty`, or `None` if `ty` is not a pointer type.
    pub fn dereference(&self, ty: Type) -> Option<Type> {
        self.data[ty].pointee.expand()
    }

    /// The ordered member types of a compound type; empty otherwise.
    pub fn members(&self, ty: Type) -> &[Type] {
        &self.data[ty].members
    }

    /// Distance from `ty` to its tree root.
    pub fn depth(&self, ty: Type) -> usize {
        let mut depth = 0;
        let mut cursor = ty;
        while let Some(parent) = self.parent(cursor) {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// How many pointer derivations `ty` is away from a non-pointer type.
    pub fn indirection_level(&self, ty: Type) -> usize {
        let mut level = 0;
        let mut cursor = ty;
        while let Some(pointee) = self.dereference(cursor) {
            level += 1;
            cursor = pointee;
        }
        level
    }

    /// Compute the least common ancestor of `a` and `b`.
    ///
    /// Walks the deeper side up until the depths agree, then walks both up
    /// until they meet. Returns [`VOID`] when the walk escapes the tree,
    /// which happens exactly when one side is `void` (or another parentless
    /// type outside the `any` tree).
    pub fn lca(&self, a: Type, b: Type) -> Type {
        let mut a = a;
        let mut b = b;
        loop {
            if a == b {
                return a;
            }
            let (da, db) = (self.depth(a), self.depth(b));
            if da > db {
                match self.parent(a) {
                    Some(parent) => a = parent,
                    None => return VOID,
                }
            } else if db > da {
                match self.parent(b) {
                    Some(parent) => b = parent,
                    None => return VOID,
                }
            } else {
                match (self.parent(a), self.parent(b)) {
                    (Some(pa), Some(pb)) => {
                        a = pa;
                        b = pb;
                    }
                    _ => return VOID,
                }
            }
        }
    }

    /// Return an object that can display `ty`, printing pointers like
    /// `float**`.
    pub fn display(&self, ty: Type) -> DisplayType<'_> {
        DisplayType { store: self, ty }
    }
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper for the context needed to display a [`Type`].
pub struct DisplayType<'a> {
    store: &'a TypeStore,
    ty: Type,
}

impl fmt::Display for DisplayType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.store.name(self.ty))?;
        for _ in 0..self.store.indirection_level(self.ty) {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lca_is_reflexive_and_commutative() {
        let store = TypeStore::new();
        for ty in [ANY, BOOL, CHAR, STR, FLOAT, INT] {
            assert_eq!(store.lca(ty, ty), ty);
        }
        assert_eq!(store.lca(INT, FLOAT), FLOAT);
        assert_eq!(store.lca(FLOAT, INT), FLOAT);
        assert_eq!(store.lca(BOOL, CHAR), ANY);
        assert_eq!(store.lca(CHAR, BOOL), ANY);
    }

    #[test]
    fn lca_with_parent() {
        let store = TypeStore::new();
        assert_eq!(store.lca(INT, store.parent(INT).unwrap()), FLOAT);
        assert_eq!(store.lca(BOOL, ANY), ANY);
    }

    #[test]
    fn void_escapes() {
        let store = TypeStore::new();
        assert_eq!(store.lca(VOID, INT), VOID);
        assert_eq!(store.lca(ANY, VOID), VOID);
    }

    #[test]
    fn registration_is_hash_consed() {
        let mut store = TypeStore::new();
        let complex = store.register("complex", 16, false, None);
        assert_eq!(store.register("complex", 16, false, None), complex);
        assert_eq!(store.parent(complex), Some(ANY));
        assert_eq!(store.depth(complex), 1);
    }

    #[test]
    fn pointer_synthesis() {
        let mut store = TypeStore::new();
        let p = store.pointer_to(FLOAT);
        assert_eq!(store.pointer_to(FLOAT), p);
        assert_eq!(store.dereference(p), Some(FLOAT));
        assert_eq!(store.parent(p), Some(ANY));
        assert!(store.is_integral(p));
        let pp = store.pointer_to(p);
        assert_eq!(store.indirection_level(pp), 2);
        assert_eq!(store.display(pp).to_string(), "float**");
    }

    #[test]
    #[should_panic]
    fn inconsistent_compound_size() {
        let mut store = TypeStore::new();
        store.register_compound("pair", 4, &[FLOAT, FLOAT], None);
    }
}
