//! Concrete type tags and the finite type-set lattice.
//!
//! A [`TypeSet`] is a finite set of concrete tags ordered by set inclusion:
//! the empty set is bottom ("unreachable so far") and there is no top — the
//! lattice is bounded above only by the finite universe of tags appearing in
//! the program, which is what guarantees the solver terminates.

use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;

/// Identity of a user class in the [`crate::catalog::Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassId(pub u32);

/// Identity of a container allocation site. Types flowing into or out of a
/// collection merge into the element node(s) of that site, so two lists
/// allocated at different program points keep independent element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SiteId(pub u32);

/// One concrete type tag: a primitive kind, a container identity, or a
/// class identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Str,
    None,
    List(SiteId),
    Dict(SiteId),
    Object(ClassId),
}

impl TypeTag {
    pub fn is_numeric(self) -> bool {
        matches!(self, TypeTag::Int | TypeTag::Float)
    }

    pub fn is_container(self) -> bool {
        matches!(self, TypeTag::List(_) | TypeTag::Dict(_))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "float"),
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Str => write!(f, "str"),
            TypeTag::None => write!(f, "none"),
            TypeTag::List(site) => write!(f, "list@{}", site.0),
            TypeTag::Dict(site) => write!(f, "dict@{}", site.0),
            TypeTag::Object(class) => write!(f, "object#{}", class.0),
        }
    }
}

/// A finite set of concrete type tags, kept sorted for structural
/// comparison: two sets with the same members hash and compare equal, which
/// is what makes specialization keys deduplicate across call sites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TypeSet(SmallVec<[TypeTag; 4]>);

impl TypeSet {
    pub fn empty() -> Self {
        Self(SmallVec::new())
    }

    pub fn single(tag: TypeTag) -> Self {
        Self(SmallVec::from_slice(&[tag]))
    }

    pub fn from_tags(tags: &[TypeTag]) -> Self {
        let mut set = Self::empty();
        for &tag in tags {
            set.insert(tag);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.0.binary_search(&tag).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[TypeTag] {
        &self.0
    }

    /// Insert a tag, reporting whether the set grew.
    pub fn insert(&mut self, tag: TypeTag) -> bool {
        match self.0.binary_search(&tag) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, tag);
                true
            }
        }
    }

    /// Union `other` into `self`, reporting whether the set grew. This is
    /// the lattice join; sets only ever grow.
    pub fn union_with(&mut self, other: &TypeSet) -> bool {
        let mut grew = false;
        for tag in other.iter() {
            grew |= self.insert(tag);
        }
        grew
    }

    /// Lattice ordering: set inclusion.
    pub fn is_subset_of(&self, other: &TypeSet) -> bool {
        self.iter().all(|tag| other.contains(tag))
    }
}

impl FromIterator<TypeTag> for TypeSet {
    fn from_iter<I: IntoIterator<Item = TypeTag>>(iter: I) -> Self {
        let mut set = Self::empty();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, tag) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", tag)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_growth() {
        let mut set = TypeSet::empty();
        assert!(set.insert(TypeTag::Int));
        assert!(!set.insert(TypeTag::Int));
        assert!(set.insert(TypeTag::Float));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_union_is_monotone() {
        let mut a = TypeSet::single(TypeTag::Int);
        let b = TypeSet::from_tags(&[TypeTag::Int, TypeTag::Str]);

        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert!(b.is_subset_of(&a));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_structural_equality_ignores_insertion_order() {
        let mut a = TypeSet::empty();
        a.insert(TypeTag::Str);
        a.insert(TypeTag::Int);

        let mut b = TypeSet::empty();
        b.insert(TypeTag::Int);
        b.insert(TypeTag::Str);

        assert_eq!(a, b);
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let hash = |s: &TypeSet| {
            let mut h = DefaultHasher::new();
            s.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn test_bottom_is_subset_of_everything() {
        let bottom = TypeSet::empty();
        let ints = TypeSet::single(TypeTag::Int);
        assert!(bottom.is_subset_of(&ints));
        assert!(bottom.is_subset_of(&bottom));
        assert!(!ints.is_subset_of(&bottom));
    }

    #[test]
    fn test_distinct_sites_are_distinct_tags() {
        let a = TypeTag::List(SiteId(0));
        let b = TypeTag::List(SiteId(1));
        let set = TypeSet::from_tags(&[a, b]);
        assert_eq!(set.len(), 2);
    }
}
