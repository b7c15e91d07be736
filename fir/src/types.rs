use core::fmt;
use std::sync::Arc;

use crate::FxHashMap;

/// Type constructors of the Vela semantic type system.
///
/// The set is closed: the front end only ever reasons about the builtin types, named
/// class-like declarations, and intersections produced by refinement. Generic arguments
/// and nullability live on [Ty], not on the constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TyCtor {
    /// The top of the class hierarchy. Every non-nullable type is a subtype of `Any`,
    /// and every type at all is a subtype of `Any?`.
    Any,
    /// The bottom type. `Nothing` is a subtype of everything; `Nothing?` is the type
    /// of the `null` literal.
    Nothing,
    Boolean,
    Int,
    String,
    Unit,
    /// A user-declared class or interface, identified by its fully qualified name.
    Named(Arc<str>),
    /// An intersection of the argument types, produced by smartcast refinement.
    /// Never written in source.
    Intersection,
}

/// A semantic type: a constructor applied to (covariant) type arguments, plus a
/// nullability marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ty {
    pub ctor: TyCtor,
    pub args: Vec<Ty>,
    pub nullable: bool,
}

impl Ty {
    pub const fn simple(ctor: TyCtor) -> Self {
        Self {
            ctor,
            args: Vec::new(),
            nullable: false,
        }
    }

    #[inline]
    pub const fn any() -> Self {
        Self::simple(TyCtor::Any)
    }

    /// `Any?`, the implicit declared type of an unconstrained value.
    #[inline]
    pub const fn nullable_any() -> Self {
        Self {
            ctor: TyCtor::Any,
            args: Vec::new(),
            nullable: true,
        }
    }

    #[inline]
    pub const fn nothing() -> Self {
        Self::simple(TyCtor::Nothing)
    }

    /// `Nothing?`, the type of the `null` literal.
    #[inline]
    pub const fn nullable_nothing() -> Self {
        Self {
            ctor: TyCtor::Nothing,
            args: Vec::new(),
            nullable: true,
        }
    }

    #[inline]
    pub const fn boolean() -> Self {
        Self::simple(TyCtor::Boolean)
    }

    #[inline]
    pub const fn int() -> Self {
        Self::simple(TyCtor::Int)
    }

    #[inline]
    pub const fn string() -> Self {
        Self::simple(TyCtor::String)
    }

    #[inline]
    pub const fn unit() -> Self {
        Self::simple(TyCtor::Unit)
    }

    pub fn named(name: impl AsRef<str>) -> Self {
        Self::simple(TyCtor::Named(Arc::from(name.as_ref())))
    }

    pub fn named_with(name: impl AsRef<str>, args: Vec<Ty>) -> Self {
        Self {
            ctor: TyCtor::Named(Arc::from(name.as_ref())),
            args,
            nullable: false,
        }
    }

    /// An intersection type over `parts`. The result is nullable only if every part is.
    pub fn intersection(parts: Vec<Ty>) -> Self {
        let nullable = !parts.is_empty() && parts.iter().all(|t| t.nullable);
        Self {
            ctor: TyCtor::Intersection,
            args: parts,
            nullable,
        }
    }

    /// The same type with the nullability marker set.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[inline]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self.ctor, TyCtor::Any)
    }

    #[inline]
    pub fn is_nothing(&self) -> bool {
        matches!(self.ctor, TyCtor::Nothing) && !self.nullable
    }

    /// True for `Nothing?`, the static type of `null`.
    #[inline]
    pub fn is_nullable_nothing(&self) -> bool {
        matches!(self.ctor, TyCtor::Nothing) && self.nullable
    }

    pub fn make_non_null(&self) -> Ty {
        let mut ty = self.clone();
        ty.nullable = false;
        ty
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ctor {
            TyCtor::Any => f.write_str("Any")?,
            TyCtor::Nothing => f.write_str("Nothing")?,
            TyCtor::Boolean => f.write_str("Boolean")?,
            TyCtor::Int => f.write_str("Int")?,
            TyCtor::String => f.write_str("String")?,
            TyCtor::Unit => f.write_str("Unit")?,
            TyCtor::Named(name) => f.write_str(name)?,
            TyCtor::Intersection => {
                f.write_str("{")?;
                for (i, part) in self.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str("}")?;
                if self.nullable {
                    f.write_str("?")?;
                }
                return Ok(());
            }
        }
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        if self.nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// Subtyping queries, answered by the resolver's type checker.
pub trait TypeContext {
    fn is_subtype_of(&self, a: &Ty, b: &Ty) -> bool;
}

/// Intersection arithmetic over the type lattice, answered by the resolver.
///
/// `intersect` keeps the most specific members of `types`, dropping any member that is a
/// supertype of another. A single survivor is returned as-is; multiple survivors become an
/// intersection type; an empty input means "no information" and yields `Any?`.
pub trait TypeIntersector {
    fn intersect(&self, types: &[Ty]) -> Ty;
}

/// A registry of named class-like declarations and their direct supertypes, implementing
/// both [TypeContext] and [TypeIntersector] over the resulting hierarchy.
#[derive(Default)]
pub struct TypeEnvironment {
    supertypes: FxHashMap<Arc<str>, Vec<Ty>>,
}

impl TypeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a named class with its direct supertypes. Redeclaring replaces the
    /// previous entry.
    pub fn declare_class(&mut self, name: impl AsRef<str>, supertypes: Vec<Ty>) -> Ty {
        let name: Arc<str> = Arc::from(name.as_ref());
        self.supertypes.insert(name.clone(), supertypes);
        Ty::simple(TyCtor::Named(name))
    }

    fn named_supertypes(&self, name: &str) -> &[Ty] {
        self.supertypes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl TypeContext for TypeEnvironment {
    fn is_subtype_of(&self, a: &Ty, b: &Ty) -> bool {
        if a == b {
            return true;
        }
        // An intersection is a subtype of anything one of its members is a subtype of.
        if let TyCtor::Intersection = a.ctor {
            return !(a.nullable && !b.nullable)
                && a.args.iter().any(|part| self.is_subtype_of(part, b));
        }
        // Everything must hold against every member of an intersection on the right.
        if let TyCtor::Intersection = b.ctor {
            return b.args.iter().all(|part| self.is_subtype_of(a, part));
        }
        // A nullable type is never a subtype of a non-nullable one.
        if a.nullable && !b.nullable {
            return false;
        }
        if matches!(a.ctor, TyCtor::Nothing) {
            return true;
        }
        if matches!(b.ctor, TyCtor::Any) {
            return true;
        }
        if a.ctor == b.ctor {
            return a.args.len() == b.args.len()
                && a.args
                    .iter()
                    .zip(b.args.iter())
                    .all(|(x, y)| self.is_subtype_of(x, y));
        }
        if let TyCtor::Named(name) = &a.ctor {
            return self
                .named_supertypes(name)
                .iter()
                .any(|s| self.is_subtype_of(s, b));
        }
        false
    }
}

impl TypeIntersector for TypeEnvironment {
    fn intersect(&self, types: &[Ty]) -> Ty {
        let mut kept: Vec<Ty> = Vec::new();
        for ty in types {
            if kept.iter().any(|k| self.is_subtype_of(k, ty)) {
                continue;
            }
            kept.retain(|k| !self.is_subtype_of(ty, k));
            kept.push(ty.clone());
        }
        match kept.len() {
            0 => Ty::nullable_any(),
            1 => kept.pop().unwrap(),
            _ => Ty::intersection(kept),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn env() -> TypeEnvironment {
        let mut env = TypeEnvironment::new();
        env.declare_class("Base", vec![Ty::any()]);
        env.declare_class("Derived", vec![Ty::named("Base")]);
        env
    }

    #[test]
    fn nullability_ordering() {
        let env = env();
        assert!(env.is_subtype_of(&Ty::string(), &Ty::string().nullable()));
        assert!(!env.is_subtype_of(&Ty::string().nullable(), &Ty::string()));
        assert!(env.is_subtype_of(&Ty::nullable_nothing(), &Ty::string().nullable()));
        assert!(!env.is_subtype_of(&Ty::nullable_nothing(), &Ty::string()));
    }

    #[test]
    fn named_hierarchy_is_transitive() {
        let env = env();
        assert!(env.is_subtype_of(&Ty::named("Derived"), &Ty::named("Base")));
        assert!(env.is_subtype_of(&Ty::named("Derived"), &Ty::any()));
        assert!(!env.is_subtype_of(&Ty::named("Base"), &Ty::named("Derived")));
    }

    #[test]
    fn covariant_arguments() {
        let env = env();
        let list_int = Ty::named_with("List", vec![Ty::int()]);
        let list_any = Ty::named_with("List", vec![Ty::nullable_any()]);
        assert!(env.is_subtype_of(&list_int, &list_any));
        assert!(!env.is_subtype_of(&list_any, &list_int));
    }

    #[test]
    fn intersect_drops_redundant_supertypes() {
        let env = env();
        let t = env.intersect(&[Ty::nullable_any(), Ty::int()]);
        assert_eq!(t, Ty::int());

        let t = env.intersect(&[Ty::named("Base"), Ty::named("Derived")]);
        assert_eq!(t, Ty::named("Derived"));
    }

    #[test]
    fn intersect_keeps_unrelated_members() {
        let env = env();
        let t = env.intersect(&[Ty::named("Base"), Ty::string()]);
        assert_eq!(t, Ty::intersection(vec![Ty::named("Base"), Ty::string()]));
        assert!(env.is_subtype_of(&t, &Ty::named("Base")));
        assert!(env.is_subtype_of(&t, &Ty::string()));
    }
}
