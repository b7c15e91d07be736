use core::fmt;

use smallvec::SmallVec;
use velac_fir::types::Ty;

use crate::variable::{DataFlowVariable, RealVar};

/// The atoms observable about a variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EqTrue,
    EqFalse,
    EqNull,
    NotEqNull,
}

impl Operation {
    /// The operation that holds exactly when `self` does not.
    pub const fn invert(self) -> Self {
        match self {
            Self::EqTrue => Self::EqFalse,
            Self::EqFalse => Self::EqTrue,
            Self::EqNull => Self::NotEqNull,
            Self::NotEqNull => Self::EqNull,
        }
    }

    /// `EqTrue`/`EqFalse` from a boolean value.
    pub const fn from_boolean(value: bool) -> Self {
        if value { Self::EqTrue } else { Self::EqFalse }
    }

    pub const fn is_boolean(&self) -> bool {
        matches!(self, Self::EqTrue | Self::EqFalse)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EqTrue => f.write_str("== true"),
            Self::EqFalse => f.write_str("== false"),
            Self::EqNull => f.write_str("== null"),
            Self::NotEqNull => f.write_str("!= null"),
        }
    }
}

/// `variable <op>`: the condition and operation-effect form of the logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationStatement {
    pub variable: DataFlowVariable,
    pub operation: Operation,
}

impl OperationStatement {
    pub fn new(variable: impl Into<DataFlowVariable>, operation: Operation) -> Self {
        Self {
            variable: variable.into(),
            operation,
        }
    }

    pub fn invert(self) -> Self {
        Self {
            variable: self.variable,
            operation: self.operation.invert(),
        }
    }
}

impl fmt::Display for OperationStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.variable, self.operation)
    }
}

/// An insertion-ordered set of types. Semantic content is membership only; two sets with
/// the same members in different orders are equal.
#[derive(Debug, Clone, Default)]
pub struct TypeSet(SmallVec<[Ty; 2]>);

impl TypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(ty: Ty) -> Self {
        let mut set = Self::new();
        set.insert(ty);
        set
    }

    pub fn insert(&mut self, ty: Ty) -> bool {
        if self.0.contains(&ty) {
            false
        } else {
            self.0.push(ty);
            true
        }
    }

    pub fn contains(&self, ty: &Ty) -> bool {
        self.0.contains(ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ty> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Membership containment: every element of `self` is in `other`.
    pub fn is_subset_of(&self, other: &TypeSet) -> bool {
        self.0.iter().all(|ty| other.contains(ty))
    }

    /// Keep only members also present in `other`.
    pub fn retain_intersection(&mut self, other: &TypeSet) {
        self.0.retain(|ty| other.contains(ty));
    }

    /// Keep only members absent from `other`.
    pub fn retain_difference(&mut self, other: &TypeSet) {
        self.0.retain(|ty| !other.contains(ty));
    }

    pub fn extend_union(&mut self, other: &TypeSet) {
        for ty in other.iter() {
            self.insert(ty.clone());
        }
    }
}

impl PartialEq for TypeSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.is_subset_of(other)
    }
}

impl Eq for TypeSet {}

impl FromIterator<Ty> for TypeSet {
    fn from_iter<I: IntoIterator<Item = Ty>>(iter: I) -> Self {
        let mut set = Self::new();
        for ty in iter {
            set.insert(ty);
        }
        set
    }
}

/// The type facts known about a real variable at a program point: the value belongs to
/// every type in `exact_type` (their intersection refines the declared type) and to none
/// of the types in `exact_not_type`.
///
/// Synthetic variables never appear here; a transient expression's value cannot be
/// observed again, so a refinement of it would be meaningless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeStatement {
    pub variable: RealVar,
    pub exact_type: TypeSet,
    pub exact_not_type: TypeSet,
}

impl TypeStatement {
    pub fn new(variable: RealVar) -> Self {
        Self {
            variable,
            exact_type: TypeSet::new(),
            exact_not_type: TypeSet::new(),
        }
    }

    /// `variable` is known to be of type `ty`.
    pub fn has_type(variable: RealVar, ty: Ty) -> Self {
        Self {
            variable,
            exact_type: TypeSet::single(ty),
            exact_not_type: TypeSet::new(),
        }
    }

    /// `variable` is known not to be of type `ty`.
    pub fn has_not_type(variable: RealVar, ty: Ty) -> Self {
        Self {
            variable,
            exact_type: TypeSet::new(),
            exact_not_type: TypeSet::single(ty),
        }
    }

    /// A trivially true statement carries no types at all.
    pub fn is_empty(&self) -> bool {
        self.exact_type.is_empty() && self.exact_not_type.is_empty()
    }

    /// Union the facts of `other` into `self`. Both must refer to the same variable.
    pub fn merge(&mut self, other: &TypeStatement) {
        debug_assert_eq!(self.variable, other.variable);
        self.exact_type.extend_union(&other.exact_type);
        self.exact_not_type.extend_union(&other.exact_not_type);
    }

    /// True when every fact in `self` is already carried by `other`.
    pub fn is_implied_by(&self, other: &TypeStatement) -> bool {
        self.exact_type.is_subset_of(&other.exact_type)
            && self.exact_not_type.is_subset_of(&other.exact_not_type)
    }
}

/// Either effect form of an implication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Type(TypeStatement),
    Operation(OperationStatement),
}

impl Statement {
    pub fn variable(&self) -> DataFlowVariable {
        match self {
            Self::Type(ts) => DataFlowVariable::Real(ts.variable),
            Self::Operation(os) => os.variable,
        }
    }
}

impl From<TypeStatement> for Statement {
    fn from(ts: TypeStatement) -> Self {
        Self::Type(ts)
    }
}

impl From<OperationStatement> for Statement {
    fn from(os: OperationStatement) -> Self {
        Self::Operation(os)
    }
}

/// `condition ⟹ effect`: once the condition atom is known to hold, the effect is added
/// to the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implication {
    pub condition: OperationStatement,
    pub effect: Statement,
}

impl Implication {
    pub fn new(condition: OperationStatement, effect: impl Into<Statement>) -> Self {
        Self {
            condition,
            effect: effect.into(),
        }
    }

    /// The same implication keyed on the inverted condition. Used when a boolean
    /// negation re-binds the facts of its operand.
    pub fn invert_condition(self) -> Self {
        Self {
            condition: self.condition.invert(),
            effect: self.effect,
        }
    }
}

impl fmt::Display for Implication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => ", self.condition)?;
        match &self.effect {
            Statement::Operation(os) => write!(f, "{os}"),
            Statement::Type(ts) => {
                write!(f, "{}", ts.variable)?;
                let mut sep = " : ";
                for ty in ts.exact_type.iter() {
                    write!(f, "{sep}{ty}")?;
                    sep = " & ";
                }
                let mut sep = " !: ";
                for ty in ts.exact_not_type.iter() {
                    write!(f, "{sep}{ty}")?;
                    sep = " & ";
                }
                Ok(())
            }
        }
    }
}
