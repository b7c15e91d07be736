use core::fmt;

use velac_fir::SymbolId;

/// Handle of an interned real variable. Resolved to its [RealVariableInfo] through the
/// [VariableStorage](crate::VariableStorage) that minted it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealVar(pub(crate) u32);

impl fmt::Debug for RealVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for RealVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Handle of an interned synthetic variable.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyntheticVar(pub(crate) u32);

impl fmt::Debug for SyntheticVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for SyntheticVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// An identity the logic reasons about.
///
/// A closed set of two variants: *real* variables stand for stable lvalues the program
/// can name and may carry type refinements; *synthetic* variables decorate transient
/// expressions and only ever carry operation statements, because the expression cannot
/// be observed again later.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataFlowVariable {
    Real(RealVar),
    Synthetic(SyntheticVar),
}

impl DataFlowVariable {
    #[inline]
    pub const fn is_real(&self) -> bool {
        matches!(self, Self::Real(_))
    }

    #[inline]
    pub const fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }

    #[inline]
    pub const fn as_real(&self) -> Option<RealVar> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Synthetic(_) => None,
        }
    }
}

impl fmt::Debug for DataFlowVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(v) => fmt::Debug::fmt(v, f),
            Self::Synthetic(v) => fmt::Debug::fmt(v, f),
        }
    }
}

impl fmt::Display for DataFlowVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<RealVar> for DataFlowVariable {
    fn from(v: RealVar) -> Self {
        Self::Real(v)
    }
}

impl From<SyntheticVar> for DataFlowVariable {
    fn from(v: SyntheticVar) -> Self {
        Self::Synthetic(v)
    }
}

/// Structural identity of a real variable: the accessed symbol, the real variable of its
/// explicit receiver (itself interned), and whether the access is an implicit `this`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Identifier {
    pub symbol: SymbolId,
    pub receiver: Option<RealVar>,
    pub is_receiver: bool,
}
