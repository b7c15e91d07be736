use std::sync::Arc;

use cranelift_entity::{PrimaryMap, entity_impl};

use crate::{
    symbols::{FunctionSignature, SymbolData, SymbolId, SymbolKind},
    types::Ty,
};

/// A unique reference to an expression in the current declaration tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);
entity_impl!(ExprId, "expr");

/// The operation of a type-operator or equality expression.
///
/// The set is shared between the two expression kinds the way the parser produces them;
/// consumers that only handle a subset must reject the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirOperation {
    /// `x is T`
    Is,
    /// `x !is T`
    NotIs,
    /// `x as T`
    As,
    /// `x as? T`
    SafeAs,
    /// `a == b`
    Eq,
    /// `a != b`
    NotEq,
    /// `a === b`
    Identity,
    /// `a !== b`
    NotIdentity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstKind {
    Null,
    Boolean(bool),
    Int(i64),
    Str(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Return,
    Break,
    Continue,
}

/// One branch of a `when` expression. The else branch has no condition.
#[derive(Debug, Clone)]
pub struct WhenBranch {
    pub condition: Option<ExprId>,
    pub body: ExprId,
}

#[derive(Debug, Clone)]
pub struct Catch {
    pub parameter: SymbolId,
    pub body: ExprId,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(ConstKind),
    /// A (possibly qualified) access to a named symbol.
    Access {
        symbol: SymbolId,
        receiver: Option<ExprId>,
    },
    /// `is` / `!is` / `as` / `as?`
    TypeOperator {
        operation: FirOperation,
        operand: ExprId,
        ty: Ty,
    },
    /// `==` / `!=` / `===` / `!==`
    Equality {
        operation: FirOperation,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// `x!!`
    CheckNotNull { operand: ExprId },
    /// `&&` / `||`
    BooleanOperator {
        is_and: bool,
        left: ExprId,
        right: ExprId,
    },
    /// `!x`
    BooleanNot { operand: ExprId },
    Call {
        callee: SymbolId,
        receiver: Option<ExprId>,
        args: Vec<ExprId>,
    },
    /// `r?.f(...)`. The selector is applied to the checked receiver.
    SafeCall { receiver: ExprId, selector: ExprId },
    When { branches: Vec<WhenBranch> },
    While { condition: ExprId, body: ExprId },
    DoWhile { body: ExprId, condition: ExprId },
    Block { statements: Vec<ExprId> },
    /// A local `val`/`var` declaration.
    Declaration {
        symbol: SymbolId,
        initializer: Option<ExprId>,
    },
    /// Assignment to a local variable.
    Assignment { target: SymbolId, value: ExprId },
    Jump {
        kind: JumpKind,
        value: Option<ExprId>,
    },
    Try {
        body: ExprId,
        catches: Vec<Catch>,
        finally: Option<ExprId>,
    },
    /// A lambda literal with at most one parameter.
    AnonymousFunction {
        parameter: Option<SymbolId>,
        body: ExprId,
    },
}

/// An expression together with its resolved static type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
}

/// A function declaration: symbol, optional dispatch receiver, value parameters, body.
#[derive(Debug, Clone)]
pub struct Function {
    pub symbol: SymbolId,
    pub receiver: Option<SymbolId>,
    pub parameters: Vec<SymbolId>,
    pub body: ExprId,
}

/// The declaration tree for one analysis unit: expression and symbol arenas.
#[derive(Default)]
pub struct Fir {
    exprs: PrimaryMap<ExprId, Expr>,
    symbols: PrimaryMap<SymbolId, SymbolData>,
}

impl Fir {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    #[inline]
    pub fn symbol(&self, id: SymbolId) -> &SymbolData {
        &self.symbols[id]
    }

    pub fn alloc_expr(&mut self, kind: ExprKind, ty: Ty) -> ExprId {
        self.exprs.push(Expr { kind, ty })
    }

    pub fn alloc_symbol(&mut self, data: SymbolData) -> SymbolId {
        self.symbols.push(data)
    }

    /// The expressions whose values a lambda can produce: every `return` with a value
    /// inside the body (not crossing into a nested lambda), plus the trailing expression
    /// of the body block when it does not end in a jump.
    pub fn return_expressions_of_anonymous_function(&self, lambda: ExprId) -> Vec<ExprId> {
        let ExprKind::AnonymousFunction { body, .. } = &self.expr(lambda).kind else {
            return Vec::new();
        };
        let mut out = Vec::new();
        self.collect_returns(*body, &mut out);
        match &self.expr(*body).kind {
            ExprKind::Block { statements } => {
                if let Some(last) = statements.last() {
                    if !matches!(self.expr(*last).kind, ExprKind::Jump { .. }) {
                        out.push(*last);
                    }
                }
            }
            ExprKind::Jump { .. } => {}
            _ => out.push(*body),
        }
        out
    }

    fn collect_returns(&self, expr: ExprId, out: &mut Vec<ExprId>) {
        match &self.expr(expr).kind {
            ExprKind::Jump {
                kind: JumpKind::Return,
                value: Some(value),
            } => out.push(*value),
            ExprKind::Jump { .. } | ExprKind::Literal(_) | ExprKind::Access { .. } => {}
            ExprKind::TypeOperator { operand, .. }
            | ExprKind::CheckNotNull { operand }
            | ExprKind::BooleanNot { operand } => self.collect_returns(*operand, out),
            ExprKind::Equality { lhs, rhs, .. } => {
                self.collect_returns(*lhs, out);
                self.collect_returns(*rhs, out);
            }
            ExprKind::BooleanOperator { left, right, .. } => {
                self.collect_returns(*left, out);
                self.collect_returns(*right, out);
            }
            ExprKind::Call { receiver, args, .. } => {
                if let Some(r) = receiver {
                    self.collect_returns(*r, out);
                }
                for arg in args {
                    self.collect_returns(*arg, out);
                }
            }
            ExprKind::SafeCall { receiver, selector } => {
                self.collect_returns(*receiver, out);
                self.collect_returns(*selector, out);
            }
            ExprKind::When { branches } => {
                for branch in branches {
                    if let Some(c) = branch.condition {
                        self.collect_returns(c, out);
                    }
                    self.collect_returns(branch.body, out);
                }
            }
            ExprKind::While { condition, body } => {
                self.collect_returns(*condition, out);
                self.collect_returns(*body, out);
            }
            ExprKind::DoWhile { body, condition } => {
                self.collect_returns(*body, out);
                self.collect_returns(*condition, out);
            }
            ExprKind::Block { statements } => {
                for stmt in statements {
                    self.collect_returns(*stmt, out);
                }
            }
            ExprKind::Declaration { initializer, .. } => {
                if let Some(init) = initializer {
                    self.collect_returns(*init, out);
                }
            }
            ExprKind::Assignment { value, .. } => self.collect_returns(*value, out),
            ExprKind::Try {
                body,
                catches,
                finally,
            } => {
                self.collect_returns(*body, out);
                for catch in catches {
                    self.collect_returns(catch.body, out);
                }
                if let Some(fin) = finally {
                    self.collect_returns(*fin, out);
                }
            }
            // Returns inside a nested lambda belong to that lambda.
            ExprKind::AnonymousFunction { .. } => {}
        }
    }
}

/// Construction API for declaration trees, used by the resolver and by tests.
///
/// Static types are inferred where the expression form determines them and must be
/// supplied where it does not (calls, lambdas).
#[derive(Default)]
pub struct FirBuilder {
    fir: Fir,
}

impl FirBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Fir {
        self.fir
    }

    #[inline]
    pub fn fir(&self) -> &Fir {
        &self.fir
    }

    // Symbols

    pub fn param(&mut self, name: &str, ty: Ty) -> SymbolId {
        self.fir
            .alloc_symbol(SymbolData::new(name, SymbolKind::ValueParameter, ty))
    }

    pub fn local_val(&mut self, name: &str, ty: Ty) -> SymbolId {
        self.fir.alloc_symbol(SymbolData::new(name, SymbolKind::LocalVal, ty))
    }

    pub fn local_var(&mut self, name: &str, ty: Ty) -> SymbolId {
        self.fir
            .alloc_symbol(SymbolData::new(name, SymbolKind::LocalVar { captured: false }, ty))
    }

    pub fn captured_var(&mut self, name: &str, ty: Ty) -> SymbolId {
        self.fir
            .alloc_symbol(SymbolData::new(name, SymbolKind::LocalVar { captured: true }, ty))
    }

    pub fn receiver(&mut self, ty: Ty) -> SymbolId {
        self.fir
            .alloc_symbol(SymbolData::new("this", SymbolKind::Receiver, ty))
    }

    pub fn member(&mut self, name: &str, is_final: bool, ty: Ty) -> SymbolId {
        self.fir
            .alloc_symbol(SymbolData::new(name, SymbolKind::Member { is_final }, ty))
    }

    pub fn function_symbol(&mut self, name: &str, params: Vec<Ty>, return_ty: Ty) -> SymbolId {
        let signature = FunctionSignature {
            params,
            return_ty: return_ty.clone(),
        };
        self.fir
            .alloc_symbol(SymbolData::new(name, SymbolKind::Function { signature }, return_ty))
    }

    // Expressions

    pub fn null_literal(&mut self) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::Literal(ConstKind::Null), Ty::nullable_nothing())
    }

    pub fn bool_literal(&mut self, value: bool) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::Literal(ConstKind::Boolean(value)), Ty::boolean())
    }

    pub fn int_literal(&mut self, value: i64) -> ExprId {
        self.fir.alloc_expr(ExprKind::Literal(ConstKind::Int(value)), Ty::int())
    }

    pub fn string_literal(&mut self, value: &str) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::Literal(ConstKind::Str(Arc::from(value))), Ty::string())
    }

    pub fn access(&mut self, symbol: SymbolId) -> ExprId {
        let ty = self.fir.symbol(symbol).ty.clone();
        self.fir.alloc_expr(ExprKind::Access { symbol, receiver: None }, ty)
    }

    pub fn qualified_access(&mut self, receiver: ExprId, symbol: SymbolId) -> ExprId {
        let ty = self.fir.symbol(symbol).ty.clone();
        self.fir.alloc_expr(
            ExprKind::Access {
                symbol,
                receiver: Some(receiver),
            },
            ty,
        )
    }

    pub fn is_type(&mut self, operand: ExprId, ty: Ty) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::TypeOperator {
                operation: FirOperation::Is,
                operand,
                ty,
            },
            Ty::boolean(),
        )
    }

    pub fn not_is_type(&mut self, operand: ExprId, ty: Ty) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::TypeOperator {
                operation: FirOperation::NotIs,
                operand,
                ty,
            },
            Ty::boolean(),
        )
    }

    pub fn cast(&mut self, operand: ExprId, ty: Ty) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::TypeOperator {
                operation: FirOperation::As,
                operand,
                ty: ty.clone(),
            },
            ty,
        )
    }

    pub fn safe_cast(&mut self, operand: ExprId, ty: Ty) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::TypeOperator {
                operation: FirOperation::SafeAs,
                operand,
                ty: ty.clone(),
            },
            ty.nullable(),
        )
    }

    pub fn equality(&mut self, operation: FirOperation, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::Equality { operation, lhs, rhs }, Ty::boolean())
    }

    pub fn check_not_null(&mut self, operand: ExprId) -> ExprId {
        let ty = self.fir.expr(operand).ty.make_non_null();
        self.fir.alloc_expr(ExprKind::CheckNotNull { operand }, ty)
    }

    pub fn and(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::BooleanOperator {
                is_and: true,
                left,
                right,
            },
            Ty::boolean(),
        )
    }

    pub fn or(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::BooleanOperator {
                is_and: false,
                left,
                right,
            },
            Ty::boolean(),
        )
    }

    pub fn not(&mut self, operand: ExprId) -> ExprId {
        self.fir.alloc_expr(ExprKind::BooleanNot { operand }, Ty::boolean())
    }

    pub fn call(&mut self, callee: SymbolId, receiver: Option<ExprId>, args: Vec<ExprId>) -> ExprId {
        let ty = self.fir.symbol(callee).ty.clone();
        self.fir.alloc_expr(ExprKind::Call { callee, receiver, args }, ty)
    }

    pub fn safe_call(&mut self, receiver: ExprId, selector: ExprId) -> ExprId {
        let ty = self.fir.expr(selector).ty.clone().nullable();
        self.fir.alloc_expr(ExprKind::SafeCall { receiver, selector }, ty)
    }

    pub fn when(&mut self, branches: Vec<WhenBranch>, ty: Ty) -> ExprId {
        self.fir.alloc_expr(ExprKind::When { branches }, ty)
    }

    /// `if (condition) then_body` as the `when` the parser desugars it to.
    pub fn if_then(&mut self, condition: ExprId, then_body: ExprId) -> ExprId {
        self.when(
            vec![WhenBranch {
                condition: Some(condition),
                body: then_body,
            }],
            Ty::unit(),
        )
    }

    /// `if (condition) then_body else else_body`, desugared likewise.
    pub fn if_then_else(&mut self, condition: ExprId, then_body: ExprId, else_body: ExprId) -> ExprId {
        self.when(
            vec![
                WhenBranch {
                    condition: Some(condition),
                    body: then_body,
                },
                WhenBranch {
                    condition: None,
                    body: else_body,
                },
            ],
            Ty::unit(),
        )
    }

    pub fn while_loop(&mut self, condition: ExprId, body: ExprId) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::While { condition, body }, Ty::unit())
    }

    pub fn do_while_loop(&mut self, body: ExprId, condition: ExprId) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::DoWhile { body, condition }, Ty::unit())
    }

    pub fn block(&mut self, statements: Vec<ExprId>) -> ExprId {
        let ty = statements
            .last()
            .map(|last| self.fir.expr(*last).ty.clone())
            .unwrap_or(Ty::unit());
        self.fir.alloc_expr(ExprKind::Block { statements }, ty)
    }

    pub fn declare(&mut self, symbol: SymbolId, initializer: Option<ExprId>) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::Declaration { symbol, initializer }, Ty::unit())
    }

    pub fn assign(&mut self, target: SymbolId, value: ExprId) -> ExprId {
        self.fir.alloc_expr(ExprKind::Assignment { target, value }, Ty::unit())
    }

    pub fn ret(&mut self, value: Option<ExprId>) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::Jump {
                kind: JumpKind::Return,
                value,
            },
            Ty::nothing(),
        )
    }

    pub fn brk(&mut self) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::Jump {
                kind: JumpKind::Break,
                value: None,
            },
            Ty::nothing(),
        )
    }

    pub fn cont(&mut self) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::Jump {
                kind: JumpKind::Continue,
                value: None,
            },
            Ty::nothing(),
        )
    }

    pub fn try_catch(&mut self, body: ExprId, catches: Vec<Catch>, finally: Option<ExprId>) -> ExprId {
        self.fir.alloc_expr(
            ExprKind::Try {
                body,
                catches,
                finally,
            },
            Ty::unit(),
        )
    }

    pub fn lambda(&mut self, parameter: Option<SymbolId>, body: ExprId, ty: Ty) -> ExprId {
        self.fir
            .alloc_expr(ExprKind::AnonymousFunction { parameter, body }, ty)
    }

    pub fn function(
        &mut self,
        name: &str,
        receiver: Option<SymbolId>,
        parameters: Vec<SymbolId>,
        return_ty: Ty,
        body: ExprId,
    ) -> Function {
        let param_tys = parameters
            .iter()
            .map(|p| self.fir.symbol(*p).ty.clone())
            .collect();
        let symbol = self.function_symbol(name, param_tys, return_ty);
        Function {
            symbol,
            receiver,
            parameters,
            body,
        }
    }
}
