//! AST node definitions.
//!
//! This is the untyped tree the parser produces. Conditions are a separate
//! sum from expressions: comparisons and `and`/`or`/`not` can only occur in
//! condition position, so the grammar makes other placements unrepresentable.

use cowc_util::{Name, Pos};

/// A parsed compilation unit: the top-level statement list.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// Reference to a type in source syntax.
#[derive(Debug, Clone)]
pub enum TypeRef {
    /// A named type: builtin, typedef, record or interface name.
    Named(Name),
    /// Pointer: `[T]`.
    Pointer(Box<TypeRef>),
    /// Array: `T[n]` with a constant extent, or `T[]` inferred from the
    /// initializer.
    Array {
        elem: Box<TypeRef>,
        len: Option<Box<Expr>>,
    },
    /// The index type of an array variable: `@indexof a`.
    IndexOf(Name),
}

/// Binary operators over values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Comparison operators; only legal in condition position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The comparison that holds exactly when `self` does not.
    pub fn negated(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }

    /// The comparison with its operands swapped.
    pub fn swapped(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }
}

/// An expression with its source position.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Char(u8),
    Str(Vec<u8>),
    Nil,
    Name(Name),
    /// `base.field`
    Field { base: Box<Expr>, field: Name },
    /// `base[index]`
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `[ptr]`
    Deref(Box<Expr>),
    /// `&base.field`; only record members have addresses.
    AddrOf(Box<Expr>),
    /// Unary minus.
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `expr as T`
    Cast { expr: Box<Expr>, ty: Box<TypeRef> },
    /// `callee(args)`; callee is a subroutine name or an interface-typed
    /// variable.
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `@sizeof x` - element count of an array, or 1 for scalars.
    Sizeof(Box<Expr>),
    /// `@bytesof x` - byte size of a value or named type.
    Bytesof(Box<Expr>),
    /// `@indexof a` in expression position - the element count, typed as
    /// the array's index type.
    IndexOf(Box<Expr>),
    /// `@next p` - pointer advanced by one pointee.
    Next(Box<Expr>),
    /// `@prev p` - pointer backed up by one pointee.
    Prev(Box<Expr>),
}

/// A condition with its source position.
#[derive(Debug, Clone)]
pub struct Cond {
    pub kind: CondKind,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum CondKind {
    Cmp {
        op: CmpOp,
        lhs: Expr,
        rhs: Expr,
    },
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Not(Box<Cond>),
}

/// A statement with its source position.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Var(VarDecl),
    Const { name: Name, value: Expr },
    Typedef { name: Name, ty: TypeRef },
    Record(RecordDecl),
    Interface(InterfaceDecl),
    Sub(SubDecl),
    Assign { target: Expr, value: Expr },
    /// `(a, b) := f(...);`
    MultiAssign { targets: Vec<Expr>, call: Expr },
    If {
        arms: Vec<(Cond, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    While { cond: Cond, body: Vec<Stmt> },
    Loop { body: Vec<Stmt> },
    Break,
    Continue,
    Return,
    Case {
        scrutinee: Expr,
        arms: Vec<CaseArm>,
        else_body: Option<Vec<Stmt>>,
    },
    Asm { parts: Vec<AsmPart> },
    /// A call in statement position.
    Expr(Expr),
}

/// `var` declaration.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: Name,
    pub ty: Option<TypeRef>,
    pub init: Option<Init>,
}

/// Variable initializer.
#[derive(Debug, Clone)]
pub enum Init {
    Expr(Expr),
    /// Brace-list initializer for arrays: `{1, 2, 3}`.
    List(Vec<Expr>),
}

/// One `when` arm of a `case`; multiple values share one body.
#[derive(Debug, Clone)]
pub struct CaseArm {
    pub values: Vec<Expr>,
    pub body: Vec<Stmt>,
}

/// Piece of an `@asm` statement.
#[derive(Debug, Clone)]
pub enum AsmPart {
    Text(String),
    Var(Name),
}

/// Record declaration; `base` is the single inherited record, if any.
#[derive(Debug, Clone)]
pub struct RecordDecl {
    pub name: Name,
    pub base: Option<Name>,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: Name,
    pub ty: TypeRef,
    /// Explicit byte offset from `@at(n)`.
    pub at: Option<Expr>,
    pub pos: Pos,
}

/// Interface declaration: a typed function-pointer shape.
#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: Name,
    pub params: Vec<ParamDecl>,
    pub rets: Vec<ParamDecl>,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Name,
    pub ty: TypeRef,
    pub pos: Pos,
}

/// How a `sub` statement was introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    /// Plain definition with a body.
    Normal,
    /// `@decl sub F(...);` - signature only.
    Decl,
    /// `@impl sub F is ... end sub;` - body for an earlier `@decl`.
    Impl,
}

/// Subroutine declaration or definition.
#[derive(Debug, Clone)]
pub struct SubDecl {
    pub name: Name,
    pub kind: SubKind,
    pub params: Vec<ParamDecl>,
    pub rets: Vec<ParamDecl>,
    /// `implements I`: signature and storage come from interface `I`.
    pub implements: Option<Name>,
    /// `@extern("label")` linkage name.
    pub extern_name: Option<String>,
    pub body: Option<Vec<Stmt>>,
}
