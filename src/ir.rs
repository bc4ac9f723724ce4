//! Typed intermediate representation for scripts.
//!
//! Expressions carry a static [`Type`] computed while the graph is
//! lowered; statements are a flat enum close to the source opcodes.
//! Code generation consumes this tree without further analysis.

use crate::types::{Constant, Type};

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub ty: Type,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(ty: Type, kind: ExprKind) -> Self {
        Self { ty, kind }
    }

    pub fn constant(ty: Type, value: Constant) -> Self {
        Self::new(ty, ExprKind::Const(value))
    }

    pub fn number(ty: Type, value: f64) -> Self {
        Self::constant(ty, Constant::Number(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(Type::Boolean, Constant::Bool(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::constant(Type::Str, Constant::Text(value.into()))
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match &self.kind {
            ExprKind::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, ExprKind::Const(_))
    }
}

/// Comparison operators, in the order the safe-compare tables index them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    pub fn table_index(self) -> usize {
        match self {
            CmpOp::Eq => 0,
            CmpOp::Ne => 1,
            CmpOp::Gt => 2,
            CmpOp::Ge => 3,
            CmpOp::Lt => 4,
            CmpOp::Le => 5,
        }
    }

    pub fn complement(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Lt => CmpOp::Ge,
        }
    }

    pub fn js(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }

    /// Apply the comparison to an already-ordered pair.
    pub fn eval(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CmpOp::Eq => ord == Equal,
            CmpOp::Ne => ord != Equal,
            CmpOp::Gt => ord == Greater,
            CmpOp::Ge => ord != Less,
            CmpOp::Lt => ord == Less,
            CmpOp::Le => ord != Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Abs,
    Floor,
    Ceiling,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Ln,
    Log,
    PowE,
    Pow10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Year,
    Month,
    Date,
    DayOfWeek,
    Hour,
    Minute,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenParam {
    Color,
    Saturation,
    Brightness,
    Transparency,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Constant),
    /// Runtime conversion of `from` to the carrying [`Type`].
    Convert {
        from: Box<Expr>,
    },
    Arg(String),
    Var(String),
    ListContents(String),
    ListLen(String),
    ListItem {
        list: String,
        index: Box<Expr>,
    },
    ListIndexOf {
        list: String,
        item: Box<Expr>,
    },
    ListContains {
        list: String,
        item: Box<Expr>,
    },
    Counter,
    XPosition,
    YPosition,
    Direction,
    Size,
    Answer,
    Volume,
    KeyPressed(Box<Expr>),
    MouseX,
    MouseY,
    MouseDown,
    Timer,
    DaysSince2000,
    Current(DateField),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Random {
        from: Box<Expr>,
        to: Box<Expr>,
        fractional: bool,
    },
    Round(Box<Expr>),
    MathOp {
        op: MathFn,
        num: Box<Expr>,
    },
    Join(Box<Expr>, Box<Expr>),
    StrLen(Box<Expr>),
    LetterOf {
        string: Box<Expr>,
        letter: Box<Expr>,
    },
    StrContains {
        string: Box<Expr>,
        substring: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Broadcast(Expr),
    BroadcastWait(Expr),
    Wait(Expr),
    WaitUntil(Expr),
    CreateClone(Expr),
    DeleteThisClone,
    If {
        cond: Expr,
        then: Vec<Stmt>,
    },
    IfElse {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Repeat {
        times: Expr,
        body: Vec<Stmt>,
    },
    ForEach {
        var: String,
        times: Expr,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Forever(Vec<Stmt>),
    StopAll,
    StopScript,
    ClearCounter,
    IncrCounter,
    GoToXY {
        x: Expr,
        y: Expr,
    },
    GoTo(Expr),
    PointTowards(Expr),
    Glide {
        secs: Expr,
        x: Expr,
        y: Expr,
    },
    SetX(Expr),
    ChangeX(Expr),
    SetY(Expr),
    ChangeY(Expr),
    MoveSteps(Expr),
    PointInDirection(Expr),
    TurnRight(Expr),
    TurnLeft(Expr),
    Show,
    Hide,
    Say(Expr),
    SayForSecs {
        message: Expr,
        secs: Expr,
    },
    SwitchBackdrop(Expr),
    SwitchBackdropWait(Expr),
    SetVolume(Expr),
    ChangeVolume(Expr),
    ResetTimer,
    AskAndWait(Expr),
    PenDown,
    PenUp,
    PenClear,
    PenStamp,
    SetPenSize(Expr),
    ChangePenSize(Expr),
    SetPenParam {
        param: PenParam,
        value: Expr,
    },
    ChangePenParam {
        param: PenParam,
        value: Expr,
    },
    SetPenHue(Expr),
    ChangePenHue(Expr),
    SetPenColor(Expr),
    SetVar {
        var: String,
        value: Expr,
    },
    ChangeVar {
        var: String,
        delta: Expr,
    },
    ShowVar(String),
    HideVar(String),
    AddToList {
        list: String,
        item: Expr,
    },
    DeleteOfList {
        list: String,
        index: Expr,
    },
    DeleteAllOfList(String),
    InsertAtList {
        list: String,
        index: Expr,
        item: Expr,
    },
    ReplaceItemOfList {
        list: String,
        index: Expr,
        item: Expr,
    },
    ShowList {
        list: String,
        name: String,
    },
    HideList {
        name: String,
    },
    CallProcedure {
        proccode: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcInfo {
    pub proccode: String,
    pub warp: bool,
    pub arg_names: Vec<String>,
    pub arg_ids: Vec<String>,
    pub arg_types: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HatKind {
    FlagClicked,
    KeyPressed(String),
    BroadcastReceived(String),
    StartAsClone,
    ProcedureDefinition(ProcInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub hat: HatKind,
    pub body: Vec<Stmt>,
    /// Whether running the script can suspend across frames.
    pub suspends: bool,
}
