//! JavaScript emission from the typed IR.
//!
//! Every decision that could fail was made while the IR was built, so
//! emission is infallible. The generated code leans on the runtime
//! helpers named in [`crate::names::RESERVED`] and uses the static
//! types to skip conversions and to use bare comparison operators
//! whenever NaN cannot leak through.

use crate::ir::{CmpOp, DateField, Expr, ExprKind, HatKind, MathFn, PenParam, Stmt};
use crate::names::Names;
use crate::opt::{push_not, push_not_cost};
use crate::project::Target;
use crate::stmt::SpriteIr;
use crate::types::{format_number, js_round, parse_number, to_int32, Constant, Type};
use crate::Settings;
use log::warn;
use serde_json::Value;
use std::collections::HashSet;

/// Output for one target: the sprite closure plus, for the stage, the
/// global variable declarations that must precede every closure.
pub struct TargetCode {
    pub code: String,
    pub globals: String,
}

pub struct Emitter<'a> {
    settings: &'a Settings,
    names: &'a Names,
    comment_procs: &'a HashSet<String>,
    sep: &'static str,
}

fn escape_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_default()
}

fn stringish(ty: Type) -> bool {
    matches!(ty, Type::Str | Type::IntStr | Type::Any | Type::Undefined)
}

/// A string with no cased letters compares the same either way.
fn caseless(s: &str) -> bool {
    s.to_lowercase() == s.to_uppercase()
}

/// Runtime conversion between value representations.
fn convert_js(val: String, from: Type, to: Type) -> String {
    if from == to {
        return val;
    }
    match to {
        Type::Int => {
            if from == Type::Boolean {
                format!("+({})", val)
            } else if stringish(from) {
                format!("Math.floor(+({}))", val)
            } else {
                format!("Math.floor({})", val)
            }
        }
        Type::Float | Type::Number => {
            if from == Type::Boolean {
                format!("+({})", val)
            } else if from == Type::Float && to == Type::Number {
                format!("({})||0", val)
            } else if stringish(from) {
                format!("+({})||0", val)
            } else {
                val
            }
        }
        Type::Boolean => {
            if matches!(from, Type::Int | Type::Number | Type::Float) {
                format!("!!({})", val)
            } else {
                format!("toBool({})", val)
            }
        }
        Type::Str => format!("\"\"+({})", val),
        _ => val,
    }
}

/// Constant emission under a given static type.
fn const_js(ty: Type, c: &Constant) -> String {
    // 1 / -0 matters, so the sign must survive into the source text.
    if c.is_neg_zero() && matches!(ty, Type::Int | Type::Float | Type::Number) {
        return "-0".to_string();
    }
    match ty {
        Type::Int => {
            let n = c.as_number();
            let n = if n.is_nan() { 0.0 } else { n };
            format_number(n.floor())
        }
        Type::Float => {
            let n = c.as_number();
            if n.is_nan() {
                "NaN".to_string()
            } else {
                format_number(n)
            }
        }
        Type::Number => {
            let n = c.as_number();
            let n = if n.is_nan() { 0.0 } else { n };
            format_number(n)
        }
        Type::Boolean => c.truthy().to_string(),
        _ => escape_str(&c.to_display()),
    }
}

/// Whether a bare JavaScript comparison gives Scratch's answer for
/// these operand types. NaN breaks ordering comparisons and strings
/// must not be compared against numbers without conversion.
fn safe_compare(op: CmpOp, left: &Expr, right: &Expr) -> bool {
    let idx = op.table_index();
    let clean = |t: Type| matches!(t, Type::Number | Type::Int | Type::Boolean);

    if left.ty == Type::Float && right.ty == Type::Float {
        // NaN fails every comparison including its own equality.
        return false;
    }
    if left.ty == Type::Float && clean(right.ty) {
        return [true, true, false, false, true, true][idx];
    }
    if clean(left.ty) && right.ty == Type::Float {
        return [true, true, true, true, false, false][idx];
    }

    let side = |e: &Expr| {
        e.ty != Type::Any
            && e.ty != Type::Float
            && (!matches!(e.ty, Type::Str | Type::IntStr)
                || e.as_const().map_or(false, Constant::is_numeric))
    };
    side(left) && side(right)
}

fn cmp_helper(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "equals",
        CmpOp::Ne => "notEqual",
        CmpOp::Gt => "greaterThan",
        CmpOp::Ge => "greaterThanEqual",
        CmpOp::Lt => "lessThan",
        CmpOp::Le => "lessThanEqual",
    }
}

/// Normalize a key-press hat or menu value to the runtime's key name.
fn key_name(key: &str) -> String {
    let up = key.to_uppercase();
    match up.as_str() {
        "LEFT ARROW" => "ARROWLEFT".to_string(),
        "RIGHT ARROW" => "ARROWRIGHT".to_string(),
        "UP ARROW" => "ARROWUP".to_string(),
        "DOWN ARROW" => "ARROWDOWN".to_string(),
        "SPACE" => " ".to_string(),
        _ => up,
    }
}

/// Initial value of a variable as a JavaScript literal.
fn init_js(value: &Value) -> String {
    match value {
        Value::String(s) => escape_str(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(0.0)),
        _ => "\"\"".to_string(),
    }
}

fn list_init_js(value: &Value) -> String {
    let items = value
        .as_array()
        .map(|arr| arr.iter().map(init_js).collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    format!("[{}]", items)
}

impl<'a> Emitter<'a> {
    pub fn new(settings: &'a Settings, names: &'a Names, ir: &'a SpriteIr) -> Self {
        Self {
            settings,
            names,
            comment_procs: &ir.comment_procs,
            sep: if settings.minify { "" } else { "\n" },
        }
    }

    fn member(&self, member: crate::names::Member) -> &str {
        self.names.member(member)
    }

    /// Compile one target into its sprite closure.
    pub fn target(&self, index: usize, target: &Target, ir: &SpriteIr, decls: &str) -> TargetCode {
        use crate::names::Member;

        let mut code = format!(
            "sprites[{i}]=new (spriteDefs[{i}]=function(){{const self=this;const id={i};const stage=sprites[0];",
            i = index
        );

        // Key press scripts, grouped per key.
        let mut keys: Vec<(String, Vec<String>)> = Vec::new();
        for script in &ir.scripts {
            if let HatKind::KeyPressed(key) = &script.hat {
                let escaped = escape_str(&key_name(key));
                let gen = format!("function*(){{{}}}", self.stmts(&script.body, false));
                match keys.iter_mut().find(|(k, _)| *k == escaped) {
                    Some((_, v)) => v.push(gen),
                    None => keys.push((escaped, vec![gen])),
                }
            }
        }
        code.push_str(&format!("self.{}={{", self.member(Member::KeyScripts)));
        code.push_str(
            &keys
                .iter()
                .map(|(k, v)| format!("{}:[{}]", k, v.join(",")))
                .collect::<Vec<_>>()
                .join(","),
        );
        code.push_str("};");

        // Broadcast receivers, keyed by the lowercased escaped name.
        let mut broads: Vec<(String, Vec<String>)> = Vec::new();
        for script in &ir.scripts {
            if let HatKind::BroadcastReceived(name) = &script.hat {
                let escaped = escape_str(name).to_lowercase();
                let gen = format!("function*(){{{}}}", self.stmts(&script.body, false));
                match broads.iter_mut().find(|(k, _)| *k == escaped) {
                    Some((_, v)) => v.push(gen),
                    None => broads.push((escaped, vec![gen])),
                }
            }
        }
        code.push_str(&format!("self.{}={{", self.member(Member::Broadcasts)));
        code.push_str(
            &broads
                .iter()
                .map(|(k, v)| format!("{}:[{}]", k, v.join(",")))
                .collect::<Vec<_>>()
                .join(","),
        );
        code.push_str("};");

        // Green flag scripts.
        code.push_str(&format!("self.{}=[", self.member(Member::FlagScripts)));
        code.push_str(
            &ir.scripts
                .iter()
                .filter(|s| s.hat == HatKind::FlagClicked)
                .map(|s| format!("function*(){{{}}}", self.stmts(&s.body, false)))
                .collect::<Vec<_>>()
                .join(","),
        );
        code.push_str("];");

        // Custom blocks, in definition order.
        for script in &ir.scripts {
            let HatKind::ProcedureDefinition(info) = &script.hat else {
                continue;
            };
            if script.body.is_empty() || self.comment_procs.contains(&info.proccode) {
                continue;
            }
            let Some(token) = self.names.procedure_name(&info.proccode) else {
                continue;
            };
            let args = (0..info.arg_names.len())
                .map(Names::argument)
                .collect::<Vec<_>>()
                .join(",");
            code.push_str(&format!(
                "const {}=function*({}){{{}}};",
                token,
                args,
                self.stmts(&script.body, info.warp)
            ));
        }

        let mut globals = String::new();
        if target.is_stage {
            globals.push_str(decls);
        } else {
            code.push_str(decls);
        }

        if !target.is_stage {
            code.push_str(&format!(
                "self.{}={};",
                self.member(Member::X),
                format_number(target.x)
            ));
            code.push_str(&format!(
                "self.{}={};",
                self.member(Member::Y),
                format_number(target.y)
            ));
            code.push_str(&format!(
                "self.{}={};",
                self.member(Member::Direction),
                format_number(target.direction)
            ));
            code.push_str(&format!(
                "self.{}={};",
                self.member(Member::Showing),
                target.visible
            ));
            code.push_str(&format!("self.{}=0;", self.member(Member::PenDown)));
            code.push_str(&format!("self.{}=[200/3,1,1];", self.member(Member::PenColor)));
            code.push_str(&format!("self.{}=1;", self.member(Member::PenAlpha)));
            code.push_str(&format!("self.{}=2;", self.member(Member::PenSize)));
        }
        code.push_str(&format!("self.{}=100;", self.member(Member::Volume)));
        code.push_str("});");
        code.push_str(self.sep);

        TargetCode { code, globals }
    }

    /// Emit a statement sequence. `warp` suppresses the loop yields.
    fn stmts(&self, stmts: &[Stmt], warp: bool) -> String {
        use crate::names::Member;
        let mut res = String::new();
        let mut i = 0;
        while i < stmts.len() {
            let text = match &stmts[i] {
                // Putting the pen down and straight back up stamps a
                // single dot.
                Stmt::PenDown => {
                    let mut s = if matches!(stmts.get(i + 1), Some(Stmt::PenUp)) {
                        i += 1;
                        format!("self.{}=0;", self.member(Member::PenDown))
                    } else {
                        format!("self.{}=1;", self.member(Member::PenDown))
                    };
                    let (x, y) = (self.member(Member::X), self.member(Member::Y));
                    s.push_str(&format!(
                        "drawPen(self.{x},self.{y},self.{x},self.{y},self.{},self.{},self.{});",
                        self.member(Member::PenColor),
                        self.member(Member::PenAlpha),
                        self.member(Member::PenSize),
                    ));
                    s
                }
                // Consecutive appends to one list become a single push.
                Stmt::AddToList { list, item } => {
                    let mut parts = vec![self.val(item)];
                    while let Some(Stmt::AddToList {
                        list: next_list,
                        item: next_item,
                    }) = stmts.get(i + 1)
                    {
                        if next_list != list {
                            break;
                        }
                        parts.push(self.val(next_item));
                        i += 1;
                    }
                    format!("{}.push({});", list, parts.join(","))
                }
                other => self.stmt(other, warp),
            };
            if !text.is_empty() {
                res.push_str(&text);
                res.push_str(self.sep);
            }
            i += 1;
        }
        res
    }

    fn loop_yield(&self, warp: bool) -> &'static str {
        if warp {
            ""
        } else {
            "yield"
        }
    }

    fn stmt(&self, stmt: &Stmt, warp: bool) -> String {
        use crate::names::Member;
        let x = self.member(Member::X);
        let y = self.member(Member::Y);
        let dir = self.member(Member::Direction);

        match stmt {
            Stmt::Broadcast(e) => format!("broadcast({});", self.val(e)),
            Stmt::BroadcastWait(e) => format!("yield*broadcastWait({});", self.val(e)),

            Stmt::Wait(dur) => match dur.as_const() {
                Some(c) if c.as_number() == f64::INFINITY => "for(;;)yield;".to_string(),
                Some(c) => format!(
                    "for(const _=Date.now();Date.now()-_<{};)yield;",
                    format_number(1000.0 * c.as_number())
                ),
                None => format!(
                    "for(const _=Date.now();Date.now()-_<1e3*({});)yield;",
                    self.val(dur)
                ),
            },

            Stmt::WaitUntil(cond) => match cond.as_const() {
                Some(c) if !c.truthy() => "for(;;)yield;".to_string(),
                _ => format!(
                    "while({})yield;",
                    self.val(&push_not(cond.clone(), self.settings.precompute))
                ),
            },

            Stmt::CreateClone(_) => "createClone(self);".to_string(),
            Stmt::DeleteThisClone => "deleteClone(self);return;".to_string(),

            Stmt::If { cond, then } => {
                if then.is_empty() {
                    String::new()
                } else {
                    format!("if({}){{{}}}", self.val(cond), self.stmts(then, warp))
                }
            }

            Stmt::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if then.is_empty() && otherwise.is_empty() {
                    String::new()
                } else if then.is_empty() {
                    let flipped = push_not(cond.clone(), self.settings.precompute);
                    format!("if({}){{{}}}", self.val(&flipped), self.stmts(otherwise, warp))
                } else if otherwise.is_empty() {
                    format!("if({}){{{}}}", self.val(cond), self.stmts(then, warp))
                } else if push_not_cost(cond) > 0 {
                    // Fewer negations when the branches trade places.
                    let flipped = push_not(cond.clone(), self.settings.precompute);
                    format!(
                        "if({}){{{}}}else{{{}}}",
                        self.val(&flipped),
                        self.stmts(otherwise, warp),
                        self.stmts(then, warp)
                    )
                } else {
                    format!(
                        "if({}){{{}}}else{{{}}}",
                        self.val(cond),
                        self.stmts(then, warp),
                        self.stmts(otherwise, warp)
                    )
                }
            }

            Stmt::Repeat { times, body } => match times.as_const() {
                Some(c) if js_round(c.as_number()) == 1.0 => {
                    let mut s = self.stmts(body, warp);
                    if !warp {
                        s.push_str("yield;");
                    }
                    s
                }
                Some(c) => format!(
                    "for(let _=0;_++<{};){{{}{}}}",
                    format_number(js_round(c.as_number())),
                    self.stmts(body, warp),
                    self.loop_yield(warp)
                ),
                None if times.ty == Type::Int => format!(
                    "for(let _={};_-->0;){{{}{}}}",
                    self.val(times),
                    self.stmts(body, warp),
                    self.loop_yield(warp)
                ),
                None => format!(
                    "for(let _={};_-->=.5;){{{}{}}}",
                    self.val(times),
                    self.stmts(body, warp),
                    self.loop_yield(warp)
                ),
            },

            Stmt::ForEach { var, times, body } => format!(
                "for(let _=0;_++<{};){{{}=_;{}{}}}",
                self.val(times),
                var,
                self.stmts(body, warp),
                self.loop_yield(warp)
            ),

            Stmt::While { cond, body } => {
                if body.is_empty() {
                    format!("while({})yield;", self.val(cond))
                } else {
                    format!(
                        "while({}){{{}{}}}",
                        self.val(cond),
                        self.stmts(body, warp),
                        self.loop_yield(warp)
                    )
                }
            }

            Stmt::Forever(body) => {
                if body.is_empty() {
                    "for(;;)yield;".to_string()
                } else {
                    format!("for(;;){{{}{}}}", self.stmts(body, warp), self.loop_yield(warp))
                }
            }

            Stmt::StopAll => "iterators=[];return;".to_string(),
            Stmt::StopScript => "return;".to_string(),
            Stmt::ClearCounter => "counter=0;".to_string(),
            Stmt::IncrCounter => "counter++;".to_string(),

            Stmt::GoToXY { x: tx, y: ty } => {
                format!("gotoXY(self,{},{});", self.val(tx), self.val(ty))
            }
            Stmt::GoTo(_) => "gotoXY(self,0,0);".to_string(),
            Stmt::PointTowards(_) => ";".to_string(),

            Stmt::Glide { secs, x: tx, y: ty } => {
                let (gx, gy) = (self.val(tx), self.val(ty));
                let head = match secs.as_const() {
                    Some(c) if c.as_number() == 0.0 => {
                        return format!("gotoXY(self,{},{});", gx, gy);
                    }
                    Some(c) => format!(
                        "for(let _=Date.now(),$=[self.{x},self.{y}],__=0;(__=(Date.now()-_)/({}))<1;)",
                        format_number(1000.0 * c.as_number())
                    ),
                    None => format!(
                        "for(let _=Date.now(),$=[self.{x},self.{y}],__=0;(__=(Date.now()-_)/1e3/({}))<1;)",
                        self.val(secs)
                    ),
                };
                format!(
                    "{head}gotoXY(self,__*({gx})+(1-__)*$[0],__*({gy})+(1-__)*$[1]);gotoXY(self,{gx},{gy});"
                )
            }

            Stmt::SetX(e) => format!("gotoXY(self,{},self.{y});", self.val(e)),
            Stmt::ChangeX(e) => format!("gotoXY(self,self.{x}+({}),self.{y});", self.val(e)),
            Stmt::SetY(e) => format!("gotoXY(self,self.{x},{});", self.val(e)),
            Stmt::ChangeY(e) => format!("gotoXY(self,self.{x},self.{y}+({}));", self.val(e)),
            Stmt::MoveSteps(e) => {
                let steps = self.val(e);
                format!(
                    "gotoXY(self,self.{x}+Math.sin(self.{dir})*({steps}),self.{y}+Math.cos(self.{dir})*({steps}));"
                )
            }
            Stmt::PointInDirection(e) => match e.as_const() {
                Some(c) => {
                    let d = c.as_number();
                    let wrapped =
                        0.017453292519943295 * ((((d + 179.0) % 360.0 + 360.0) % 360.0) - 179.0);
                    format!("self.{dir}={};", format_number(wrapped))
                }
                None => format!(
                    "self.{dir}=0.017453292519943295*(modulo((({})+179),360)-179);",
                    self.val(e)
                ),
            },
            Stmt::TurnRight(e) => format!(
                "self.{dir}+=0.017453292519943295*(modulo((({})+179),360)-179);",
                self.val(e)
            ),
            Stmt::TurnLeft(e) => format!(
                "self.{dir}-=0.017453292519943295*(modulo((({})+179),360)-179);",
                self.val(e)
            ),

            Stmt::Show => format!("self.{}=1;", self.member(Member::Showing)),
            Stmt::Hide => format!("self.{}=0;", self.member(Member::Showing)),
            Stmt::Say(_) => ";".to_string(),
            Stmt::SayForSecs { secs, .. } => match secs.as_const() {
                Some(c) if c.as_number() == f64::INFINITY => ";for(;;)yield;".to_string(),
                _ => format!(
                    ";for(let _=Date.now();Date.now()-_<1e3*({});)yield;;",
                    self.val(secs)
                ),
            },
            Stmt::SwitchBackdrop(_) => ";".to_string(),
            Stmt::SwitchBackdropWait(_) => "yield;".to_string(),

            Stmt::SetVolume(e) => format!("self.{}={};", self.member(Member::Volume), self.val(e)),
            Stmt::ChangeVolume(e) => {
                let vol = self.member(Member::Volume);
                format!(
                    "self.{vol}=Math.max(0,Math.min(100,self.{vol}+({})));",
                    self.val(e)
                )
            }

            Stmt::ResetTimer => "start=Date.now();".to_string(),
            Stmt::AskAndWait(e) => format!("yield*askWait({});", self.val(e)),

            // Bare fallthrough case; the paired form is handled in the
            // sequence walk.
            Stmt::PenDown => format!("self.{}=1;", self.member(Member::PenDown)),
            Stmt::PenUp => format!("self.{}=0;", self.member(Member::PenDown)),
            Stmt::PenClear => "penClear();".to_string(),
            Stmt::PenStamp => ";".to_string(),
            Stmt::SetPenSize(e) => format!("self.{}={};", self.member(Member::PenSize), self.val(e)),
            Stmt::ChangePenSize(e) => {
                format!("self.{}+={};", self.member(Member::PenSize), self.val(e))
            }

            Stmt::SetPenParam { param, value } => {
                let col = self.member(Member::PenColor);
                let alpha = self.member(Member::PenAlpha);
                match (param, value.as_const()) {
                    (PenParam::Color, _) => format!("self.{col}[0]={};", self.val(value)),
                    (PenParam::Saturation, Some(c)) => {
                        format!("self.{col}[1]={};", format_number(c.as_number() / 100.0))
                    }
                    (PenParam::Saturation, None) => {
                        format!("self.{col}[1]=({})/100;", self.val(value))
                    }
                    (PenParam::Brightness, Some(c)) => {
                        format!("self.{col}[2]={};", format_number(c.as_number() / 100.0))
                    }
                    (PenParam::Brightness, None) => {
                        format!("self.{col}[2]=({})/100;", self.val(value))
                    }
                    (PenParam::Transparency, Some(c)) => format!(
                        "self.{alpha}={};",
                        format_number(1.0 - c.as_number() / 100.0)
                    ),
                    (PenParam::Transparency, None) => {
                        format!("self.{alpha}=1-({})/100;", self.val(value))
                    }
                }
            }

            Stmt::ChangePenParam { param, value } => {
                let col = self.member(Member::PenColor);
                let alpha = self.member(Member::PenAlpha);
                match (param, value.as_const()) {
                    (PenParam::Color, _) => format!("self.{col}[0]+={};", self.val(value)),
                    (PenParam::Saturation, Some(c)) => format!(
                        "self.{col}[1]=Math.min(100,Math.max(0,self.{col}[1]+({})));",
                        format_number(c.as_number() / 100.0)
                    ),
                    (PenParam::Saturation, None) => format!(
                        "self.{col}[1]=Math.min(100,Math.max(0,self.{col}[1]+({})/100));",
                        self.val(value)
                    ),
                    (PenParam::Brightness, Some(c)) => format!(
                        "self.{col}[2]=Math.min(100,Math.max(0,self.{col}[2]+({})));",
                        format_number(c.as_number() / 100.0)
                    ),
                    (PenParam::Brightness, None) => format!(
                        "self.{col}[2]=Math.min(100,Math.max(0,self.{col}[2]+({})/100));",
                        self.val(value)
                    ),
                    (PenParam::Transparency, Some(c)) => format!(
                        "self.{alpha}=Math.max(0,Math.min(1,self.{alpha}+{}));",
                        format_number(1.0 - c.as_number() / 100.0)
                    ),
                    (PenParam::Transparency, None) => format!(
                        "self.{alpha}=Math.max(0,Math.min(1,1+self.{alpha}-({})/100));",
                        self.val(value)
                    ),
                }
            }

            Stmt::SetPenHue(e) => {
                format!("self.{}[0]=({})/2;", self.member(Member::PenColor), self.val(e))
            }
            Stmt::ChangePenHue(e) => {
                format!("self.{}[0]+=({})/2;", self.member(Member::PenColor), self.val(e))
            }

            Stmt::SetPenColor(e) => self.set_pen_color(e),

            Stmt::SetVar { var, value } => format!("{}={};", var, self.val(value)),
            Stmt::ChangeVar { var, delta } => format!("{}+={};", var, self.val(delta)),
            Stmt::ShowVar(_) | Stmt::HideVar(_) => ";".to_string(),

            Stmt::AddToList { list, item } => format!("{}.push({});", list, self.val(item)),

            Stmt::DeleteOfList { list, index } => match index.as_const() {
                Some(c) if c.to_display() == "all" => format!("{}=[];", list),
                Some(c) if c.to_display() == "last" => format!("{}.pop();", list),
                None if matches!(index.ty, Type::Str | Type::Any) => {
                    format!("listDelete({},{});", list, self.val(index))
                }
                _ => format!("{}.splice({},1);", list, self.list_idx(list, index)),
            },

            Stmt::DeleteAllOfList(list) => format!("{}=[];", list),
            Stmt::InsertAtList { list, index, item } => {
                format!("listInsert({},{},{});", list, self.val(index), self.val(item))
            }
            Stmt::ReplaceItemOfList { list, index, item } => format!(
                "listReplace({},{},{});",
                list,
                self.list_idx(list, index),
                self.val(item)
            ),
            Stmt::ShowList { list, .. } => format!("showList({});", list),
            Stmt::HideList { name } => format!("hideList({});", escape_str(name)),

            Stmt::CallProcedure { proccode, args } => {
                if self.comment_procs.contains(proccode) {
                    return String::new();
                }
                let Some(token) = self.names.procedure_name(proccode) else {
                    warn!("Undefined custom block '{}'", proccode);
                    return String::new();
                };
                let args = args
                    .iter()
                    .map(|arg| match arg.as_const() {
                        // A numeric text argument can go in as source
                        // text without quoting.
                        Some(c) => {
                            let d = c.to_display();
                            if format_number(parse_number(&d)) == d && !c.is_neg_zero() {
                                d
                            } else {
                                self.val(arg)
                            }
                        }
                        None => self.val(arg),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                format!("yield*{}({});", token, args)
            }
        }
    }

    /// Precompute the HSV pen colour when the operand is constant.
    fn set_pen_color(&self, e: &Expr) -> String {
        use crate::names::Member;
        let col = self.member(Member::PenColor);
        let alpha = self.member(Member::PenAlpha);

        let Some(c) = e.as_const() else {
            return if e.ty == Type::Int {
                format!("[self.{col},self.{alpha}]=penColInt({});", self.val(e))
            } else {
                format!("[self.{col},self.{alpha}]=penCol({});", self.val(e))
            };
        };

        let display = c.to_display();
        let mut num = if !c.is_numeric() && display.starts_with('#') {
            i64::from_str_radix(&display[1..], 16)
                .map(|v| v as f64)
                .unwrap_or(f64::NAN)
        } else {
            c.as_number()
        };
        if num.is_nan() {
            num = 0.0;
        }

        let bits = to_int32(num);
        let rgb = [
            ((bits >> 16) & 255) as f64 / 255.0,
            ((bits >> 8) & 255) as f64 / 255.0,
            (bits & 255) as f64 / 255.0,
        ];
        let max = rgb[0].max(rgb[1]).max(rgb[2]);
        let chroma = max - rgb[0].min(rgb[1]).min(rgb[2]);

        let hue = if chroma == 0.0 {
            0.0
        } else if max == rgb[0] {
            50.0 / 3.0 * (((rgb[1] - rgb[2]) / chroma) % 6.0)
        } else if max == rgb[1] {
            50.0 / 3.0 * ((rgb[2] - rgb[0]) / chroma + 2.0)
        } else {
            50.0 / 3.0 * ((rgb[0] - rgb[1]) / chroma + 4.0)
        };
        let sat = if max != 0.0 { chroma / max } else { 0.0 };

        let alpha_byte = ((bits as u32) >> 24) & 255;
        let alpha_val = if alpha_byte != 0 {
            alpha_byte as f64 / 255.0
        } else {
            1.0
        };

        format!(
            "self.{col}=[{},{},{}];self.{alpha}={};",
            format_number(hue),
            format_number(sat),
            format_number(max),
            format_number(alpha_val)
        )
    }

    /// A list index expression, zero-based.
    fn list_idx(&self, list: &str, index: &Expr) -> String {
        if index.ty == Type::Int {
            return match index.as_const() {
                Some(c) => format_number(c.as_number() - 1.0),
                None => format!("({})-1", self.val(index)),
            };
        }
        if !stringish(index.ty) {
            return match index.as_const() {
                Some(c) => format_number(c.as_number().floor() - 1.0),
                None if self.settings.unsafe_floor => format!("(({})|0)-1", self.val(index)),
                None => format!("Math.floor({})-1", self.val(index)),
            };
        }
        match index.as_const() {
            Some(c) => {
                let lower = c.to_display().to_lowercase();
                if lower == "last" {
                    format!("{}.length-1", list)
                } else if lower == "random" || lower == "any" {
                    if self.settings.unsafe_floor {
                        format!("(Math.random()*{}.length)|0", list)
                    } else {
                        format!("Math.floor(Math.random()*{}.length)", list)
                    }
                } else if c.is_numeric() {
                    format_number(c.as_number().floor() - 1.0)
                } else {
                    "-1".to_string()
                }
            }
            None => format!("listIdx({}.length,{})", list, self.val(index)),
        }
    }

    /// Compile a value converted to `target`. Constants convert at
    /// compile time.
    fn cvt(&self, e: &Expr, target: Type) -> String {
        if e.ty == target {
            return self.val(e);
        }
        match e.as_const() {
            Some(c) => const_js(target, c),
            None => convert_js(self.val(e), e.ty, target),
        }
    }

    fn val(&self, e: &Expr) -> String {
        use crate::names::Member;

        match &e.kind {
            ExprKind::Const(c) => const_js(e.ty, c),
            ExprKind::Convert { from } => convert_js(self.val(from), from.ty, e.ty),
            ExprKind::Arg(name) => name.clone(),
            ExprKind::Var(token) => token.clone(),

            ExprKind::ListContents(list) => format!("listStr({})", list),
            ExprKind::ListLen(list) => format!("{}.length", list),

            ExprKind::ListItem { list, index } => {
                let idx = self.list_idx(list, index);
                if index.is_const() {
                    if let Ok(n) = idx.parse::<f64>() {
                        if n <= -1.0 {
                            return "\"\"".to_string();
                        }
                    }
                }
                format!("{}[{}]??\"\"", list, idx)
            }

            ExprKind::ListIndexOf { list, item } => match item.as_const() {
                Some(c) if !c.is_numeric() => {
                    let d = c.to_display();
                    if caseless(&d) {
                        format!("{}.indexOf({})+1", list, escape_str(&d))
                    } else {
                        format!(
                            "{}.findIndex(_=>(_+\"\").toLowerCase()=={})+1",
                            list,
                            escape_str(&d.to_lowercase())
                        )
                    }
                }
                Some(c) => format!(
                    "{}.findIndex(_=>(+_||0)=={})+1",
                    list,
                    format_number(c.as_number())
                ),
                None => format!("{}.findIndex(_=>equals(_,{}))+1", list, self.val(item)),
            },

            ExprKind::ListContains { list, item } => match item.as_const() {
                Some(c) if !c.is_numeric() => {
                    let d = c.to_display();
                    if caseless(&d) {
                        format!("{}.includes({})", list, escape_str(&d))
                    } else {
                        format!(
                            "!{}.every(_=>(_+\"\").toLowerCase()!={})",
                            list,
                            escape_str(&d.to_lowercase())
                        )
                    }
                }
                Some(c) => format!("!{}.every(_=>(+_||0)!={})", list, format_number(c.as_number())),
                None => format!("!{}.every(_=>!equals(_,{}))", list, self.val(item)),
            },

            ExprKind::Counter => "counter".to_string(),
            ExprKind::XPosition => format!("self.{}", self.member(Member::X)),
            ExprKind::YPosition => format!("self.{}", self.member(Member::Y)),
            ExprKind::Direction => {
                format!("57.29577951308232*self.{}", self.member(Member::Direction))
            }
            ExprKind::Size => "100".to_string(),
            ExprKind::Answer => "answer".to_string(),
            ExprKind::Volume => format!("self.{}", self.member(Member::Volume)),

            ExprKind::KeyPressed(key) => self.key_pressed(key),

            ExprKind::MouseX => "mouseX".to_string(),
            ExprKind::MouseY => "mouseY".to_string(),
            ExprKind::MouseDown => "mouseDown".to_string(),
            ExprKind::Timer => "(Date.now()-start)/1e3".to_string(),
            ExprKind::DaysSince2000 => "Date.now()/864e5-10957".to_string(),

            ExprKind::Current(field) => match field {
                DateField::Year => "1900+new Date().getYear()",
                DateField::Month => "1+new Date().getMonth()",
                DateField::Date => "new Date().getDate()",
                DateField::DayOfWeek => "1+new Date().getDay()",
                DateField::Hour => "new Date().getHours()",
                DateField::Minute => "new Date().getMinutes()",
                DateField::Second => "new Date().getSeconds()",
            }
            .to_string(),

            ExprKind::Add(l, r) | ExprKind::Join(l, r) => {
                format!("({})+({})", self.val(l), self.val(r))
            }
            ExprKind::Sub(l, r) => {
                if l.as_const().map_or(false, |c| c.as_number() == 0.0) {
                    format!("-({})", self.val(r))
                } else {
                    format!("({})-({})", self.val(l), self.val(r))
                }
            }
            ExprKind::Mul(l, r) => format!("({})*({})", self.val(l), self.val(r)),
            ExprKind::Div(l, r) => format!("({})/({})", self.val(l), self.val(r)),
            ExprKind::Mod(l, r) => format!("modulo({},{})", self.val(l), self.val(r)),
            ExprKind::Round(n) => format!("Math.round({})", self.val(n)),

            ExprKind::MathOp { op, num } => self.math_op(*op, num),

            ExprKind::Random {
                from,
                to,
                fractional,
            } => {
                let helper = if e.ty == Type::Int {
                    "randInt"
                } else if *fractional {
                    "randFloat"
                } else {
                    "randNum"
                };
                format!("{}({},{})", helper, self.val(from), self.val(to))
            }

            ExprKind::StrLen(s) => format!("({}).length", self.val(s)),

            ExprKind::LetterOf { string, letter } => match letter.as_const() {
                Some(c) => format!(
                    "({})[{}]??\"\"",
                    self.val(string),
                    format_number(c.as_number() - 1.0)
                ),
                None => format!("({})[({})-1]??\"\"", self.val(string), self.val(letter)),
            },

            ExprKind::StrContains { string, substring } => {
                if let Some(c) = string.as_const() {
                    return format!(
                        "{}.includes(({}).toLowerCase())",
                        escape_str(&c.to_display().to_lowercase()),
                        self.val(substring)
                    );
                }
                match substring.as_const() {
                    Some(c) => {
                        let lower = c.to_display().to_lowercase();
                        if caseless(&c.to_display()) {
                            format!("({}).includes({})", self.val(string), escape_str(&lower))
                        } else {
                            format!(
                                "({}).toLowerCase().includes({})",
                                self.val(string),
                                escape_str(&lower)
                            )
                        }
                    }
                    None => format!(
                        "({}).toLowerCase().includes(({}).toLowerCase())",
                        self.val(string),
                        self.val(substring)
                    ),
                }
            }

            ExprKind::Compare { op, left, right } => self.compare(*op, left, right),

            ExprKind::And(l, r) => format!("({})&&({})", self.val(l), self.val(r)),
            ExprKind::Or(l, r) => format!("({})||({})", self.val(l), self.val(r)),
            ExprKind::Not(n) => format!("!({})", self.val(n)),
        }
    }

    fn key_pressed(&self, key: &Expr) -> String {
        let Some(c) = key.as_const() else {
            return format!("keyPressed({})", self.val(key));
        };
        if key.ty == Type::Str {
            let d = c.to_display();
            match d.to_uppercase().as_str() {
                "ANY" => "Object.values(keys).includes(true)".to_string(),
                "ENTER" => "keys.ENTER".to_string(),
                "SPACE" => "keys[\" \"]".to_string(),
                "LEFT ARROW" => "keys.ARROWLEFT".to_string(),
                "UP ARROW" => "keys.ARROWUP".to_string(),
                "RIGHT ARROW" => "keys.ARROWRIGHT".to_string(),
                "DOWN ARROW" => "keys.ARROWDOWN".to_string(),
                _ => {
                    let first: String = d
                        .chars()
                        .next()
                        .map(|ch| ch.to_uppercase().collect())
                        .unwrap_or_default();
                    if first.len() == 1 && "ABCDEFGHIJKLMNOPQRSTUVWXYZ_$".contains(&first) {
                        format!("keys.{}", first)
                    } else {
                        format!("keys[{}]", escape_str(&first))
                    }
                }
            }
        } else {
            // A numeric key is its character code.
            let code = c.as_number();
            let unit = if code.is_finite() {
                (code.floor() as i64).rem_euclid(65536) as u16
            } else {
                0
            };
            format!("keys[{}]", escape_str(&String::from_utf16_lossy(&[unit])))
        }
    }

    fn math_op(&self, op: MathFn, num: &Expr) -> String {
        let n = self.val(num);
        match op {
            MathFn::Floor => format!("Math.floor({})", n),
            MathFn::Ceiling => format!("Math.ceil({})", n),
            MathFn::Abs => format!("Math.abs({})", n),
            MathFn::Sqrt => format!("Math.sqrt({})", n),
            MathFn::Sin | MathFn::Cos => {
                let f = if op == MathFn::Sin { "sin" } else { "cos" };
                if self.settings.accurate_trig {
                    // Rounding hides the noise of the radian
                    // conversion, e.g. sin(180) coming out as 1.2e-16.
                    format!("Math.round(Math.{}(.017453292519943295*({}))*1e10)/1e10", f, n)
                } else {
                    format!("Math.{}(.017453292519943295*({}))", f, n)
                }
            }
            MathFn::Tan => format!("tan({})", n),
            MathFn::Asin => format!("57.29577951308232*Math.asin({})", n),
            MathFn::Acos => format!("57.29577951308232*Math.acos({})", n),
            MathFn::Atan => format!("57.29577951308232*Math.atan({})", n),
            MathFn::Ln => format!("Math.log({})", n),
            MathFn::Log => format!("Math.log({})/2.302585092994046", n),
            MathFn::PowE => format!("Math.exp({})", n),
            MathFn::Pow10 => format!("Math.pow(10,{})", n),
        }
    }

    /// The comparison ladder. Each rung peels off a case where a
    /// cheaper JavaScript form is provably equivalent; the runtime
    /// helpers are the last resort.
    fn compare(&self, op: CmpOp, left: &Expr, right: &Expr) -> String {
        let js = op.js();

        // A finite numeric constant equates natively against a float
        // conversion of the other side.
        if matches!(op, CmpOp::Eq | CmpOp::Ne) {
            if let Some(c) = left.as_const() {
                if c.is_numeric() && c.as_number().is_finite() {
                    return format!(
                        "{}{}({})",
                        format_number(c.as_number()),
                        js,
                        self.cvt(right, Type::Float)
                    );
                }
            }
            if let Some(c) = right.as_const() {
                if c.is_numeric() && c.as_number().is_finite() {
                    return format!(
                        "({}){}{}",
                        self.cvt(left, Type::Float),
                        js,
                        format_number(c.as_number())
                    );
                }
            }
        }

        // A non-numeric string constant forces a string comparison;
        // lowercasing only happens when the constant has cased letters.
        if let Some(c) = left.as_const() {
            if left.ty == Type::Str && !c.is_numeric() {
                let d = c.to_display();
                return if right.ty == Type::Str {
                    if caseless(&d) {
                        format!("{}{}({})", escape_str(&d), js, self.val(right))
                    } else {
                        format!(
                            "{}{}({}).toLowerCase()",
                            escape_str(&d.to_lowercase()),
                            js,
                            self.val(right)
                        )
                    }
                } else if caseless(&d) {
                    format!("{}{}({}).toString()", escape_str(&d), js, self.val(right))
                } else {
                    format!(
                        "{}{}({}).toString().toLowerCase()",
                        escape_str(&d.to_lowercase()),
                        js,
                        self.val(right)
                    )
                };
            }
        }
        if let Some(c) = right.as_const() {
            if right.ty == Type::Str && !c.is_numeric() {
                let d = c.to_display();
                return if left.ty == Type::Str {
                    if caseless(&d) {
                        format!("({}){}{}", self.val(left), js, escape_str(&d))
                    } else {
                        format!(
                            "({}).toLowerCase(){}{}",
                            self.val(left),
                            js,
                            escape_str(&d.to_lowercase())
                        )
                    }
                } else if caseless(&d) {
                    format!("({}).toString(){}{}", self.val(left), js, escape_str(&d))
                } else {
                    format!(
                        "({}).toString().toLowerCase(){}{}",
                        self.val(left),
                        js,
                        escape_str(&d.to_lowercase())
                    )
                };
            }
        }

        if safe_compare(op, left, right) {
            return format!(
                "({}){}({})",
                self.cvt(left, Type::Float),
                js,
                self.cvt(right, Type::Float)
            );
        }

        // Equality against a possibly-NaN side falls back to comparing
        // the lowercased string forms, which is what the runtime helper
        // does anyway.
        if matches!(op, CmpOp::Eq | CmpOp::Ne) {
            if matches!(left.ty, Type::Float | Type::Number | Type::Int) {
                return match left.as_const() {
                    Some(c) if !c.as_number().is_finite() => format!(
                        "{}{}(({})+\"\").toLowerCase()",
                        escape_str(&c.to_display().to_lowercase()),
                        js,
                        self.cvt(right, Type::Float)
                    ),
                    Some(c) => format!(
                        "{}{}({})",
                        format_number(c.as_number()),
                        js,
                        self.cvt(right, Type::Float)
                    ),
                    None => format!(
                        "(({})+\"\").toLowerCase(){}(({})+\"\").toLowerCase()",
                        self.cvt(left, Type::Float),
                        js,
                        self.cvt(right, Type::Float)
                    ),
                };
            }
            if matches!(right.ty, Type::Float | Type::Int) {
                return match right.as_const() {
                    Some(c) if !c.as_number().is_finite() => format!(
                        "(({})+\"\").toLowerCase(){}{}",
                        self.cvt(left, Type::Float),
                        js,
                        escape_str(&c.to_display().to_lowercase())
                    ),
                    Some(c) => format!(
                        "({}){}{}",
                        self.cvt(left, Type::Float),
                        js,
                        format_number(c.as_number())
                    ),
                    None => format!(
                        "(({})+\"\").toLowerCase(){}(({})+\"\").toLowerCase()",
                        self.cvt(left, Type::Float),
                        js,
                        self.cvt(right, Type::Float)
                    ),
                };
            }
        }

        // Ordered comparisons with NaN possible on only one side invert
        // the complementary operator, since NaN loses every comparison.
        let clean = |t: Type| matches!(t, Type::Number | Type::Int | Type::Boolean);
        match op {
            CmpOp::Gt if left.ty == Type::Float && clean(right.ty) => {
                return format!(
                    "!(({})<=({}))",
                    self.cvt(left, Type::Float),
                    self.cvt(right, Type::Number)
                );
            }
            CmpOp::Ge if left.ty == Type::Float && clean(right.ty) => {
                return format!(
                    "!(({})<({}))",
                    self.cvt(left, Type::Float),
                    self.cvt(right, Type::Number)
                );
            }
            CmpOp::Lt | CmpOp::Le if right.ty == Type::Float && clean(left.ty) => {
                return format!(
                    "!(({})>({}))",
                    self.cvt(left, Type::Float),
                    self.cvt(right, Type::Number)
                );
            }
            _ => {}
        }

        format!("{}({},{})", cmp_helper(op), self.val(left), self.val(right))
    }
}

/// Compile one target into its closure. Declaration tokens are
/// allocated up front so the emitter can hold `names` immutably; this
/// must run before the next target's IR is built, while the sprite's
/// local name table is still current.
pub fn emit_target(
    settings: &Settings,
    names: &mut Names,
    index: usize,
    target: &Target,
    ir: &SpriteIr,
) -> TargetCode {
    let mut decls = String::new();
    for (id, _, initial) in &target.variables {
        let token = names.variable(id);
        decls.push_str(&format!("let {}={};", token, init_js(initial)));
    }
    for (id, _, initial) in &target.lists {
        let token = names.variable(id);
        decls.push_str(&format!("let {}={};", token, list_init_js(initial)));
    }
    let emitter = Emitter::new(settings, names, ir);
    emitter.target(index, target, ir, &decls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::IrBuilder;
    use serde_json::json;
    use std::collections::HashMap;

    fn emit(project: serde_json::Value) -> String {
        let project = crate::project::Project::from_value(&project).unwrap();
        let settings = Settings::default();
        let mut names = Names::default();
        let mut init = String::new();
        let mut res = String::new();
        for (index, target) in project.targets.iter().enumerate() {
            let ir = IrBuilder::build_sprite(&settings, &mut names, target).unwrap();
            let out = emit_target(&settings, &mut names, index, target, &ir);
            init.push_str(&out.globals);
            res.push_str(&out.code);
        }
        res.push_str("flag()");
        init.push_str(&res);
        init
    }

    fn empty_ir() -> SpriteIr {
        SpriteIr {
            scripts: Vec::new(),
            procs: HashMap::new(),
            comment_procs: HashSet::new(),
        }
    }

    fn num(ty: Type, n: f64) -> Expr {
        Expr::number(ty, n)
    }

    fn arg(ty: Type) -> Expr {
        Expr::new(ty, ExprKind::Arg("a0".to_string()))
    }

    #[test]
    fn counting_loop_compiles_to_plain_for() {
        let js = emit(json!({
            "targets": [{
                "name": "Stage",
                "isStage": true,
                "variables": {"vid": ["n", 0]},
                "blocks": {
                    "hat": {"opcode": "event_whenflagclicked", "next": "set", "topLevel": true},
                    "set": {
                        "opcode": "data_setvariableto",
                        "inputs": {"VALUE": [1, [10, "1"]]},
                        "fields": {"VARIABLE": ["n", "vid"]},
                        "next": "rep"
                    },
                    "rep": {
                        "opcode": "control_repeat",
                        "inputs": {"TIMES": [1, [6, "3"]], "SUBSTACK": [2, "chg"]}
                    },
                    "chg": {
                        "opcode": "data_changevariableby",
                        "inputs": {"VALUE": [1, [4, "1"]]},
                        "fields": {"VARIABLE": ["n", "vid"]}
                    }
                }
            }]
        }));
        assert!(
            js.contains("for(let _=0;_++<3;){v0+=1;yield}"),
            "unexpected output: {}",
            js
        );
        assert!(js.starts_with("let v0=0;"));
        assert!(js.ends_with("flag()"));
    }

    #[test]
    fn warp_suppresses_loop_yields() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let repeat = Stmt::Repeat {
            times: arg(Type::Number),
            body: vec![Stmt::IncrCounter],
        };
        assert_eq!(em.stmt(&repeat, true), "for(let _=a0;_-->=.5;){counter++;}");
        assert_eq!(
            em.stmt(&repeat, false),
            "for(let _=a0;_-->=.5;){counter++;yield}"
        );
    }

    #[test]
    fn single_iteration_repeat_unrolls() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        // Counts round like the runtime does, so 1.4 is one iteration.
        let repeat = Stmt::Repeat {
            times: num(Type::Number, 1.4),
            body: vec![Stmt::IncrCounter],
        };
        assert_eq!(em.stmt(&repeat, true), "counter++;");
        // An unwarped single pass still ends its frame.
        assert_eq!(em.stmt(&repeat, false), "counter++;yield;");
    }

    #[test]
    fn integer_repeat_counts_down() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let repeat = Stmt::Repeat {
            times: arg(Type::Int),
            body: vec![Stmt::IncrCounter],
        };
        assert_eq!(em.stmt(&repeat, true), "for(let _=a0;_-->0;){counter++;}");
    }

    #[test]
    fn native_compare_used_when_nan_is_impossible() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);

        // Int < Int never sees NaN.
        assert_eq!(
            em.compare(CmpOp::Lt, &arg(Type::Int), &arg(Type::Int)),
            "(a0)<(a0)"
        );
        // A float on the right of < can be NaN, which must lose.
        assert_eq!(
            em.compare(CmpOp::Lt, &arg(Type::Int), &arg(Type::Float)),
            "!((a0)>((a0)||0))"
        );
        // Equality against NaN is still decidable natively.
        assert_eq!(
            em.compare(CmpOp::Eq, &arg(Type::Float), &arg(Type::Int)),
            "(a0)==(a0)"
        );
        // Untyped operands go through the helper.
        assert_eq!(
            em.compare(CmpOp::Gt, &arg(Type::Any), &arg(Type::Any)),
            "greaterThan(a0,a0)"
        );
    }

    #[test]
    fn constant_numbers_compare_inline() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        assert_eq!(
            em.compare(CmpOp::Eq, &num(Type::Int, 5.0), &arg(Type::Any)),
            "5==(+(a0)||0)"
        );
        assert_eq!(
            em.compare(CmpOp::Ne, &arg(Type::Any), &num(Type::Int, 5.0)),
            "(+(a0)||0)!=5"
        );
    }

    #[test]
    fn string_constant_comparisons_avoid_needless_lowercasing() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        assert_eq!(
            em.compare(CmpOp::Eq, &Expr::text("123!"), &arg(Type::Str)),
            "\"123!\"==(a0)"
        );
        assert_eq!(
            em.compare(CmpOp::Eq, &Expr::text("abc"), &arg(Type::Str)),
            "\"abc\"==(a0).toLowerCase()"
        );
        assert_eq!(
            em.compare(CmpOp::Gt, &arg(Type::Any), &Expr::text("abc")),
            "(a0).toString().toLowerCase()>\"abc\""
        );
    }

    #[test]
    fn negative_zero_survives_emission() {
        assert_eq!(const_js(Type::Int, &Constant::Number(-0.0)), "-0");
        assert_eq!(const_js(Type::Number, &Constant::Text("-0".into())), "-0");
        assert_eq!(const_js(Type::Str, &Constant::Text("-0".into())), "\"-0\"");
    }

    #[test]
    fn consecutive_appends_become_one_push() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let stmts = vec![
            Stmt::AddToList {
                list: "v0".into(),
                item: Expr::number(Type::Int, 1.0),
            },
            Stmt::AddToList {
                list: "v0".into(),
                item: Expr::text("x"),
            },
            Stmt::AddToList {
                list: "v1".into(),
                item: Expr::number(Type::Int, 2.0),
            },
        ];
        assert_eq!(em.stmts(&stmts, true), "v0.push(1,\"x\");v1.push(2);");
    }

    #[test]
    fn pen_down_up_pair_collapses_to_a_dot() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let js = em.stmts(&[Stmt::PenDown, Stmt::PenUp], true);
        assert_eq!(
            js,
            "self.h=0;drawPen(self.c,self.d,self.c,self.d,self.i,self.j,self.k);"
        );
        let js = em.stmts(&[Stmt::PenDown, Stmt::PenStamp], true);
        assert!(js.starts_with("self.h=1;drawPen("));
    }

    #[test]
    fn wait_until_negates_at_the_condition() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let cond = Expr::new(
            Type::Boolean,
            ExprKind::Not(Box::new(Expr::new(Type::Boolean, ExprKind::MouseDown))),
        );
        assert_eq!(em.stmt(&Stmt::WaitUntil(cond), false), "while(mouseDown)yield;");
    }

    #[test]
    fn if_else_swaps_branches_to_drop_a_negation() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let cond = Expr::new(
            Type::Boolean,
            ExprKind::Not(Box::new(Expr::new(Type::Boolean, ExprKind::MouseDown))),
        );
        let stmt = Stmt::IfElse {
            cond,
            then: vec![Stmt::IncrCounter],
            otherwise: vec![Stmt::ClearCounter],
        };
        assert_eq!(em.stmt(&stmt, true), "if(mouseDown){counter=0;}else{counter++;}");
    }

    #[test]
    fn key_names_normalize() {
        assert_eq!(key_name("left arrow"), "ARROWLEFT");
        assert_eq!(key_name("space"), " ");
        assert_eq!(key_name("a"), "A");
    }

    #[test]
    fn constant_pen_colors_precompute_hsv() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        // Pure red: hue 0, full saturation and value.
        let js = em.stmt(&Stmt::SetPenColor(Expr::text("#ff0000")), true);
        assert_eq!(js, "self.i=[0,1,1];self.j=1;");
        // Pure blue from a plain number; zero alpha byte means opaque.
        let js = em.stmt(&Stmt::SetPenColor(Expr::number(Type::Number, 255.0)), true);
        assert_eq!(js, "self.i=[66.66666666666667,1,1];self.j=1;");
    }

    #[test]
    fn list_indexing_follows_type_knowledge() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        assert_eq!(em.list_idx("v0", &num(Type::Int, 3.0)), "2");
        assert_eq!(em.list_idx("v0", &arg(Type::Int)), "(a0)-1");
        assert_eq!(em.list_idx("v0", &arg(Type::Number)), "((a0)|0)-1");
        assert_eq!(em.list_idx("v0", &Expr::text("last")), "v0.length-1");
        assert_eq!(em.list_idx("v0", &Expr::text("4.9")), "3");
        assert_eq!(em.list_idx("v0", &Expr::text("bogus")), "-1");
        assert_eq!(em.list_idx("v0", &arg(Type::Str)), "listIdx(v0.length,a0)");
    }

    #[test]
    fn out_of_range_constant_item_reads_empty() {
        let settings = Settings::default();
        let names = Names::default();
        let ir = empty_ir();
        let em = Emitter::new(&settings, &names, &ir);
        let item = Expr::new(
            Type::Any,
            ExprKind::ListItem {
                list: "v0".into(),
                index: Box::new(num(Type::Int, 0.0)),
            },
        );
        assert_eq!(em.val(&item), "\"\"");
        let item = Expr::new(
            Type::Any,
            ExprKind::ListItem {
                list: "v0".into(),
                index: Box::new(num(Type::Int, 2.0)),
            },
        );
        assert_eq!(em.val(&item), "v0[1]??\"\"");
    }
}
