//! Expression lowering: block inputs and reporter blocks become typed
//! [`Expr`] trees. Constant folding and the comparison/arithmetic type
//! inference happen here, so code generation never revisits types.

use crate::error::CompileError;
use crate::ir::{CmpOp, DateField, Expr, ExprKind, MathFn};
use crate::opt::push_not;
use crate::project::Block;
use crate::stmt::IrBuilder;
use crate::types::{js_round, to_int32, Constant, Type};
use serde_json::Value;

/// Result type when a comparison constant-folds.
fn fold_compare(op: CmpOp, l: &Constant, r: &Constant) -> bool {
    if !l.is_numeric() || !r.is_numeric() {
        let a = l.to_display().to_lowercase();
        let b = r.to_display().to_lowercase();
        match op {
            CmpOp::Eq => a == b,
            CmpOp::Gt => a > b,
            CmpOp::Lt => a < b,
            _ => unreachable!("only eq/gt/lt fold directly"),
        }
    } else {
        let a = l.as_number();
        let b = r.as_number();
        // NaN compares false under every operator here.
        match op {
            CmpOp::Eq => a == b,
            CmpOp::Gt => a > b,
            CmpOp::Lt => a < b,
            _ => unreachable!("only eq/gt/lt fold directly"),
        }
    }
}

/// Type of a folded arithmetic result.
fn numeric_type(res: f64) -> Type {
    if res.is_nan() {
        Type::Float
    } else if res % 1.0 != 0.0 {
        // Infinity lands here as well, its remainder is NaN.
        Type::Number
    } else {
        Type::Int
    }
}

impl IrBuilder<'_> {
    /// Lower a block input and coerce it to `want`.
    pub(crate) fn value(
        &mut self,
        input: Option<&Value>,
        want: Type,
    ) -> Result<Expr, CompileError> {
        let expr = self.input_expr(input)?;
        Ok(self.coerce(expr, want))
    }

    /// Lower a raw input descriptor: `[shadow, payload]` where the
    /// payload is a literal array, a variable/list reference, or the id
    /// of a reporter block.
    fn input_expr(&mut self, input: Option<&Value>) -> Result<Expr, CompileError> {
        let Some(input) = input else {
            return Ok(Expr::boolean(false));
        };
        let payload = match input.get(1) {
            Some(Value::Null) | None => input.get(2),
            other => other,
        };
        let Some(payload) = payload else {
            // An empty slot reads as false.
            return Ok(Expr::boolean(false));
        };

        if let Some(id) = payload.as_str() {
            let block = self
                .blocks
                .get(id)
                .cloned()
                .ok_or_else(|| CompileError::new(format!("Unknown block id '{}'.", id)))?;
            let expr = self.reporter(&block)?;
            // Negative zero escaping a folded subexpression reads as 0.
            if let (ExprKind::Const(c), Type::Int | Type::Number | Type::Float) =
                (&expr.kind, expr.ty)
            {
                if c.is_neg_zero() {
                    return Ok(Expr::number(expr.ty, 0.0));
                }
            }
            return Ok(expr);
        }

        let kind = payload
            .get(0)
            .and_then(Value::as_u64)
            .ok_or_else(|| CompileError::new(format!("Unknown value shape {}.", payload)))?;
        match kind {
            12 => {
                let id = payload.get(2).and_then(Value::as_str).unwrap_or_default();
                let token = self.names.variable(id);
                let ty = self.env.get(&token).copied().unwrap_or(Type::Any);
                Ok(Expr::new(ty, ExprKind::Var(token)))
            }
            13 => {
                let id = payload.get(2).and_then(Value::as_str).unwrap_or_default();
                let token = self.names.variable(id);
                Ok(Expr::new(Type::Str, ExprKind::ListContents(token)))
            }
            _ => Ok(self.literal(payload.get(1))),
        }
    }

    /// Classify a literal: ints stay ints, fractional and infinite
    /// values are `Number`, the text `NaN` is a `Float`, everything
    /// else is a string.
    fn literal(&mut self, payload: Option<&Value>) -> Expr {
        let text = match payload {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => {
                crate::types::format_number(n.as_f64().unwrap_or(0.0))
            }
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        };
        let n = crate::types::parse_number(&text);
        let numeric =
            crate::types::format_number(n) == text || (n == 0.0 && text == "-0");
        if !numeric {
            return Expr::text(text);
        }
        if n.is_nan() {
            return Expr::number(Type::Float, f64::NAN);
        }
        if n % 1.0 != 0.0 {
            return Expr::number(Type::Number, n);
        }
        let n = if text == "-0" { -0.0 } else { n };
        Expr::number(Type::Int, n)
    }

    /// Coerce `expr` to `want`, folding constants and inserting runtime
    /// conversions otherwise. Widening passes through untouched.
    pub(crate) fn coerce(&mut self, expr: Expr, want: Type) -> Expr {
        if expr.ty.widens_to(want) {
            return expr;
        }

        if let Some(c) = expr.as_const() {
            return match want {
                Type::IntStr => {
                    if matches!(expr.ty, Type::Number | Type::Float) {
                        let n = c.as_number();
                        let n = if n.is_nan() { 0.0 } else { n };
                        Expr::number(Type::Int, n.floor())
                    } else {
                        Expr::text(c.to_display())
                    }
                }
                Type::Int => {
                    if !c.is_numeric() {
                        Expr::number(Type::Int, 0.0)
                    } else {
                        Expr::number(Type::Int, c.as_number().floor())
                    }
                }
                Type::Float | Type::Number => {
                    if !c.is_numeric() {
                        Expr::number(Type::Number, 0.0)
                    } else {
                        Expr::number(Type::Number, c.as_number())
                    }
                }
                Type::Boolean => Expr::boolean(c.truthy()),
                _ => Expr::text(c.to_display()),
            };
        }

        if want == Type::IntStr {
            let target = if matches!(expr.ty, Type::Number | Type::Float) {
                Type::Int
            } else {
                Type::Str
            };
            return Expr::new(
                target,
                ExprKind::Convert {
                    from: Box::new(expr),
                },
            );
        }
        Expr::new(
            want,
            ExprKind::Convert {
                from: Box::new(expr),
            },
        )
    }

    /// Lower a reporter block.
    fn reporter(&mut self, block: &Block) -> Result<Expr, CompileError> {
        let precompute = self.settings.precompute;
        match block.opcode.as_str() {
            "argument_reporter_boolean" => {
                let name = require_field(block, "VALUE")?;
                match self.args.get(name) {
                    Some(&idx) => Ok(Expr::new(
                        Type::Boolean,
                        ExprKind::Arg(crate::names::Names::argument(idx)),
                    )),
                    // Outside its procedure the reporter reads as 0,
                    // except for the compile-detection name.
                    None if name == "is compiled?" => Ok(Expr::boolean(true)),
                    None => Ok(Expr::number(Type::Int, 0.0)),
                }
            }
            "argument_reporter_string_number" => {
                let name = require_field(block, "VALUE")?;
                match self.args.get(name) {
                    Some(&idx) => Ok(Expr::new(
                        Type::Any,
                        ExprKind::Arg(crate::names::Names::argument(idx)),
                    )),
                    None => Ok(Expr::number(Type::Int, 0.0)),
                }
            }

            // Menus lower to their selected entry.
            "motion_goto_menu" => Ok(Expr::text(require_field(block, "TO")?)),
            "motion_pointtowards_menu" => Ok(Expr::text(require_field(block, "TOWARDS")?)),
            "control_create_clone_of_menu" => {
                Ok(Expr::text(require_field(block, "CLONE_OPTION")?))
            }
            "looks_costumenumbername" | "looks_backdropnumbername" => {
                Ok(Expr::text(require_field(block, "NUMBER_NAME")?))
            }
            "looks_costume" => Ok(Expr::text(require_field(block, "COSTUME")?)),
            "looks_backdrops" => Ok(Expr::text(require_field(block, "BACKDROP")?)),
            "sound_sounds_menu" => Ok(Expr::text(require_field(block, "SOUND_MENU")?)),
            "sensing_keyoptions" => Ok(Expr::text(require_field(block, "KEY_OPTION")?)),
            "pen_menu_colorParam" => Ok(Expr::text(require_field(block, "colorParam")?)),

            "control_get_counter" => Ok(Expr::new(Type::Int, ExprKind::Counter)),
            "looks_size" => Ok(Expr::new(Type::Int, ExprKind::Size)),
            "sound_volume" => Ok(Expr::new(Type::Number, ExprKind::Volume)),
            "sensing_answer" => Ok(Expr::new(Type::Str, ExprKind::Answer)),
            "sensing_timer" => Ok(Expr::new(Type::Number, ExprKind::Timer)),
            "sensing_dayssince2000" => Ok(Expr::new(Type::Int, ExprKind::DaysSince2000)),
            "sensing_mousex" => Ok(Expr::new(Type::Int, ExprKind::MouseX)),
            "sensing_mousey" => Ok(Expr::new(Type::Int, ExprKind::MouseY)),
            "sensing_mousedown" => Ok(Expr::new(Type::Boolean, ExprKind::MouseDown)),
            "sensing_username" => Ok(Expr::text(self.settings.username.clone())),
            "sensing_keypressed" => {
                let key = self.value(block.input("KEY_OPTION"), Type::IntStr)?;
                Ok(Expr::new(Type::Boolean, ExprKind::KeyPressed(Box::new(key))))
            }
            "sensing_current" => {
                let field = match require_field(block, "CURRENTMENU")? {
                    "YEAR" => DateField::Year,
                    "MONTH" => DateField::Month,
                    "DATE" => DateField::Date,
                    "DAYOFWEEK" => DateField::DayOfWeek,
                    "HOUR" => DateField::Hour,
                    "MINUTE" => DateField::Minute,
                    "SECOND" => DateField::Second,
                    other => {
                        return Err(CompileError::new(format!(
                            "Unknown current() menu '{}'.",
                            other
                        )))
                    }
                };
                Ok(Expr::new(Type::Int, ExprKind::Current(field)))
            }
            "sensing_of" => self.attribute_of(block),

            "motion_xposition" | "motion_yposition" | "motion_direction" => {
                if self.is_stage {
                    // The stage cannot move or turn.
                    let v = if block.opcode == "motion_direction" {
                        90.0
                    } else {
                        0.0
                    };
                    return Ok(Expr::number(Type::Int, v));
                }
                let kind = match block.opcode.as_str() {
                    "motion_xposition" => ExprKind::XPosition,
                    "motion_yposition" => ExprKind::YPosition,
                    _ => ExprKind::Direction,
                };
                Ok(Expr::new(Type::Number, kind))
            }

            "data_itemoflist" => {
                let list = self.list_token(block)?;
                let idx = self.value(block.input("INDEX"), Type::IntStr)?;
                if let Some(c) = idx.as_const() {
                    let special = matches!(
                        c.to_display().to_lowercase().as_str(),
                        "last" | "random" | "any"
                    );
                    let plain = c.is_numeric() || !special;
                    let out_of_range = c.as_number() < 1.0
                        || !c.is_numeric()
                        || (self.settings.unsafe_floor && c.as_number() > 4294967296.0);
                    if plain && out_of_range && precompute {
                        return Ok(Expr::text(""));
                    }
                }
                Ok(Expr::new(
                    Type::Any,
                    ExprKind::ListItem {
                        list,
                        index: Box::new(idx),
                    },
                ))
            }
            "data_itemnumoflist" => {
                let list = self.list_token(block)?;
                let item = self.value(block.input("ITEM"), Type::Any)?;
                Ok(Expr::new(
                    Type::Int,
                    ExprKind::ListIndexOf {
                        list,
                        item: Box::new(item),
                    },
                ))
            }
            "data_lengthoflist" => {
                let list = self.list_token(block)?;
                Ok(Expr::new(Type::Int, ExprKind::ListLen(list)))
            }
            "data_listcontainsitem" => {
                let list = self.list_token(block)?;
                let item = self.value(block.input("ITEM"), Type::Any)?;
                Ok(Expr::new(
                    Type::Boolean,
                    ExprKind::ListContains {
                        list,
                        item: Box::new(item),
                    },
                ))
            }

            "operator_equals" | "operator_gt" | "operator_lt" => {
                let op = match block.opcode.as_str() {
                    "operator_equals" => CmpOp::Eq,
                    "operator_gt" => CmpOp::Gt,
                    _ => CmpOp::Lt,
                };
                let mut left = self.value(block.input("OPERAND1"), Type::Any)?;
                let mut right = self.value(block.input("OPERAND2"), Type::Any)?;

                if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
                    if precompute {
                        return Ok(Expr::boolean(fold_compare(op, l, r)));
                    }
                }

                // Comparing numbers beats comparing strings, so bias a
                // constant numeric side; a constant non-numeric side
                // drags both operands to strings instead.
                let l_num = left.as_const().map(Constant::is_numeric);
                let r_num = right.as_const().map(Constant::is_numeric);
                if l_num == Some(true) {
                    left = self.coerce(left, Type::Number);
                } else if r_num == Some(true) {
                    right = self.coerce(right, Type::Number);
                } else if l_num == Some(false) || r_num == Some(false) {
                    left = self.coerce(left, Type::Str);
                    right = self.coerce(right, Type::Str);
                }

                Ok(Expr::new(
                    Type::Boolean,
                    ExprKind::Compare {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                ))
            }

            "operator_and" | "operator_or" => {
                let and = block.opcode == "operator_and";
                let left = self.value(block.input("OPERAND1"), Type::Boolean)?;
                let right = self.value(block.input("OPERAND2"), Type::Boolean)?;
                if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
                    if precompute {
                        let v = if and {
                            l.truthy() && r.truthy()
                        } else {
                            l.truthy() || r.truthy()
                        };
                        return Ok(Expr::boolean(v));
                    }
                }
                let kind = if and {
                    ExprKind::And(Box::new(left), Box::new(right))
                } else {
                    ExprKind::Or(Box::new(left), Box::new(right))
                };
                Ok(Expr::new(Type::Boolean, kind))
            }

            "operator_not" => {
                let op = self.value(block.input("OPERAND"), Type::Boolean)?;
                Ok(push_not(op, precompute))
            }

            "operator_add" | "operator_subtract" | "operator_multiply" => {
                self.additive(block)
            }
            "operator_divide" | "operator_mod" => self.divisive(block),
            "operator_random" => self.random(block),

            "operator_round" => {
                let num = self.value(block.input("NUM"), Type::Number)?;
                if let Some(c) = num.as_const() {
                    if precompute {
                        return Ok(Expr::number(Type::Int, js_round(c.as_number())));
                    }
                }
                Ok(Expr::new(Type::Int, ExprKind::Round(Box::new(num))))
            }
            "operator_mathop" => self.mathop(block),

            "operator_join" => {
                let mut left = self.value(block.input("STRING1"), Type::Any)?;
                let right = self.value(block.input("STRING2"), Type::Any)?;
                // One string operand is enough for `+` to concatenate.
                if left.ty != Type::Str && right.ty != Type::Str {
                    left = self.coerce(left, Type::Str);
                }
                if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
                    if precompute {
                        return Ok(Expr::text(l.to_display() + &r.to_display()));
                    }
                }
                Ok(Expr::new(
                    Type::Str,
                    ExprKind::Join(Box::new(left), Box::new(right)),
                ))
            }
            "operator_length" => {
                let str = self.value(block.input("STRING"), Type::Str)?;
                if let Some(c) = str.as_const() {
                    if precompute {
                        let len = c.to_display().encode_utf16().count();
                        return Ok(Expr::number(Type::Int, len as f64));
                    }
                }
                Ok(Expr::new(Type::Int, ExprKind::StrLen(Box::new(str))))
            }
            "operator_letter_of" => {
                let letter = self.value(block.input("LETTER"), Type::Int)?;
                let str = self.value(block.input("STRING"), Type::Str)?;
                if let Some(c) = letter.as_const() {
                    let n = c.as_number();
                    if n < 1.0
                        || (self.settings.unsafe_floor && f64::from(to_int32(n)) != n)
                    {
                        return Ok(Expr::text(""));
                    }
                    if let Some(s) = str.as_const() {
                        if precompute {
                            let units: Vec<u16> = s.to_display().encode_utf16().collect();
                            let ch = units
                                .get(n as usize - 1)
                                .map(|u| String::from_utf16_lossy(&[*u]))
                                .unwrap_or_default();
                            return Ok(Expr::text(ch));
                        }
                    }
                }
                Ok(Expr::new(
                    Type::Str,
                    ExprKind::LetterOf {
                        string: Box::new(str),
                        letter: Box::new(letter),
                    },
                ))
            }
            "operator_contains" => {
                let string = self.value(block.input("STRING1"), Type::Str)?;
                let substring = self.value(block.input("STRING2"), Type::Str)?;
                if let (Some(l), Some(r)) = (string.as_const(), substring.as_const()) {
                    if precompute {
                        let v = l
                            .to_display()
                            .to_lowercase()
                            .contains(&r.to_display().to_lowercase());
                        return Ok(Expr::boolean(v));
                    }
                }
                Ok(Expr::new(
                    Type::Boolean,
                    ExprKind::StrContains {
                        string: Box::new(string),
                        substring: Box::new(substring),
                    },
                ))
            }

            other => Err(CompileError::new(format!(
                "Unknown reporter block '{}'.",
                other
            ))),
        }
    }

    fn additive(&mut self, block: &Block) -> Result<Expr, CompileError> {
        let precompute = self.settings.precompute;
        let opcode = block.opcode.as_str();
        let left = self.value(block.input("NUM1"), Type::Number)?;
        let right = self.value(block.input("NUM2"), Type::Number)?;

        if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
            if precompute {
                let (a, b) = (l.as_number(), r.as_number());
                let res = match opcode {
                    "operator_add" => a + b,
                    "operator_subtract" => a - b,
                    _ => a * b,
                };
                return Ok(Expr::number(numeric_type(res), res));
            }
        }

        // Additive and multiplicative identities. Multiplying by zero
        // is NOT folded: Infinity * 0 is NaN.
        if precompute {
            if let Some(l) = left.as_const() {
                let n = l.as_number();
                if (opcode == "operator_add" && n == 0.0)
                    || (opcode == "operator_multiply" && n == 1.0)
                {
                    return Ok(right);
                }
            }
            if let Some(r) = right.as_const() {
                let n = r.as_number();
                if (opcode != "operator_multiply" && n == 0.0)
                    || (opcode == "operator_multiply" && n == 1.0)
                {
                    return Ok(left);
                }
            }
            // Multiplication by -1 becomes plain negation.
            if opcode == "operator_multiply" {
                if left.as_const().map(Constant::as_number) == Some(-1.0) {
                    let ty = if right.ty == Type::Float {
                        Type::Number
                    } else {
                        right.ty
                    };
                    return Ok(Expr::new(
                        ty,
                        ExprKind::Sub(
                            Box::new(Expr::number(Type::Int, 0.0)),
                            Box::new(right),
                        ),
                    ));
                }
                if right.as_const().map(Constant::as_number) == Some(-1.0) {
                    let ty = if left.ty == Type::Float {
                        Type::Number
                    } else {
                        left.ty
                    };
                    return Ok(Expr::new(
                        ty,
                        ExprKind::Sub(
                            Box::new(Expr::number(Type::Int, 0.0)),
                            Box::new(left),
                        ),
                    ));
                }
            }
        }

        // NaN needs an infinite operand (for multiplication, also a
        // zero one), so a finite or non-zero constant rules it out.
        let l_const = left.as_const().map(Constant::as_number);
        let r_const = right.as_const().map(Constant::as_number);
        let mut ty = Type::Float;
        let clean = (opcode == "operator_multiply"
            && matches!(l_const, Some(n) if n != 0.0))
            || matches!(r_const, Some(n) if n != 0.0)
            || matches!(l_const, Some(n) if n.abs() != f64::INFINITY)
            || matches!(r_const, Some(n) if n.abs() != f64::INFINITY);
        if clean {
            ty = if left.ty == Type::Int && right.ty == Type::Int {
                Type::Int
            } else {
                Type::Number
            };
        }

        let kind = match opcode {
            "operator_add" => ExprKind::Add(Box::new(left), Box::new(right)),
            "operator_subtract" => ExprKind::Sub(Box::new(left), Box::new(right)),
            _ => ExprKind::Mul(Box::new(left), Box::new(right)),
        };
        Ok(Expr::new(ty, kind))
    }

    fn divisive(&mut self, block: &Block) -> Result<Expr, CompileError> {
        let precompute = self.settings.precompute;
        let divide = block.opcode == "operator_divide";
        let left = self.value(block.input("NUM1"), Type::Number)?;
        let right = self.value(block.input("NUM2"), Type::Number)?;

        if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
            if precompute {
                let (a, b) = (l.as_number(), r.as_number());
                let res = if divide {
                    a / b
                } else if b.abs() == f64::INFINITY && a.abs() != f64::INFINITY {
                    // Euclidean-style modulo keeps finite values intact
                    // against an infinite divisor.
                    a
                } else {
                    ((a % b) + b) % b
                };
                return Ok(Expr::number(numeric_type(res), res));
            }
        }

        let l_const = left.as_const().map(Constant::as_number);
        let r_const = right.as_const().map(Constant::as_number);
        let mut ty = Type::Float;
        if divide
            && (matches!(l_const, Some(n) if n != 0.0)
                || matches!(r_const, Some(n) if n != 0.0))
            && (matches!(l_const, Some(n) if n.abs() != f64::INFINITY)
                || matches!(r_const, Some(n) if n.abs() != f64::INFINITY))
        {
            ty = Type::Number;
        }

        if divide && precompute {
            if r_const == Some(-1.0) {
                return Ok(Expr::new(
                    left.ty,
                    ExprKind::Sub(
                        Box::new(Expr::number(Type::Int, 0.0)),
                        Box::new(left),
                    ),
                ));
            }
            if r_const == Some(1.0) {
                return Ok(left);
            }
        }

        let kind = if divide {
            ExprKind::Div(Box::new(left), Box::new(right))
        } else {
            ExprKind::Mod(Box::new(left), Box::new(right))
        };
        Ok(Expr::new(ty, kind))
    }

    fn random(&mut self, block: &Block) -> Result<Expr, CompileError> {
        let mut left = self.value(block.input("FROM"), Type::Any)?;
        let mut right = self.value(block.input("TO"), Type::Any)?;

        let l_const = left.as_const().map(Constant::as_number);
        let r_const = right.as_const().map(Constant::as_number);
        if l_const == Some(f64::INFINITY) || r_const == Some(f64::INFINITY) {
            return Ok(Expr::number(Type::Int, f64::INFINITY));
        }
        if l_const == Some(f64::NEG_INFINITY) || r_const == Some(f64::NEG_INFINITY) {
            return Ok(Expr::number(Type::Float, f64::NAN));
        }

        let mut ty = Type::Number;
        if left.ty == Type::Int && right.ty == Type::Int {
            ty = Type::Int;
        }

        // A decimal point on either bound switches to the fractional
        // pattern.
        let fractional = [&left, &right].iter().any(|e| {
            e.as_const()
                .map(|c| c.to_display().contains('.'))
                .unwrap_or(false)
        });
        if fractional {
            ty = Type::Number;
            left = self.coerce(left, Type::Number);
            right = self.coerce(right, Type::Number);
        }

        Ok(Expr::new(
            ty,
            ExprKind::Random {
                from: Box::new(left),
                to: Box::new(right),
                fractional,
            },
        ))
    }

    fn mathop(&mut self, block: &Block) -> Result<Expr, CompileError> {
        let op_name = require_field(block, "OPERATOR")?.to_string();
        let num = self.value(block.input("NUM"), Type::Number)?;

        let op = match op_name.as_str() {
            "abs" => MathFn::Abs,
            "floor" => MathFn::Floor,
            "ceiling" => MathFn::Ceiling,
            "sqrt" => MathFn::Sqrt,
            "sin" => MathFn::Sin,
            "cos" => MathFn::Cos,
            "tan" => MathFn::Tan,
            "asin" => MathFn::Asin,
            "acos" => MathFn::Acos,
            "atan" => MathFn::Atan,
            "ln" => MathFn::Ln,
            "log" => MathFn::Log,
            "e ^" => MathFn::PowE,
            "10 ^" => MathFn::Pow10,
            other => {
                return Err(CompileError::new(format!(
                    "Unknown math operator '{}'.",
                    other
                )))
            }
        };

        if let Some(c) = num.as_const() {
            if self.settings.precompute {
                let x = c.as_number();
                const DEG: f64 = 57.29577951308232;
                const RAD: f64 = 0.017453292519943295;
                let accurate = self.settings.accurate_trig;
                let trig = |f: f64| {
                    if accurate {
                        js_round(1e10 * f) / 1e10
                    } else {
                        f
                    }
                };
                let res = match op {
                    MathFn::Abs => x.abs(),
                    MathFn::Floor => x.floor(),
                    MathFn::Ceiling => x.ceil(),
                    MathFn::Sqrt => x.sqrt(),
                    MathFn::Ln => x.ln(),
                    MathFn::Log => x.log10(),
                    MathFn::PowE => x.exp(),
                    MathFn::Pow10 => 10f64.powf(x),
                    MathFn::Asin => DEG * x.asin(),
                    MathFn::Acos => DEG * x.acos(),
                    MathFn::Atan => DEG * x.atan(),
                    MathFn::Sin => trig((RAD * x).sin()),
                    MathFn::Cos => trig((RAD * x).cos()),
                    MathFn::Tan => {
                        let t = trig((RAD * x).tan());
                        // tan(90) overflows the float table to this
                        // magnitude; Scratch reports Infinity there.
                        let clamp = if accurate {
                            16331239353195368.0
                        } else {
                            16331239353195370.0
                        };
                        if t.abs() == clamp {
                            t.signum() * f64::INFINITY
                        } else {
                            t
                        }
                    }
                };
                return Ok(Expr::number(numeric_type(res), res));
            }
        }

        let ty = match op {
            MathFn::Ln
            | MathFn::Log
            | MathFn::Asin
            | MathFn::Acos
            | MathFn::Atan
            | MathFn::Sin
            | MathFn::Cos
            | MathFn::Tan
            | MathFn::Sqrt => Type::Float,
            MathFn::Abs | MathFn::PowE | MathFn::Pow10 => Type::Number,
            MathFn::Floor | MathFn::Ceiling => Type::Int,
        };
        Ok(Expr::new(
            ty,
            ExprKind::MathOp {
                op,
                num: Box::new(num),
            },
        ))
    }

    /// `sensing_of`. Builtin sprite attributes read as a stub constant;
    /// a variable of another sprite has no token here and fails.
    fn attribute_of(&mut self, block: &Block) -> Result<Expr, CompileError> {
        let property = require_field(block, "PROPERTY")?;
        const BUILTIN: &[&str] = &[
            "x position",
            "y position",
            "direction",
            "costume #",
            "costume name",
            "size",
            "volume",
            "backdrop #",
            "backdrop name",
        ];
        if BUILTIN.contains(&property) {
            return Ok(Expr::text("0"));
        }
        let owner = block
            .input("OBJECT")
            .and_then(|v| v.get(1))
            .and_then(Value::as_str)
            .and_then(|id| self.blocks.get(id))
            .and_then(|menu| menu.field("OBJECT"))
            .unwrap_or("?");
        Err(self.names.foreign_variable(owner, property))
    }

    pub(crate) fn list_token(&mut self, block: &Block) -> Result<String, CompileError> {
        let id = block
            .field_id("LIST")
            .ok_or_else(|| CompileError::new("List block missing LIST field."))?
            .to_string();
        Ok(self.names.variable(&id))
    }
}

fn require_field<'b>(block: &'b Block, name: &str) -> Result<&'b str, CompileError> {
    block.field(name).ok_or_else(|| {
        CompileError::new(format!(
            "Block '{}' missing field '{}'.",
            block.opcode, name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Stmt;
    use crate::names::Names;
    use crate::project::Project;
    use crate::Settings;
    use serde_json::json;

    /// Lower a single `set variable to <input>` statement and return
    /// the compiled value expression. `extra` holds referenced reporter
    /// blocks.
    fn lower(input: serde_json::Value, mut extra: serde_json::Value) -> Expr {
        let mut blocks = json!({
            "hat": {"opcode": "event_whenflagclicked", "next": "set", "topLevel": true},
            "set": {
                "opcode": "data_setvariableto",
                "inputs": {"VALUE": input},
                "fields": {"VARIABLE": ["score", "vid"]}
            }
        });
        if let (Some(map), Some(add)) = (blocks.as_object_mut(), extra.as_object_mut()) {
            map.append(add);
        }
        let project = Project::from_value(&json!({
            "targets": [{
                "name": "Stage",
                "isStage": true,
                "variables": {"vid": ["score", 0]},
                "blocks": blocks
            }]
        }))
        .unwrap();
        let settings = Settings::default();
        let mut names = Names::default();
        let ir = IrBuilder::build_sprite(&settings, &mut names, &project.targets[0]).unwrap();
        let Stmt::SetVar { value, .. } = ir.scripts[0].body[0].clone() else {
            panic!("expected a variable assignment");
        };
        value
    }

    fn constant(e: &Expr) -> &Constant {
        e.as_const().unwrap_or_else(|| panic!("expected a constant, got {:?}", e))
    }

    #[test]
    fn numeric_literals_classify_by_fraction() {
        let e = lower(json!([1, [4, "3"]]), json!({}));
        assert_eq!(e.ty, Type::Int);
        assert_eq!(constant(&e).as_number(), 3.0);

        let e = lower(json!([1, [4, "2.5"]]), json!({}));
        assert_eq!(e.ty, Type::Number);

        let e = lower(json!([1, [4, "Infinity"]]), json!({}));
        assert_eq!(e.ty, Type::Number);
        assert_eq!(constant(&e).as_number(), f64::INFINITY);

        let e = lower(json!([1, [10, "abc"]]), json!({}));
        assert_eq!(e.ty, Type::Str);
    }

    #[test]
    fn constant_arithmetic_folds() {
        let e = lower(
            json!([3, "sum"]),
            json!({"sum": {
                "opcode": "operator_add",
                "inputs": {"NUM1": [1, [4, "2"]], "NUM2": [1, [4, "3"]]}
            }}),
        );
        assert_eq!(e.ty, Type::Int);
        assert_eq!(constant(&e).as_number(), 5.0);

        let e = lower(
            json!([3, "sum"]),
            json!({"sum": {
                "opcode": "operator_add",
                "inputs": {"NUM1": [1, [4, "1.5"]], "NUM2": [1, [4, "1"]]}
            }}),
        );
        assert_eq!(e.ty, Type::Number);
        assert_eq!(constant(&e).as_number(), 2.5);
    }

    #[test]
    fn additive_identity_passes_through() {
        let e = lower(
            json!([3, "sum"]),
            json!({
                "sum": {
                    "opcode": "operator_add",
                    "inputs": {"NUM1": [1, [4, "0"]], "NUM2": [3, "mx"]}
                },
                "mx": {"opcode": "sensing_mousex"}
            }),
        );
        assert_eq!(e.kind, ExprKind::MouseX);
    }

    #[test]
    fn multiplying_by_negative_one_negates() {
        let e = lower(
            json!([3, "prod"]),
            json!({
                "prod": {
                    "opcode": "operator_multiply",
                    "inputs": {"NUM1": [3, "mx"], "NUM2": [1, [4, "-1"]]}
                },
                "mx": {"opcode": "sensing_mousex"}
            }),
        );
        let ExprKind::Sub(zero, negated) = &e.kind else {
            panic!("expected a subtraction, got {:?}", e);
        };
        assert_eq!(constant(zero).as_number(), 0.0);
        assert_eq!(negated.kind, ExprKind::MouseX);
    }

    #[test]
    fn modulo_by_infinity_keeps_the_dividend() {
        let e = lower(
            json!([3, "m"]),
            json!({"m": {
                "opcode": "operator_mod",
                "inputs": {"NUM1": [1, [4, "7"]], "NUM2": [1, [4, "Infinity"]]}
            }}),
        );
        assert_eq!(constant(&e).as_number(), 7.0);
    }

    #[test]
    fn string_equality_folds_caselessly() {
        let e = lower(
            json!([3, "eq"]),
            json!({"eq": {
                "opcode": "operator_equals",
                "inputs": {"OPERAND1": [1, [10, "apple"]], "OPERAND2": [1, [10, "APPLE"]]}
            }}),
        );
        assert_eq!(e.ty, Type::Boolean);
        assert!(constant(&e).truthy());
    }

    #[test]
    fn builtin_attribute_reads_as_a_text_zero() {
        let e = lower(
            json!([3, "of"]),
            json!({"of": {
                "opcode": "sensing_of",
                "fields": {"PROPERTY": ["x position"]},
                "inputs": {}
            }}),
        );
        assert_eq!(e.ty, Type::Str);
        assert_eq!(constant(&e), &Constant::Text("0".into()));
    }

    #[test]
    fn trig_folds_in_degrees() {
        let e = lower(
            json!([3, "s"]),
            json!({"s": {
                "opcode": "operator_mathop",
                "fields": {"OPERATOR": ["sin"]},
                "inputs": {"NUM": [1, [4, "90"]]}
            }}),
        );
        assert_eq!(e.ty, Type::Int);
        assert_eq!(constant(&e).as_number(), 1.0);
    }

    #[test]
    fn letter_of_folds_to_the_right_character() {
        let e = lower(
            json!([3, "l"]),
            json!({"l": {
                "opcode": "operator_letter_of",
                "inputs": {"LETTER": [1, [6, "2"]], "STRING": [1, [10, "cat"]]}
            }}),
        );
        assert_eq!(constant(&e).to_display(), "a");

        let e = lower(
            json!([3, "l"]),
            json!({"l": {
                "opcode": "operator_letter_of",
                "inputs": {"LETTER": [1, [6, "0"]], "STRING": [1, [10, "cat"]]}
            }}),
        );
        assert_eq!(constant(&e).to_display(), "");
    }

    #[test]
    fn join_concatenates_constants() {
        let e = lower(
            json!([3, "j"]),
            json!({"j": {
                "opcode": "operator_join",
                "inputs": {"STRING1": [1, [10, "a"]], "STRING2": [1, [10, "1"]]}
            }}),
        );
        assert_eq!(e.ty, Type::Str);
        assert_eq!(constant(&e).to_display(), "a1");
    }
}
