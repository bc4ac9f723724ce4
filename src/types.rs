//! The type domain and the JavaScript-faithful value primitives every
//! other stage leans on. Numbers follow IEEE-754 double semantics
//! exactly, including signed zero, NaN and the two infinities.

/// Statically inferred type of an expression.
///
/// `Number` is numeric with "fractional or not" unresolved, `Float` is
/// numeric but may be NaN or infinite, `IntStr` accepts an int or a
/// string and nothing else (default-converts to int).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Boolean,
    Str,
    Any,
    Number,
    IntStr,
    Undefined,
}

impl Type {
    /// True when a value of `self` can be read where `want` is expected
    /// without emitting a conversion.
    pub fn widens_to(self, want: Type) -> bool {
        want == Type::Any
            || want == self
            || (want == Type::Int && self == Type::Boolean)
            || (want == Type::Number && matches!(self, Type::Int | Type::Boolean))
            || (want == Type::IntStr
                && matches!(self, Type::Int | Type::Str | Type::Boolean))
    }
}

/// A compile-time value, already coerced to the canonical representation
/// of its node's type.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Constant {
    /// JavaScript unary `+` on the value.
    pub fn as_number(&self) -> f64 {
        match self {
            Constant::Number(n) => *n,
            Constant::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Constant::Text(s) => parse_number(s),
        }
    }

    /// JavaScript `toString()` of the value.
    pub fn to_display(&self) -> String {
        match self {
            Constant::Number(n) => format_number(*n),
            Constant::Bool(b) => b.to_string(),
            Constant::Text(s) => s.clone(),
        }
    }

    /// Numeric in the Scratch sense: a non-NaN number, or a non-empty
    /// string that parses as one. Booleans are not numeric.
    pub fn is_numeric(&self) -> bool {
        match self {
            Constant::Number(n) => !n.is_nan(),
            Constant::Bool(_) => false,
            Constant::Text(s) => {
                !s.trim().is_empty() && !parse_number(s).is_nan()
            }
        }
    }

    /// Scratch truthiness: zero and the literal `"false"` are false,
    /// as are the empty and all-whitespace strings.
    pub fn truthy(&self) -> bool {
        match self {
            // NaN != 0 holds here, matching the source semantics where
            // NaN is truthy.
            Constant::Number(n) => *n != 0.0,
            Constant::Bool(b) => *b,
            Constant::Text(s) => {
                if self.is_numeric() {
                    parse_number(s) != 0.0
                } else {
                    !s.trim().is_empty() && !s.eq_ignore_ascii_case("false")
                }
            }
        }
    }

    pub fn is_neg_zero(&self) -> bool {
        let n = self.as_number();
        n == 0.0 && n.is_sign_negative()
    }
}

/// `Number(string)` as JavaScript defines it: trimmed, empty means zero,
/// `Infinity` spellings and `0x`/`0o`/`0b` prefixes accepted, anything
/// else must be plain decimal syntax or the result is NaN.
pub fn parse_number(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(digits) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return radix_value(digits, 16);
    }
    if let Some(digits) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        return radix_value(digits, 8);
    }
    if let Some(digits) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        return radix_value(digits, 2);
    }
    // Rust's float parser also takes "inf" and "nan"; JavaScript does not.
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    if body.is_empty()
        || !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

fn radix_value(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut value = 0.0f64;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => value = value * f64::from(radix) + f64::from(d),
            None => return f64::NAN,
        }
    }
    value
}

/// `Number.prototype.toString` shape: no trailing `.0`, exponent form
/// with an explicit `+` at 1e21 and above, bare `e-` form below 1e-6.
/// Negative zero prints as `0`; emission sites that care special-case it.
pub fn format_number(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x == f64::INFINITY {
        return "Infinity".to_string();
    }
    if x == f64::NEG_INFINITY {
        return "-Infinity".to_string();
    }
    if x == 0.0 {
        return "0".to_string();
    }
    let mag = x.abs();
    if mag >= 1e21 || mag < 1e-6 {
        let s = format!("{:e}", x);
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => {
                format!("{}e+{}", mantissa, exp)
            }
            _ => s,
        };
    }
    format!("{}", x)
}

/// `Math.round`: half-up, so -0.5 rounds to -0, not -1.
pub fn js_round(x: f64) -> f64 {
    if x.is_nan() || x.is_infinite() {
        return x;
    }
    let r = (x + 0.5).floor();
    if r == 0.0 && (x < 0.0 || x.is_sign_negative()) {
        -0.0
    } else {
        r
    }
}

/// ECMA ToInt32, the `|0` coercion.
pub fn to_int32(x: f64) -> i32 {
    if !x.is_finite() || x == 0.0 {
        return 0;
    }
    let m = x.trunc().rem_euclid(4294967296.0);
    if m >= 2147483648.0 {
        (m - 4294967296.0) as i32
    } else {
        m as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_follows_js() {
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("  "), 0.0);
        assert_eq!(parse_number(" 5 "), 5.0);
        assert_eq!(parse_number("0x10"), 16.0);
        assert_eq!(parse_number("0b101"), 5.0);
        assert_eq!(parse_number("Infinity"), f64::INFINITY);
        assert_eq!(parse_number("-Infinity"), f64::NEG_INFINITY);
        assert_eq!(parse_number("1.5e3"), 1500.0);
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("nan").is_nan());
        assert!(parse_number("12abc").is_nan());
        assert!(parse_number("infinity").is_nan());
    }

    #[test]
    fn format_number_follows_js() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(1e-6), "0.000001");
        assert_eq!(format_number(1e-7), "1e-7");
    }

    #[test]
    fn truthiness_vectors() {
        assert!(!Constant::Text("".into()).truthy());
        assert!(!Constant::Text("  ".into()).truthy());
        assert!(!Constant::Text("0".into()).truthy());
        assert!(!Constant::Text("00".into()).truthy());
        assert!(!Constant::Text("0.0".into()).truthy());
        assert!(!Constant::Text("false".into()).truthy());
        assert!(!Constant::Text("FALSE".into()).truthy());
        assert!(Constant::Text("abc".into()).truthy());
        assert!(Constant::Text("1".into()).truthy());
        // NaN is truthy in the source semantics.
        assert!(Constant::Number(f64::NAN).truthy());
        assert!(!Constant::Number(-0.0).truthy());
    }

    #[test]
    fn booleans_are_not_numeric() {
        assert!(!Constant::Bool(true).is_numeric());
        assert!(Constant::Number(5.0).is_numeric());
        assert!(Constant::Text(" 5 ".into()).is_numeric());
        assert!(!Constant::Text("".into()).is_numeric());
        assert!(!Constant::Number(f64::NAN).is_numeric());
        assert!(Constant::Number(f64::INFINITY).is_numeric());
    }

    #[test]
    fn widening_table() {
        assert!(Type::Boolean.widens_to(Type::Int));
        assert!(Type::Int.widens_to(Type::Number));
        assert!(Type::Boolean.widens_to(Type::Number));
        assert!(Type::Str.widens_to(Type::IntStr));
        assert!(Type::Int.widens_to(Type::IntStr));
        assert!(Type::Float.widens_to(Type::Any));
        assert!(!Type::Number.widens_to(Type::Int));
        assert!(!Type::Float.widens_to(Type::Number));
        assert!(!Type::Number.widens_to(Type::IntStr));
        assert!(!Type::Any.widens_to(Type::Boolean));
    }

    #[test]
    fn rounding_half_up() {
        assert_eq!(js_round(0.5), 1.0);
        assert_eq!(js_round(-0.5), 0.0);
        assert!(js_round(-0.5).is_sign_negative());
        assert_eq!(js_round(-1.5), -1.0);
        assert_eq!(js_round(2.4), 2.0);
    }

    #[test]
    fn int32_truncation() {
        assert_eq!(to_int32(3.9), 3);
        assert_eq!(to_int32(-3.9), -3);
        assert_eq!(to_int32(f64::INFINITY), 0);
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
    }
}
