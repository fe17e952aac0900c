//! Operator kernel: the (opcode, primary-type) dispatch table, re-expressed
//! as a pure function over `Data` rather than a switch-over-enum-member
//! layout.
//!
//! This module only answers "what does this operator mean for these
//! operand formats" for the primitive formats it can decide outright.
//! When the left operand is an `OBJECT`, it reports [`Outcome::Overload`]
//! and leaves invoking the class's operator method to the caller
//! (`dispatch.rs`), which already owns the call-frame machinery
//! (`init_member_call`) needed to run user bytecode — the kernel itself
//! never pushes a frame.

use crate::class::Operator;
use crate::error::CoreDiagnostic;
use crate::value::Data;

#[derive(Debug, Clone)]
pub enum Outcome {
    Number(f64),
    Boolean(bool),
    Str(String),
    None,
    /// Defer to the class's `operators` table entry for `op` on an
    /// OBJECT left-hand side.
    Overload(Operator),
    Error(CoreDiagnostic),
}

fn to_number(d: &Data) -> Option<f64> {
    match d {
        Data::Number(n) => Some(*n),
        Data::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        Data::Object(o) => o.as_string().and_then(|s| parse_numeric_prefix(&s.value)),
        _ => None,
    }
}

fn to_boolean(d: &Data) -> bool {
    match d {
        Data::None | Data::Null => false,
        Data::Number(n) => *n != 0.0,
        Data::Boolean(b) => *b,
        Data::Object(o) => o.as_string().map(|s| !s.value.is_empty()).unwrap_or(true),
        Data::Package(_) | Data::Function(_) => true,
    }
}

/// Parses the leading numeric run of a string for the string-to-number
/// cast. Returns `None` if no digits lead.
fn parse_numeric_prefix(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    trimmed[..end].parse::<f64>().ok()
}

/// R1 / ToString: canonical decimal rendering used both for `to_string`
/// and for the `print` opcode's number formatting.
pub fn number_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Binary operator semantics for primitive left-hand operands. `Data::Object` on the left always reports [`Outcome::Overload`]
/// so the caller can look up `class.operators[op]`.
pub fn apply_binary(op: Operator, lhs: &Data, rhs: &Data) -> Outcome {
    if matches!(lhs, Data::Object(_)) {
        return Outcome::Overload(op);
    }

    // `==`/`!=` against none/null: always false/true unless both sides
    // share that format.
    if matches!(op, Operator::Eq | Operator::Ne) {
        let lhs_empty = matches!(lhs, Data::None | Data::Null);
        let rhs_empty = matches!(rhs, Data::None | Data::Null);
        if lhs_empty || rhs_empty {
            let equal = lhs_empty && rhs_empty && std::mem::discriminant(lhs) == std::mem::discriminant(rhs);
            return Outcome::Boolean(if op == Operator::Eq { equal } else { !equal });
        }
    }

    // `+` on two functions merges their signature maps — handled one
    // layer up (value.rs/Data doesn't expose FunctionData::merge here to
    // keep this module operand-shape agnostic); report Overload-like
    // deferral via a dedicated marker the caller recognizes.
    if op == Operator::Add && matches!(lhs, Data::Function(_)) && matches!(rhs, Data::Function(_)) {
        return Outcome::None; // caller special-cases Function+Function before calling apply_binary
    }

    match (op, lhs, rhs) {
        (Operator::Add, Data::Number(a), Data::Number(b)) => Outcome::Number(a + b),
        (Operator::Sub, Data::Number(a), Data::Number(b)) => Outcome::Number(a - b),
        (Operator::Mul, Data::Number(a), Data::Number(b)) => Outcome::Number(a * b),
        (Operator::Div, Data::Number(a), Data::Number(b)) => {
            if *b == 0.0 {
                Outcome::Error(CoreDiagnostic::not_found("division by zero"))
            } else {
                Outcome::Number(a / b)
            }
        }
        (Operator::Mod, Data::Number(a), Data::Number(b)) => Outcome::Number(a % b),
        (Operator::Pow, Data::Number(a), Data::Number(b)) => Outcome::Number(a.powf(*b)),
        (Operator::BAnd, Data::Number(a), Data::Number(b)) => Outcome::Number(((*a as i64) & (*b as i64)) as f64),
        (Operator::BOr, Data::Number(a), Data::Number(b)) => Outcome::Number(((*a as i64) | (*b as i64)) as f64),
        (Operator::Xor, Data::Number(a), Data::Number(b)) => Outcome::Number(((*a as i64) ^ (*b as i64)) as f64),
        (Operator::Shl, Data::Number(a), Data::Number(b)) => Outcome::Number(((*a as i64) << (*b as i64)) as f64),
        (Operator::Shr, Data::Number(a), Data::Number(b)) => Outcome::Number(((*a as i64) >> (*b as i64)) as f64),
        (Operator::Lt, _, _) => match (to_number(lhs), to_number(rhs)) {
            (Some(a), Some(b)) => Outcome::Boolean(a < b),
            _ => Outcome::Error(CoreDiagnostic::type_mismatch("<", &lhs.format().to_string())),
        },
        (Operator::Gt, _, _) => match (to_number(lhs), to_number(rhs)) {
            (Some(a), Some(b)) => Outcome::Boolean(a > b),
            _ => Outcome::Error(CoreDiagnostic::type_mismatch(">", &lhs.format().to_string())),
        },
        (Operator::Le, _, _) => match (to_number(lhs), to_number(rhs)) {
            (Some(a), Some(b)) => Outcome::Boolean(a <= b),
            _ => Outcome::Error(CoreDiagnostic::type_mismatch("<=", &lhs.format().to_string())),
        },
        (Operator::Ge, _, _) => match (to_number(lhs), to_number(rhs)) {
            (Some(a), Some(b)) => Outcome::Boolean(a >= b),
            _ => Outcome::Error(CoreDiagnostic::type_mismatch(">=", &lhs.format().to_string())),
        },
        (Operator::Eq, _, _) => Outcome::Boolean(structural_eq(lhs, rhs)),
        (Operator::Ne, _, _) => Outcome::Boolean(!structural_eq(lhs, rhs)),
        (Operator::And, _, _) => Outcome::Boolean(to_boolean(lhs) && to_boolean(rhs)),
        (Operator::Or, _, _) => Outcome::Boolean(to_boolean(lhs) || to_boolean(rhs)),
        (Operator::Add, Data::Object(a), _) if a.as_string().is_some() => {
            let s = a.as_string().unwrap();
            let rhs_str = to_display_string(rhs);
            Outcome::Str(format!("{}{}", s.value, rhs_str))
        }
        _ => Outcome::Error(CoreDiagnostic::type_mismatch(
            operator_symbol(op),
            &lhs.format().to_string(),
        )),
    }
}

pub fn apply_unary(op: Operator, operand: &Data) -> Outcome {
    if matches!(operand, Data::Object(_)) {
        return Outcome::Overload(op);
    }
    match (op, operand) {
        (Operator::Neg, Data::Number(n)) => Outcome::Number(-n),
        (Operator::Plus, Data::Number(n)) => Outcome::Number(*n),
        (Operator::Not, _) => Outcome::Boolean(!to_boolean(operand)),
        (Operator::PreInc | Operator::PostInc, Data::Number(n)) => Outcome::Number(n + 1.0),
        (Operator::PreDec | Operator::PostDec, Data::Number(n)) => Outcome::Number(n - 1.0),
        (Operator::ToNumber, _) => to_number(operand).map(Outcome::Number).unwrap_or_else(|| {
            Outcome::Error(CoreDiagnostic::type_mismatch("toNumber", &operand.format().to_string()))
        }),
        (Operator::ToBoolean, _) => Outcome::Boolean(to_boolean(operand)),
        (Operator::ToString, _) => Outcome::Str(to_display_string(operand)),
        _ => Outcome::Error(CoreDiagnostic::type_mismatch(operator_symbol(op), &operand.format().to_string())),
    }
}

fn structural_eq(a: &Data, b: &Data) -> bool {
    match (a, b) {
        (Data::Number(x), Data::Number(y)) => x == y,
        (Data::Boolean(x), Data::Boolean(y)) => x == y,
        (Data::None, Data::None) | (Data::Null, Data::Null) => true,
        (Data::Object(x), Data::Object(y)) => match (x.as_string(), y.as_string()) {
            (Some(sx), Some(sy)) => sx.value == sy.value,
            _ => x.class == y.class,
        },
        _ => false,
    }
}

fn to_display_string(d: &Data) -> String {
    match d {
        Data::Number(n) => number_to_string(*n),
        Data::Boolean(b) => b.to_string(),
        Data::None => "none".to_string(),
        Data::Null => "null".to_string(),
        Data::Object(o) => o.as_string().map(|s| s.value.clone()).unwrap_or_else(|| "<object>".to_string()),
        Data::Package(p) => p.name(),
        Data::Function(_) => "<function>".to_string(),
    }
}

fn operator_symbol(op: Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mul => "*",
        Operator::Div => "/",
        Operator::Pow => "**",
        Operator::Mod => "%",
        Operator::BAnd => "&",
        Operator::BOr => "|",
        Operator::Xor => "^",
        Operator::Shl => "<<",
        Operator::Shr => ">>",
        Operator::Not => "!",
        Operator::And => "&&",
        Operator::Or => "||",
        Operator::Eq => "==",
        Operator::Ne => "!=",
        Operator::Lt => "<",
        Operator::Gt => ">",
        Operator::Le => "<=",
        Operator::Ge => ">=",
        Operator::Neg => "unary -",
        Operator::Plus => "unary +",
        Operator::PreInc | Operator::PostInc => "++",
        Operator::PreDec | Operator::PostDec => "--",
        Operator::Call => "()",
        Operator::New => "new",
        Operator::Delete => "delete",
        Operator::Copy => "=",
        Operator::Subscript => "[]",
        Operator::SubscriptMove => "[]=",
        Operator::In => "in",
        Operator::ToString => "toString",
        Operator::ToNumber => "toNumber",
        Operator::ToBoolean => "toBoolean",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_arithmetic() {
        match apply_binary(Operator::Add, &Data::Number(1.0), &Data::Number(2.0)) {
            Outcome::Number(n) => assert_eq!(n, 3.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_errors() {
        match apply_binary(Operator::Div, &Data::Number(1.0), &Data::Number(0.0)) {
            Outcome::Error(_) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn none_equals_none_but_not_null() {
        match apply_binary(Operator::Eq, &Data::None, &Data::None) {
            Outcome::Boolean(b) => assert!(b),
            other => panic!("unexpected {other:?}"),
        }
        match apply_binary(Operator::Eq, &Data::None, &Data::Null) {
            Outcome::Boolean(b) => assert!(!b),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn object_lhs_defers_to_overload() {
        use crate::class::ClassId;
        use crate::object::ObjectData;
        let obj = Data::Object(ObjectData::new_instance(ClassId(0), Vec::new()));
        match apply_binary(Operator::Add, &obj, &Data::Number(1.0)) {
            Outcome::Overload(Operator::Add) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn canonical_number_round_trips_through_string() {
        assert_eq!(number_to_string(parse_numeric_prefix("42").unwrap()), "42");
    }
}
