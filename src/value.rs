use crate::error::RuntimeError;
use crate::types::Type;
use serde_json::json;

/// A tagged scalar value on the VM stack or in a memory chunk.
///
/// Arithmetic between two numerics widens to the wider operand; `+` on two
/// strings concatenates. Mixing a string with a numeric in an arithmetic or
/// logical operation is an illegal operation, as are division by zero and
/// modulo of non-integers.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Invalid,
    Int32(i32),
    Double(f64),
    Str(String),
}

/// Snapshot type tags; part of the snapshot file format.
const JSON_INVALID: u32 = 0;
const JSON_INT32: u32 = 1;
const JSON_DOUBLE: u32 = 2;
const JSON_STRING: u32 = 3;

impl Value {
    pub fn zero(t: Type) -> Value {
        match t.scalar_type() {
            Type::Int32 => Value::Int32(0),
            Type::Str => Value::Str(String::new()),
            _ => Value::Double(0.0),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Invalid)
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::Str(_))
    }

    /// Coerces to an integer. Doubles round half away from zero; strings are
    /// parsed like `stoi` (leading integer, empty string is 0).
    pub fn as_int(&self) -> Result<i32, RuntimeError> {
        match self {
            Value::Int32(v) => Ok(*v),
            Value::Double(v) => Ok(v.round() as i32),
            Value::Str(s) => {
                if s.is_empty() {
                    Ok(0)
                } else {
                    parse_leading_int(s).ok_or(RuntimeError::IllegalOperation)
                }
            }
            Value::Invalid => Ok(0),
        }
    }

    pub fn as_double(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Int32(v) => Ok(f64::from(*v)),
            Value::Double(v) => Ok(*v),
            Value::Str(s) => {
                if s.is_empty() {
                    Ok(0.0)
                } else {
                    parse_leading_double(s).ok_or(RuntimeError::IllegalOperation)
                }
            }
            Value::Invalid => Ok(0.0),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Value::Int32(v) => v.to_string(),
            Value::Double(v) => format_double(*v),
            Value::Str(s) => s.clone(),
            Value::Invalid => String::new(),
        }
    }

    pub fn negate(&mut self) -> Result<(), RuntimeError> {
        match self {
            Value::Int32(v) => *v = v.wrapping_neg(),
            Value::Double(v) => *v = -*v,
            _ => return Err(RuntimeError::IllegalOperation),
        }
        Ok(())
    }

    pub fn inc(&mut self) -> Result<(), RuntimeError> {
        match self {
            Value::Int32(v) => *v = v.wrapping_add(1),
            Value::Double(v) => *v += 1.0,
            _ => return Err(RuntimeError::IllegalOperation),
        }
        Ok(())
    }

    pub fn dec(&mut self) -> Result<(), RuntimeError> {
        match self {
            Value::Int32(v) => *v = v.wrapping_sub(1),
            Value::Double(v) => *v -= 1.0,
            _ => return Err(RuntimeError::IllegalOperation),
        }
        Ok(())
    }

    /// Logical not; the operand is coerced to an integer first.
    pub fn logical_not(&self) -> Result<Value, RuntimeError> {
        if !self.is_numeric() {
            return Err(RuntimeError::IllegalOperation);
        }
        Ok(Value::Int32(if self.as_int()? == 0 { 1 } else { 0 }))
    }

    /// Resets to the type-appropriate zero, keeping the tag.
    pub fn clear(&mut self) {
        match self {
            Value::Int32(v) => *v = 0,
            Value::Double(v) => *v = 0.0,
            Value::Str(s) => s.clear(),
            Value::Invalid => {}
        }
    }

    pub fn add(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                let mut s = a.clone();
                s.push_str(b);
                Ok(Value::Str(s))
            }
            (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(a.wrapping_add(*b))),
            _ => self.numeric_pair(rhs).map(|(a, b)| Value::Double(a + b)),
        }
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(a.wrapping_sub(*b))),
            _ => self.numeric_pair(rhs).map(|(a, b)| Value::Double(a - b)),
        }
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(a.wrapping_mul(*b))),
            _ => self.numeric_pair(rhs).map(|(a, b)| Value::Double(a * b)),
        }
    }

    pub fn div(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Int32(a), Value::Int32(b)) => {
                if *b == 0 {
                    Err(RuntimeError::IllegalOperation)
                } else {
                    Ok(Value::Int32(a.wrapping_div(*b)))
                }
            }
            _ => {
                let (a, b) = self.numeric_pair(rhs)?;
                if b == 0.0 {
                    Err(RuntimeError::IllegalOperation)
                } else {
                    Ok(Value::Double(a / b))
                }
            }
        }
    }

    pub fn rem(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Int32(a), Value::Int32(b)) => {
                if *b == 0 {
                    Err(RuntimeError::IllegalOperation)
                } else {
                    Ok(Value::Int32(a.wrapping_rem(*b)))
                }
            }
            _ => Err(RuntimeError::IllegalOperation),
        }
    }

    pub fn bit_and(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        if !self.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::IllegalOperation);
        }
        Ok(Value::Int32(self.as_int()? & rhs.as_int()?))
    }

    pub fn bit_or(&self, rhs: &Value) -> Result<Value, RuntimeError> {
        if !self.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::IllegalOperation);
        }
        Ok(Value::Int32(self.as_int()? | rhs.as_int()?))
    }

    pub fn logical_and(&self, rhs: &Value) -> Result<bool, RuntimeError> {
        if !self.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::IllegalOperation);
        }
        Ok(self.as_int()? != 0 && rhs.as_int()? != 0)
    }

    pub fn logical_or(&self, rhs: &Value) -> Result<bool, RuntimeError> {
        if !self.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::IllegalOperation);
        }
        Ok(self.as_int()? != 0 || rhs.as_int()? != 0)
    }

    /// Comparison per BASIC rules: numeric when both operands are numeric,
    /// lexicographic otherwise.
    pub fn compare(&self, rhs: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        if self.is_numeric() && rhs.is_numeric() {
            let a = self.as_double().unwrap_or(0.0);
            let b = rhs.as_double().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        } else {
            self.as_str().cmp(&rhs.as_str())
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Invalid => json!({ "type": JSON_INVALID }),
            Value::Int32(v) => json!({ "type": JSON_INT32, "i": v }),
            Value::Double(v) => json!({ "type": JSON_DOUBLE, "d": v }),
            Value::Str(s) => json!({ "type": JSON_STRING, "s": s }),
        }
    }

    pub fn from_json(j: &serde_json::Value) -> Value {
        match j.get("type").and_then(|t| t.as_u64()) {
            Some(t) if t == u64::from(JSON_INT32) => Value::Int32(
                j.get("i").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
            ),
            Some(t) if t == u64::from(JSON_DOUBLE) => {
                Value::Double(j.get("d").and_then(|v| v.as_f64()).unwrap_or(0.0))
            }
            Some(t) if t == u64::from(JSON_STRING) => Value::Str(
                j.get("s")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            ),
            _ => Value::Invalid,
        }
    }

    fn numeric_pair(&self, rhs: &Value) -> Result<(f64, f64), RuntimeError> {
        if !self.is_numeric() || !rhs.is_numeric() {
            return Err(RuntimeError::IllegalOperation);
        }
        Ok((self.as_double()?, rhs.as_double()?))
    }
}

/// Renders a double the way BASIC prints numbers: up to six significant
/// digits, trailing zeros stripped, scientific notation outside 1e-5..1e6.
pub fn format_double(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let mag = v.abs().log10().floor() as i32;
    if (-5..6).contains(&mag) {
        let prec = (5 - mag).max(0) as usize;
        trim_fraction(format!("{:.*}", prec, v))
    } else {
        let formatted = format!("{:.5e}", v);
        let mut parts = formatted.splitn(2, 'e');
        let mantissa = trim_fraction(parts.next().unwrap_or("0").to_string());
        let exponent: i32 = parts.next().and_then(|e| e.parse().ok()).unwrap_or(0);
        format!("{}e{}{:02}", mantissa, if exponent < 0 { '-' } else { '+' }, exponent.abs())
    }
}

fn trim_fraction(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Parses a leading integer the way `stoi` does: optional sign, then digits;
/// anything after the digits is ignored. `None` when no digits are present.
pub fn parse_leading_int(s: &str) -> Option<i32> {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    match t[..end].parse::<i64>() {
        Ok(v) => Some(v.max(i64::from(i32::min_value())).min(i64::from(i32::max_value())) as i32),
        Err(_) => Some(if t.starts_with('-') {
            i32::min_value()
        } else {
            i32::max_value()
        }),
    }
}

/// Parses a leading floating-point number the way `atof` does.
pub fn parse_leading_double(s: &str) -> Option<f64> {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let mut seen_digit = false;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        seen_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            seen_digit = true;
        }
    }
    if !seen_digit {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    t[..end].parse().ok()
}
