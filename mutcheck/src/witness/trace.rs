//! Decoding of verifier counterexample traces.
//!
//! The verifier emits either a structured JSON trace (`--json-ui`) or a
//! line-oriented text trace. Both formats normalize into the same
//! [`TraceAssign`] record before canonicalization, so the two decoders
//! cannot drift apart in how they classify literals.

use std::sync::OnceLock;

use hashbrown::HashMap;
use regex::Regex;
use serde_json::Value;

use crate::{witness::canon, Error};

/// Prefix of input-argument variables in generated drivers.
pub const ARG_PREFIX: &str = "arg";

/// Prefix of output-result variables in generated drivers.
pub const RET_PREFIX: &str = "ret_";

/// How a trace literal is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    /// An IEEE-754 float; the bit-pattern width picks 32 or 64 bit
    Float,
    /// A two's-complement signed integer
    Signed,
    /// An unsigned integer
    Unsigned,
}

/// One normalized variable assignment recovered from a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceAssign {
    /// Left-hand side variable name, possibly a member path (`ret_orig_cc.cf`)
    pub lhs: String,
    /// Literal interpretation
    pub kind: LiteralKind,
    /// The value's bit pattern, most significant bit first
    pub bits: String,
}

impl TraceAssign {
    /// The canonical text of this assignment's value.
    pub fn canonical(&self) -> Result<String, Error> {
        match self.kind {
            LiteralKind::Float => match self.bits.len() {
                32 => canon::bin_to_f32(&self.bits),
                64 => canon::bin_to_f64(&self.bits),
                w => Err(Error::unsupported_type(format!(
                    "{w}-bit float in trace for `{}`",
                    self.lhs
                ))),
            },
            LiteralKind::Signed => canon::bin_to_signed(&self.bits),
            LiteralKind::Unsigned => canon::bin_to_unsigned(&self.bits),
        }
    }
}

// keeps the last write per variable while preserving first-seen order, so
// re-decoding the same trace is byte-identical
#[derive(Debug, Default)]
struct AssignCollector {
    order: Vec<TraceAssign>,
    index: HashMap<String, usize>,
}

impl AssignCollector {
    fn push(&mut self, assign: TraceAssign) {
        if let Some(&i) = self.index.get(&assign.lhs) {
            self.order[i] = assign;
        } else {
            self.index.insert(assign.lhs.clone(), self.order.len());
            self.order.push(assign);
        }
    }

    fn into_assigns(self) -> Vec<TraceAssign> {
        self.order
    }
}

fn interesting(lhs: &str) -> bool {
    lhs.starts_with(ARG_PREFIX) || lhs.starts_with(RET_PREFIX)
}

/// Decode a structured JSON trace.
///
/// Returns `None` when the terminal status record says `success`: the
/// verifier proved the mutant equivalent and there is no counterexample.
/// On `failure`, only the first trace in the result is examined.
pub fn decode_json(text: &str) -> Result<Option<Vec<TraceAssign>>, Error> {
    let data: Value = serde_json::from_str(text)?;
    let records = data
        .as_array()
        .ok_or_else(|| Error::illegal_state("verifier output is not a JSON array"))?;

    let status = records
        .last()
        .and_then(|r| r.get("cProverStatus"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::illegal_state("cProverStatus not found in status record"))?;

    match status {
        "success" => return Ok(None),
        "failure" => {}
        other => {
            return Err(Error::illegal_state(format!(
                "unexpected cProverStatus {other:?}"
            )));
        }
    }

    let result = records
        .iter()
        .find_map(|r| r.get("result"))
        .and_then(Value::as_array)
        .ok_or_else(|| Error::illegal_state("status is failure, but there is no result"))?;

    let trace = result
        .iter()
        .find_map(|r| r.get("trace"))
        .and_then(Value::as_array)
        .ok_or_else(|| Error::illegal_state("no trace found in result"))?;

    let mut collector = AssignCollector::default();
    for step in trace {
        if step.get("stepType").and_then(Value::as_str) != Some("assignment")
            || step.get("assignmentType").and_then(Value::as_str) != Some("variable")
        {
            continue;
        }
        let Some(lhs) = step.get("lhs").and_then(Value::as_str) else {
            continue;
        };
        if !interesting(lhs) {
            continue;
        }
        let Some(value) = step.get("value") else {
            continue;
        };
        if let Some(assign) = classify_json_value(lhs, value)? {
            collector.push(assign);
        }
    }

    Ok(Some(collector.into_assigns()))
}

fn classify_json_value(lhs: &str, value: &Value) -> Result<Option<TraceAssign>, Error> {
    let Some(name) = value.get("name").and_then(Value::as_str) else {
        return Ok(None);
    };
    let kind = match name {
        "float" => LiteralKind::Float,
        "integer" => {
            let ctype = value.get("type").and_then(Value::as_str).unwrap_or("");
            if ctype.contains("unsigned") {
                LiteralKind::Unsigned
            } else {
                LiteralKind::Signed
            }
        }
        // whole-struct or pointer records; member assignments carry the
        // scalar values we want
        _ => {
            log::debug!("skipping trace value of kind {name:?} for `{lhs}`");
            return Ok(None);
        }
    };
    let bits = value
        .get("binary")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::illegal_state(format!("trace value for `{lhs}` has no binary")))?;
    Ok(Some(TraceAssign {
        lhs: lhs.to_string(),
        kind,
        bits: bits.replace(' ', ""),
    }))
}

static ASSIGN_LINE: OnceLock<Regex> = OnceLock::new();

fn assign_line() -> &'static Regex {
    ASSIGN_LINE.get_or_init(|| {
        Regex::new(r"(?m)^\s*([A-Za-z_][A-Za-z0-9_.]*)=(.+?)\s*\(([01][01 ]*)\)\s*$")
            .expect("static regex")
    })
}

/// Decode a plain-text trace.
///
/// The literal classification is heuristic, keyed on C literal suffixes;
/// the bit pattern in parentheses is authoritative for the value itself.
pub fn decode_text(text: &str) -> Result<Option<Vec<TraceAssign>>, Error> {
    if text.contains("VERIFICATION SUCCESSFUL") {
        return Ok(None);
    }
    if !text.contains("VERIFICATION FAILED") {
        return Err(Error::illegal_state(
            "no verification verdict in text trace",
        ));
    }

    let mut collector = AssignCollector::default();
    for caps in assign_line().captures_iter(text) {
        let lhs = &caps[1];
        if !interesting(lhs) {
            continue;
        }
        let Some(kind) = classify_text_literal(&caps[2]) else {
            log::debug!("skipping unclassifiable literal {:?} for `{lhs}`", &caps[2]);
            continue;
        };
        collector.push(TraceAssign {
            lhs: lhs.to_string(),
            kind,
            bits: caps[3].replace(' ', ""),
        });
    }

    Ok(Some(collector.into_assigns()))
}

fn classify_text_literal(lit: &str) -> Option<LiteralKind> {
    let lit = lit.trim();
    if lit.is_empty() {
        return None;
    }
    if lit.contains("INFINITY") || lit.contains("NAN") {
        return Some(LiteralKind::Float);
    }

    let body = lit.strip_prefix(['-', '+']).unwrap_or(lit);
    let lower = body.to_ascii_lowercase();
    if lower.starts_with("0x") {
        return Some(LiteralKind::Unsigned);
    }
    if lower.ends_with("ul") || lower.ends_with('u') {
        return Some(LiteralKind::Unsigned);
    }
    if lower.ends_with('f') {
        return Some(LiteralKind::Float);
    }
    if lower.ends_with('l') {
        return Some(LiteralKind::Signed);
    }
    if body.contains('.') || lower.contains('e') {
        return Some(LiteralKind::Float);
    }
    if body.chars().all(|c| c.is_ascii_digit()) {
        return Some(LiteralKind::Signed);
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_json, decode_text, LiteralKind};

    fn assignment(lhs: &str, value: serde_json::Value) -> serde_json::Value {
        json!({
            "stepType": "assignment",
            "assignmentType": "variable",
            "lhs": lhs,
            "value": value,
        })
    }

    fn float_value(bits: u32) -> serde_json::Value {
        json!({
            "name": "float",
            "type": "float",
            "binary": format!("{bits:032b}"),
            "width": 32,
        })
    }

    #[test]
    fn test_success_means_equivalent() {
        let doc = json!([
            {"program": "cbmc"},
            {"cProverStatus": "success"},
        ]);
        assert!(decode_json(&doc.to_string()).unwrap().is_none());
    }

    #[test]
    fn test_failure_yields_last_writes() {
        let doc = json!([
            {"program": "cbmc"},
            {"result": [{
                "trace": [
                    assignment("arg0", float_value(0x3f000000)),
                    assignment("arg0", float_value(0x3f800000)),
                    assignment("tmp7", float_value(0)),
                    {"stepType": "function-call"},
                    assignment("ret_orig", float_value(0x40400000)),
                ],
            }]},
            {"cProverStatus": "failure"},
        ]);

        let assigns = decode_json(&doc.to_string()).unwrap().unwrap();
        assert_eq!(assigns.len(), 2);
        // last write wins, first-seen order is kept
        assert_eq!(assigns[0].lhs, "arg0");
        assert_eq!(assigns[0].canonical().unwrap(), "0x1.0p+0");
        assert_eq!(assigns[1].lhs, "ret_orig");
        assert_eq!(assigns[1].canonical().unwrap(), "0x1.8p+1");
    }

    #[test]
    fn test_failure_without_result_is_an_error() {
        let doc = json!([
            {"program": "cbmc"},
            {"cProverStatus": "failure"},
        ]);
        assert!(decode_json(&doc.to_string()).is_err());
    }

    #[test]
    fn test_integer_signedness_from_c_type() {
        let doc = json!([
            {"result": [{
                "trace": [
                    assignment("arg0", json!({
                        "name": "integer", "type": "unsigned int",
                        "binary": "11111111111111111111111111111111", "width": 32,
                    })),
                    assignment("arg1", json!({
                        "name": "integer", "type": "signed int",
                        "binary": "11111111111111111111111111111111", "width": 32,
                    })),
                ],
            }]},
            {"cProverStatus": "failure"},
        ]);

        let assigns = decode_json(&doc.to_string()).unwrap().unwrap();
        assert_eq!(assigns[0].canonical().unwrap(), "4294967295");
        assert_eq!(assigns[1].canonical().unwrap(), "-1");
    }

    #[test]
    fn test_text_trace_matches_json_classification() {
        let text = "\
State 21 file driver.c line 9
----------------------------------------------------
  arg0=1f (00111111 10000000 00000000 00000000)

State 24 file driver.c line 10
----------------------------------------------------
  arg1=2f (01000000 00000000 00000000 00000000)
  count=7 (00000000 00000000 00000000 00000111)
  ret_orig=3f (01000000 01000000 00000000 00000000)
  ret_orig=3f (01000000 01000000 00000000 00000000)

** Results:
VERIFICATION FAILED
";
        let assigns = decode_text(text).unwrap().unwrap();
        let canon: Vec<_> = assigns
            .iter()
            .map(|a| (a.lhs.as_str(), a.canonical().unwrap()))
            .collect();
        assert_eq!(
            canon,
            vec![
                ("arg0", "0x1.0p+0".to_string()),
                ("arg1", "0x1.0p+1".to_string()),
                ("ret_orig", "0x1.8p+1".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_trace_success() {
        assert!(decode_text("** Results:\nVERIFICATION SUCCESSFUL\n")
            .unwrap()
            .is_none());
        assert!(decode_text("garbage").is_err());
    }

    #[test]
    fn test_text_literal_suffixes() {
        use super::classify_text_literal;

        assert_eq!(classify_text_literal("1.5f"), Some(LiteralKind::Float));
        assert_eq!(classify_text_literal("-INFINITY"), Some(LiteralKind::Float));
        assert_eq!(classify_text_literal("NAN"), Some(LiteralKind::Float));
        assert_eq!(classify_text_literal("12u"), Some(LiteralKind::Unsigned));
        assert_eq!(classify_text_literal("12ul"), Some(LiteralKind::Unsigned));
        assert_eq!(classify_text_literal("-12"), Some(LiteralKind::Signed));
        assert_eq!(classify_text_literal("12l"), Some(LiteralKind::Signed));
        assert_eq!(classify_text_literal("1.25"), Some(LiteralKind::Float));
        assert_eq!(classify_text_literal(""), None);
    }
}
