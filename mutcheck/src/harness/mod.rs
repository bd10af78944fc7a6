//! Synthesis of the C driver translation units: the equivalence-check
//! driver consumed by the symbolic verifier and the fuzz driver consumed by
//! the coverage-guided fuzzer.
//!
//! Both drivers are generated from the same [`TypeSignature`]
//! and share naming and assertion construction, so the assertion a verifier
//! counterexample violates is the same assertion a fuzzer crash violates.
//! Generation is deterministic: the same instruction always yields
//! byte-identical source text.

use std::{fs, path::Path};

use crate::{
    insn::Insn,
    types::{cc_fields, ArgType, OutputType, ScalarType, TypeSignature},
    Error,
};

pub mod eqvcheck;
pub mod fuzzer;

pub use eqvcheck::EqvDriver;
pub use fuzzer::{FuzzDriver, FuzzVariant};

/// The fixed name the mutated copy of the semantics function is renamed to
/// before it is linked into a driver unit.
pub const MUTATED_FN: &str = "mutated_fn";

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Find the byte offsets of whole-identifier occurrences of `ident`.
fn ident_occurrences(src: &str, ident: &str) -> Vec<usize> {
    let mut out = Vec::new();
    if ident.is_empty() {
        return out;
    }
    let mut from = 0;
    while let Some(pos) = src[from..].find(ident) {
        let at = from + pos;
        let before_ok = src[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c));
        let after_ok = src[at + ident.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_ident_char(c));
        if before_ok && after_ok {
            out.push(at);
        }
        from = at + ident.len();
    }
    out
}

/// Rename every whole-identifier occurrence of `from` to `to`.
///
/// This is a lexical rewrite of the mutated unit, not an AST-level rename;
/// it cannot touch identifiers that merely contain `from` as a substring,
/// but it will rewrite occurrences in comments or strings.
pub fn rename_identifier(src: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut last = 0;
    for at in ident_occurrences(src, from) {
        out.push_str(&src[last..at]);
        out.push_str(to);
        last = at + from.len();
    }
    out.push_str(&src[last..]);
    out
}

/// Load a source unit needed for driver assembly: the oracle unit, or a
/// mutant unit the mutation stage produced. Absence means the producing
/// stage has to rerun before this instruction's drivers can be built.
pub fn load_source_unit<P>(path: P) -> Result<String, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    fs::read_to_string(path)
        .map_err(|e| Error::missing_artifact(format!("{}: {e}", path.display())))
}

/// Strip a leading address-of token from a generated call-argument
/// expression, yielding the expression the equivalence predicate compares.
pub fn deref_expr(call_arg: &str) -> &str {
    call_arg.strip_prefix('&').unwrap_or(call_arg)
}

/// Extract the text of a function definition from a C source, by locating
/// the identifier and matching the brace pair of its body.
///
/// Literal text processing only; good enough for the generated
/// single-instruction sources this pipeline feeds it.
pub fn extract_function(src: &str, fn_name: &str) -> Result<String, Error> {
    for at in ident_occurrences(src, fn_name) {
        let Some(extracted) = try_extract_at(src, at, fn_name) else {
            continue;
        };
        return Ok(extracted);
    }
    Err(Error::missing_artifact(format!(
        "no definition of `{fn_name}` found"
    )))
}

fn try_extract_at(src: &str, at: usize, fn_name: &str) -> Option<String> {
    // the identifier must be directly followed by the parameter list
    let mut depth = 0usize;
    let mut params_len = None;
    for (off, c) in src[at + fn_name.len()..].char_indices() {
        match c {
            c if c.is_whitespace() && depth == 0 => {}
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    params_len = Some(off + 1);
                    break;
                }
            }
            _ if depth > 0 => {}
            _ => return None,
        }
    }
    let params_end = at + fn_name.len() + params_len?;

    // a definition carries a brace-enclosed body next; a call or prototype
    // does not
    let after = src[params_end..].trim_start();
    if !after.starts_with('{') {
        return None;
    }
    let brace_at = params_end + (src[params_end..].len() - after.len());

    let mut depth = 0usize;
    for (off, c) in src[brace_at..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = brace_at + off + 1;
                    let start = decl_start(src, at);
                    return Some(src[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

// walk back over the return type to the previous statement boundary,
// skipping any preprocessor lines in between
fn decl_start(src: &str, ident_at: usize) -> usize {
    let mut boundary = src[..ident_at].rfind([';', '}']).map_or(0, |p| p + 1);
    loop {
        let rest = &src[boundary..ident_at];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with('#') {
            break;
        }
        let at_hash = boundary + (rest.len() - trimmed.len());
        match src[at_hash..ident_at].find('\n') {
            Some(nl) => boundary = at_hash + nl + 1,
            None => break,
        }
    }
    boundary + (src[boundary..ident_at].len() - src[boundary..ident_at].trim_start().len())
}

/// Call-argument text for the oracle call and the mutated call.
///
/// Inout arguments are passed as pointers to per-callee copies so the two
/// calls cannot observe each other's writes; a condition-code side output
/// appends a pointer parameter after the declared arguments.
pub(crate) fn call_args<F>(sig: &TypeSignature, scalar_expr: F) -> (Vec<String>, Vec<String>)
where
    F: Fn(usize) -> String,
{
    let mut orig = Vec::new();
    let mut mutd = Vec::new();
    for (i, _arg) in sig.args().iter().enumerate() {
        if sig.is_inout(i) {
            orig.push(format!("&arg{i}_orig"));
            mutd.push(format!("&arg{i}_mut"));
        } else {
            let e = scalar_expr(i);
            orig.push(e.clone());
            mutd.push(e);
        }
    }
    if sig.outputs().iter().any(|o| matches!(o, OutputType::CondCode)) {
        orig.push("&ret_orig_cc".to_string());
        mutd.push("&ret_mut_cc".to_string());
    }
    (orig, mutd)
}

/// The C type of the primary return value.
pub(crate) fn ret_type(insn: &Insn, sig: &TypeSignature) -> String {
    match sig.outputs()[0] {
        OutputType::Scalar(ty) => ty.c_name().to_string(),
        OutputType::PredPair { .. } => format!("struct {}_ret", insn.name()),
        // rejected by TypeSignature::new
        OutputType::CondCode => unreachable!("condition code as primary output"),
    }
}

fn cc_eqv(a: &str, b: &str) -> String {
    cc_fields()
        .iter()
        .map(|(name, ty)| ty.check_eqv(&format!("{a}.{name}"), &format!("{b}.{name}")))
        .collect::<Vec<_>>()
        .join(" && ")
}

/// The assertion lines shared by both drivers: the primary equivalence
/// predicate, then field-wise equality for every side output and inout
/// argument, each on the dereferenced call-argument expression.
pub(crate) fn assert_lines(sig: &TypeSignature) -> Vec<String> {
    let mut out = Vec::new();

    let primary = match sig.outputs()[0] {
        OutputType::Scalar(ty) => ty.check_eqv("ret_orig", "ret_mut"),
        OutputType::PredPair { value } => format!(
            "({}) && ({})",
            value.check_eqv("ret_orig.value", "ret_mut.value"),
            ScalarType::Pred.check_eqv("ret_orig.pred", "ret_mut.pred"),
        ),
        OutputType::CondCode => unreachable!("condition code as primary output"),
    };
    out.push(format!("  assert({primary});"));

    if sig.outputs().iter().any(|o| matches!(o, OutputType::CondCode)) {
        out.push(format!(
            "  assert({});",
            cc_eqv(deref_expr("&ret_orig_cc"), deref_expr("&ret_mut_cc"))
        ));
    }

    for (i, arg) in sig.args().iter().enumerate() {
        if !sig.is_inout(i) {
            continue;
        }
        let a = deref_expr(&format!("&arg{i}_orig")).to_string();
        let b = deref_expr(&format!("&arg{i}_mut")).to_string();
        let pred = match arg {
            ArgType::Scalar(ty) => ty.check_eqv(&a, &b),
            ArgType::CondCode => cc_eqv(&a, &b),
        };
        out.push(format!("  assert({pred});"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{deref_expr, extract_function, rename_identifier};

    #[test]
    fn test_rename_is_whole_identifier() {
        let src = "float execute_add(float a) { return execute_add_sat(a); }";
        let out = rename_identifier(src, "execute_add", "mutated_fn");
        assert_eq!(
            out,
            "float mutated_fn(float a) { return execute_add_sat(a); }"
        );
    }

    #[test]
    fn test_rename_all_occurrences() {
        let src = "int f(void);\nint f(void) { return f(); }";
        assert_eq!(
            rename_identifier(src, "f", "g"),
            "int g(void);\nint g(void) { return g(); }"
        );
    }

    #[test]
    fn test_deref_expr() {
        assert_eq!(deref_expr("&arg2_orig"), "arg2_orig");
        assert_eq!(deref_expr("ret_orig"), "ret_orig");
    }

    #[test]
    fn test_extract_function() {
        let src = "#include <math.h>\n\nstatic int helper(int x) { return x + 1; }\n\nfloat execute_abs_f32(float a) {\n  if (a < 0.0f) { return -a; }\n  return a;\n}\n";
        let f = extract_function(src, "execute_abs_f32").unwrap();
        assert!(f.starts_with("float execute_abs_f32(float a) {"));
        assert!(f.ends_with('}'));
        assert!(f.contains("return -a;"));
    }

    #[test]
    fn test_extract_skips_calls_and_prototypes() {
        let src = "int target(int);\nint caller(void) { return target(1); }\nint target(int x) { return x; }\n";
        let f = extract_function(src, "target").unwrap();
        assert_eq!(f, "int target(int x) { return x; }");
    }

    #[test]
    fn test_extract_missing_function() {
        assert!(extract_function("int a;\n", "execute_foo").is_err());
    }
}
