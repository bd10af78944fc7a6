//! The equivalence-check driver: a `main` the symbolic verifier explores,
//! with one nondeterministic variable per input and an assertion that the
//! oracle and the mutated function agree.

use crate::{
    harness::{assert_lines, call_args, ret_type, MUTATED_FN},
    insn::Insn,
    types::{cc_fields, ArgType, OutputType, TypeSignature, CC_STRUCT},
    Error,
};

/// Synthesizes the equivalence-check driver for one instruction.
#[derive(Debug, Clone, Copy)]
pub struct EqvDriver<'a> {
    insn: &'a Insn,
    sig: &'a TypeSignature,
}

impl<'a> EqvDriver<'a> {
    /// A driver generator for `insn` with signature `sig`.
    pub fn new(insn: &'a Insn, sig: &'a TypeSignature) -> Self {
        Self { insn, sig }
    }

    /// The `nondet_<type>()` extern declarations the driver needs, one per
    /// distinct input scalar type, in first-use order.
    pub fn decls(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut push = |decl: String| {
            if !out.contains(&decl) {
                out.push(decl);
            }
        };
        for arg in self.sig.args() {
            match arg {
                ArgType::Scalar(ty) => push(ty.nondet_decl()),
                ArgType::CondCode => {
                    for (_, ty) in cc_fields() {
                        push(ty.nondet_decl());
                    }
                }
            }
        }
        out
    }

    /// The driver source text. Deterministic: byte-identical across calls.
    pub fn synthesize(&self) -> String {
        let sig = self.sig;
        let mut out = self.decls();
        out.push(String::new());
        out.push("int main(void) {".to_string());

        for (i, arg) in sig.args().iter().enumerate() {
            let cty = arg.c_name();
            out.push(format!("  {cty} arg{i};"));
            if sig.is_inout(i) {
                out.push(format!("  {cty} arg{i}_orig;"));
                out.push(format!("  {cty} arg{i}_mut;"));
            }
        }
        let rty = ret_type(self.insn, sig);
        out.push(format!("  {rty} ret_orig;"));
        out.push(format!("  {rty} ret_mut;"));
        let has_cc_out = sig
            .outputs()
            .iter()
            .any(|o| matches!(o, OutputType::CondCode));
        if has_cc_out {
            out.push(format!("  {CC_STRUCT} ret_orig_cc;"));
            out.push(format!("  {CC_STRUCT} ret_mut_cc;"));
        }

        for (i, arg) in sig.args().iter().enumerate() {
            match arg {
                ArgType::Scalar(ty) => out.push(format!("  arg{i} = {};", ty.nondet_fn())),
                ArgType::CondCode => {
                    for (name, ty) in cc_fields() {
                        out.push(format!("  arg{i}.{name} = {};", ty.nondet_fn()));
                    }
                }
            }
        }

        for (i, arg) in sig.args().iter().enumerate() {
            match arg {
                ArgType::Scalar(ty) => {
                    if let Some(check) = ty.domain_check(&format!("arg{i}")) {
                        out.push(format!("  __CPROVER_assume({check});"));
                    }
                }
                ArgType::CondCode => {
                    for (name, ty) in cc_fields() {
                        if let Some(check) = ty.domain_check(&format!("arg{i}.{name}")) {
                            out.push(format!("  __CPROVER_assume({check});"));
                        }
                    }
                }
            }
        }

        for (i, _) in sig.args().iter().enumerate() {
            if sig.is_inout(i) {
                out.push(format!("  arg{i}_orig = arg{i};"));
                out.push(format!("  arg{i}_mut = arg{i};"));
            }
        }
        if has_cc_out {
            for (name, _) in cc_fields() {
                out.push(format!("  ret_orig_cc.{name} = 0u;"));
                out.push(format!("  ret_mut_cc.{name} = 0u;"));
            }
        }

        let (orig_args, mut_args) = call_args(sig, |i| format!("arg{i}"));
        out.push(format!(
            "  ret_orig = {}({});",
            self.insn.semantics_fn(),
            orig_args.join(", ")
        ));
        out.push(format!(
            "  ret_mut = {MUTATED_FN}({});",
            mut_args.join(", ")
        ));

        out.extend(assert_lines(sig));
        out.push("  return 0;".to_string());
        out.push("}".to_string());

        let mut text = out.join("\n");
        text.push('\n');
        text
    }

    /// Assemble the full driver translation unit: the oracle unit, the
    /// mutated function extracted from `mutant_unit` and renamed to
    /// [`MUTATED_FN`], and the driver `main`.
    pub fn render_unit(&self, oracle_unit: &str, mutant_unit: &str) -> Result<String, Error> {
        let fn_name = self.insn.semantics_fn();
        let mutant_fn = super::extract_function(mutant_unit, &fn_name)?;
        let mutant_fn = super::rename_identifier(&mutant_fn, &fn_name, MUTATED_FN);

        let mut out = String::new();
        out.push_str(oracle_unit.trim_end());
        out.push_str("\n\n");
        out.push_str(mutant_fn.trim_end());
        out.push_str("\n\n");
        out.push_str(&self.synthesize());
        Ok(out)
    }
}
