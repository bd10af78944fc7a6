//! The fuzz driver: an `LLVMFuzzerTestOneInput` that reinterprets the input
//! buffer as the packed argument struct, plus, for the custom variant, an
//! `LLVMFuzzerCustomMutator` that fills the struct from the per-type
//! stratified samplers.

use crate::{
    codec::StructFormat,
    harness::{assert_lines, call_args, ret_type, MUTATED_FN},
    insn::Insn,
    types::{ArgType, OutputType, ScalarType, TypeSignature, CC_STRUCT},
    Error,
};

/// Which fuzz driver to synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzVariant {
    /// Rely on the fuzzer to mutate the raw bytes
    Simple,
    /// Additionally emit a stratified-sampling custom mutator
    Custom,
}

/// Synthesizes the fuzz driver for one instruction.
#[derive(Debug, Clone)]
pub struct FuzzDriver<'a> {
    insn: &'a Insn,
    sig: &'a TypeSignature,
    fmt: StructFormat,
}

impl<'a> FuzzDriver<'a> {
    /// A driver generator for `insn` with signature `sig`.
    ///
    /// Fails with [`Error::UnsupportedType`] when the argument tuple cannot
    /// be byte-packed (composite arguments); that aborts fuzzing for this
    /// instruction only.
    pub fn new(insn: &'a Insn, sig: &'a TypeSignature) -> Result<Self, Error> {
        let fmt = StructFormat::for_args(sig.args())?;
        Ok(Self { insn, sig, fmt })
    }

    /// The packed layout of the argument struct. Persist it with
    /// [`StructFormat::write_to`] next to the fuzzer binaries; the offline
    /// decoder reads the same descriptor back.
    pub fn format(&self) -> &StructFormat {
        &self.fmt
    }

    fn scalar_args(&self) -> Vec<ScalarType> {
        self.sig
            .args()
            .iter()
            .map(|a| match a {
                ArgType::Scalar(ty) => *ty,
                // rejected in new()
                ArgType::CondCode => unreachable!("composite argument in fuzz driver"),
            })
            .collect()
    }

    fn includes(&self, variant: FuzzVariant) -> Vec<String> {
        let mut out = vec![
            "#include <assert.h>".to_string(),
            "#include <math.h>".to_string(),
            "#include <stddef.h>".to_string(),
            "#include <stdint.h>".to_string(),
        ];
        if variant == FuzzVariant::Custom {
            out.push("#include <stdlib.h>".to_string());
            for ty in self.scalar_args() {
                let inc = format!("#include \"{}\"", ty.sampler_header());
                if !out.contains(&inc) {
                    out.push(inc);
                }
            }
        }
        out
    }

    fn struct_decl(&self) -> Vec<String> {
        let mut out = vec!["struct arg_struct {".to_string()];
        for (i, ty) in self.scalar_args().iter().enumerate() {
            out.push(format!("  {} arg{i};", ty.c_name()));
        }
        out.push("};".to_string());
        out
    }

    /// The driver source text. Deterministic: byte-identical across calls.
    pub fn synthesize(&self, variant: FuzzVariant) -> String {
        let sig = self.sig;
        let mut out = self.includes(variant);
        out.push(String::new());
        out.extend(self.struct_decl());
        out.push(String::new());

        out.push("#ifdef __cplusplus".to_string());
        out.push("extern \"C\"".to_string());
        out.push("#endif".to_string());
        out.push("int LLVMFuzzerTestOneInput(const uint8_t *Data, size_t Size) {".to_string());
        out.push("  struct arg_struct *args;".to_string());
        out.push(String::new());
        out.push("  if (Size != sizeof(struct arg_struct)) return 0;".to_string());
        // ties the compiler's layout to the persisted struct_info descriptor
        out.push(format!(
            "  assert(sizeof(struct arg_struct) == {});",
            self.fmt.size()
        ));
        out.push(String::new());
        out.push("  args = (struct arg_struct *) Data;".to_string());

        let mut domain = Vec::new();
        for (i, ty) in self.scalar_args().iter().enumerate() {
            if let Some(check) = ty.domain_check(&format!("args->arg{i}")) {
                domain.push(format!("  if (!({check})) return 0;"));
            }
        }
        if !domain.is_empty() {
            out.push(String::new());
            out.extend(domain);
        }

        out.push(String::new());
        for (i, ty) in self.scalar_args().iter().enumerate() {
            if sig.is_inout(i) {
                let cty = ty.c_name();
                out.push(format!("  {cty} arg{i}_orig = args->arg{i};"));
                out.push(format!("  {cty} arg{i}_mut = args->arg{i};"));
            }
        }
        let rty = ret_type(self.insn, sig);
        out.push(format!("  {rty} ret_orig;"));
        out.push(format!("  {rty} ret_mut;"));
        if sig
            .outputs()
            .iter()
            .any(|o| matches!(o, OutputType::CondCode))
        {
            out.push(format!("  {CC_STRUCT} ret_orig_cc = {{0}};"));
            out.push(format!("  {CC_STRUCT} ret_mut_cc = {{0}};"));
        }

        out.push(String::new());
        let (orig_args, mut_args) = call_args(sig, |i| format!("args->arg{i}"));
        out.push(format!(
            "  ret_orig = {}({});",
            self.insn.semantics_fn(),
            orig_args.join(", ")
        ));
        out.push(format!(
            "  ret_mut = {MUTATED_FN}({});",
            mut_args.join(", ")
        ));
        out.push(String::new());
        out.extend(assert_lines(sig));
        out.push("  return 0;".to_string());
        out.push("}".to_string());

        if variant == FuzzVariant::Custom {
            out.push(String::new());
            out.extend(self.custom_mutator());
        }

        let mut text = out.join("\n");
        text.push('\n');
        text
    }

    // the stratified-sampling mutator entry point: seed the PRNG from the
    // caller-supplied seed, then fill each argument from its sampler
    fn custom_mutator(&self) -> Vec<String> {
        let mut out = vec![
            "#ifdef __cplusplus".to_string(),
            "extern \"C\"".to_string(),
            "#endif".to_string(),
            "size_t LLVMFuzzerCustomMutator(uint8_t *Data, size_t Size, size_t MaxSize, unsigned int Seed) {".to_string(),
            "  struct arg_struct *args;".to_string(),
            String::new(),
            "  if (MaxSize < sizeof(struct arg_struct)) return 0;".to_string(),
            String::new(),
            "  srandom(Seed);".to_string(),
            "  args = (struct arg_struct *) Data;".to_string(),
        ];
        for (i, ty) in self.scalar_args().iter().enumerate() {
            out.push(format!("  args->arg{i} = {};", ty.sampler_fn()));
        }
        out.push("  return sizeof(struct arg_struct);".to_string());
        out.push("}".to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{FuzzDriver, FuzzVariant};
    use crate::{insn::Insn, types::InsnSigs, Error};

    #[test]
    fn test_simple_driver_shape() {
        let sigs = InsnSigs::builtin();
        let insn = Insn::new("add_rn_f32");
        let driver = FuzzDriver::new(&insn, sigs.lookup(insn.name()).unwrap()).unwrap();
        let text = driver.synthesize(FuzzVariant::Simple);

        assert!(text.contains("int LLVMFuzzerTestOneInput(const uint8_t *Data, size_t Size) {"));
        assert!(text.contains("  if (Size != sizeof(struct arg_struct)) return 0;"));
        assert!(text.contains("  assert(sizeof(struct arg_struct) == 8);"));
        assert!(text.contains("  args = (struct arg_struct *) Data;"));
        assert!(text.contains("  ret_orig = execute_add_rn_f32(args->arg0, args->arg1);"));
        assert!(text.contains("  ret_mut = mutated_fn(args->arg0, args->arg1);"));
        assert!(
            text.contains("  assert((isnan(ret_orig) && isnan(ret_mut)) || (ret_orig == ret_mut));")
        );
        assert!(!text.contains("LLVMFuzzerCustomMutator"));
        assert_eq!(driver.format().descriptor(), "ff");
    }

    #[test]
    fn test_domain_check_is_an_early_return() {
        let sigs = InsnSigs::builtin();
        let insn = Insn::new("selp_f32");
        let driver = FuzzDriver::new(&insn, sigs.lookup(insn.name()).unwrap()).unwrap();
        let text = driver.synthesize(FuzzVariant::Simple);

        assert!(text.contains("  if (!(args->arg2 <= 1u)) return 0;"));
    }

    #[test]
    fn test_custom_variant_emits_mutator() {
        let sigs = InsnSigs::builtin();
        let insn = Insn::new("selp_f32");
        let driver = FuzzDriver::new(&insn, sigs.lookup(insn.name()).unwrap()).unwrap();
        let text = driver.synthesize(FuzzVariant::Custom);

        assert!(text.contains("#include \"float_sampler.h\""));
        assert!(text.contains("#include \"uint32_sampler.h\""));
        // sampler headers are deduplicated: two float args, one include
        assert_eq!(text.matches("#include \"float_sampler.h\"").count(), 1);
        assert!(text.contains(
            "size_t LLVMFuzzerCustomMutator(uint8_t *Data, size_t Size, size_t MaxSize, unsigned int Seed) {"
        ));
        assert!(text.contains("  srandom(Seed);"));
        assert!(text.contains("  args->arg0 = sample_float();"));
        assert!(text.contains("  args->arg2 = sample_uint32_t();"));
        assert!(text.contains("  return sizeof(struct arg_struct);"));
    }

    #[test]
    fn test_composite_arguments_are_rejected() {
        let sigs = InsnSigs::builtin();
        let insn = Insn::new("addc_cc_u32");
        let err = FuzzDriver::new(&insn, sigs.lookup(insn.name()).unwrap()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));
    }

    #[test]
    fn test_cc_output_in_fuzz_driver() {
        let sigs = InsnSigs::builtin();
        let insn = Insn::new("add_cc_u32");
        let driver = FuzzDriver::new(&insn, sigs.lookup(insn.name()).unwrap()).unwrap();
        let text = driver.synthesize(FuzzVariant::Simple);

        assert!(text.contains("  struct cc_register ret_orig_cc = {0};"));
        assert!(text.contains("execute_add_cc_u32(args->arg0, args->arg1, &ret_orig_cc);"));
        assert!(text.contains("  assert(ret_orig_cc.cf == ret_mut_cc.cf);"));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let sigs = InsnSigs::builtin();
        let insn = Insn::new("set_gt_u32_f32");
        let driver = FuzzDriver::new(&insn, sigs.lookup(insn.name()).unwrap()).unwrap();
        assert_eq!(
            driver.synthesize(FuzzVariant::Custom),
            driver.synthesize(FuzzVariant::Custom)
        );
    }
}
