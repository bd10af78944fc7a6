//! The declarative type model: which argument, output and inout types each
//! instruction has, and how each supported type behaves in generated code.
//!
//! The supported types form a closed set, so everything a signature can
//! reference is resolved when the signature is constructed. Codegen never
//! has to look a type name up in a table and can never fail halfway through
//! an emitted driver.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Name of the C struct modeling the condition-code register.
pub const CC_STRUCT: &str = "struct cc_register";

/// The closed set of scalar types instruction signatures may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// `int8_t`
    S8,
    /// `int16_t`
    S16,
    /// `int32_t`
    S32,
    /// `int64_t`
    S64,
    /// `uint8_t`
    U8,
    /// `uint16_t`
    U16,
    /// `uint32_t`
    U32,
    /// `uint64_t`
    U64,
    /// `unsigned int`, the spelling the semantics database uses for plain
    /// machine words
    UInt,
    /// A predicate: `unsigned int` restricted to the domain {0, 1}
    Pred,
    /// `float`
    F32,
    /// `double`
    F64,
}

impl ScalarType {
    /// The C spelling of this type.
    pub fn c_name(&self) -> &'static str {
        match self {
            Self::S8 => "int8_t",
            Self::S16 => "int16_t",
            Self::S32 => "int32_t",
            Self::S64 => "int64_t",
            Self::U8 => "uint8_t",
            Self::U16 => "uint16_t",
            Self::U32 => "uint32_t",
            Self::U64 => "uint64_t",
            Self::UInt | Self::Pred => "unsigned int",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }

    /// Width in bytes.
    pub fn width(&self) -> usize {
        match self {
            Self::S8 | Self::U8 => 1,
            Self::S16 | Self::U16 => 2,
            Self::S32 | Self::U32 | Self::UInt | Self::Pred | Self::F32 => 4,
            Self::S64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Natural alignment in bytes; for the supported scalars this equals the
    /// width, which is what keeps the packed layout identical to the C one.
    pub fn align(&self) -> usize {
        self.width()
    }

    /// The packed-format code shared between the fuzz driver struct and the
    /// offline decoder.
    pub fn format_code(&self) -> char {
        match self {
            Self::S8 => 'b',
            Self::S16 => 'h',
            Self::S32 => 'i',
            Self::S64 => 'q',
            Self::U8 => 'B',
            Self::U16 => 'H',
            Self::U32 | Self::UInt | Self::Pred => 'I',
            Self::U64 => 'Q',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }

    /// Inverse of [`Self::format_code`]. The `unsigned int` spellings all
    /// share `I` and resolve back to [`ScalarType::U32`].
    pub fn from_format_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => Self::S8,
            'h' => Self::S16,
            'i' => Self::S32,
            'q' => Self::S64,
            'B' => Self::U8,
            'H' => Self::U16,
            'I' => Self::U32,
            'Q' => Self::U64,
            'f' => Self::F32,
            'd' => Self::F64,
            _ => return None,
        })
    }

    /// Is this a floating-point type?
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Is this type signed (two's complement)?
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::S8 | Self::S16 | Self::S32 | Self::S64)
    }

    /// Name of the symbolic-input generator for this type.
    pub fn nondet_fn(&self) -> String {
        format!("nondet_{}()", self.c_name().replace(' ', "_"))
    }

    /// Declaration of the symbolic-input generator.
    pub fn nondet_decl(&self) -> String {
        format!("{} {};", self.c_name(), self.nondet_fn())
    }

    /// Optional domain restriction for values of this type, as a C
    /// expression over `expr`.
    pub fn domain_check(&self, expr: &str) -> Option<String> {
        match self {
            Self::Pred => Some(format!("{expr} <= 1u")),
            _ => None,
        }
    }

    /// The equivalence predicate between two expressions of this type.
    ///
    /// Two NaNs are never IEEE-equal, so a naive `==` would reject a mutant
    /// that agrees with the oracle on a NaN result; floats compare NaN-aware.
    pub fn check_eqv(&self, v1: &str, v2: &str) -> String {
        if self.is_float() {
            format!("(isnan({v1}) && isnan({v2})) || ({v1} == {v2})")
        } else {
            format!("{v1} == {v2}")
        }
    }

    /// Name of the stratified sampler function used by the custom mutator.
    pub fn sampler_fn(&self) -> &'static str {
        match self {
            Self::S8 => "sample_int8_t()",
            Self::S16 => "sample_int16_t()",
            Self::S32 => "sample_int32_t()",
            Self::S64 => "sample_int64_t()",
            Self::U8 => "sample_uint8_t()",
            Self::U16 => "sample_uint16_t()",
            Self::U32 | Self::UInt | Self::Pred => "sample_uint32_t()",
            Self::U64 => "sample_uint64_t()",
            Self::F32 => "sample_float()",
            Self::F64 => "sample_double()",
        }
    }

    /// Header providing [`Self::sampler_fn`].
    pub fn sampler_header(&self) -> &'static str {
        match self {
            Self::S8 => "int8_sampler.h",
            Self::S16 => "int16_sampler.h",
            Self::S32 => "int32_sampler.h",
            Self::S64 => "int64_sampler.h",
            Self::U8 => "uint8_sampler.h",
            Self::U16 => "uint16_sampler.h",
            Self::U32 | Self::UInt | Self::Pred => "uint32_sampler.h",
            Self::U64 => "uint64_sampler.h",
            Self::F32 => "float_sampler.h",
            Self::F64 => "double_sampler.h",
        }
    }
}

impl core::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.c_name())
    }
}

/// Fields of the condition-code register, in declaration order.
///
/// The carry flag is a single bit, modeled as a domain-restricted predicate.
pub fn cc_fields() -> &'static [(&'static str, ScalarType)] {
    &[("cf", ScalarType::Pred)]
}

/// An argument type: a scalar, or the composite condition-code register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgType {
    /// A scalar argument, passed by value
    Scalar(ScalarType),
    /// The condition-code register, passed by pointer and always
    /// read-modify-write
    CondCode,
}

impl ArgType {
    /// The C spelling of this argument type.
    pub fn c_name(&self) -> &'static str {
        match self {
            Self::Scalar(ty) => ty.c_name(),
            Self::CondCode => CC_STRUCT,
        }
    }

    /// Is this a composite type (unsupported for packed fuzzing)?
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::CondCode)
    }
}

/// An output slot of an instruction. The first output is the primary return
/// value; later slots are side outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    /// A scalar return value
    Scalar(ScalarType),
    /// A condition-code register, written through a pointer parameter
    /// appended after the declared arguments
    CondCode,
    /// A `{value, predicate}` pair, collapsed into a generated struct named
    /// after the instruction and returned by value
    PredPair {
        /// Type of the value member
        value: ScalarType,
    },
}

/// The type signature of one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSignature {
    args: Vec<ArgType>,
    outputs: Vec<OutputType>,
    inout: Vec<usize>,
}

impl TypeSignature {
    /// Build a signature, validating its invariants: at least one output,
    /// every inout index in range, and condition-code arguments marked
    /// inout (the register is always passed by pointer and written back).
    pub fn new(
        args: Vec<ArgType>,
        outputs: Vec<OutputType>,
        inout: Vec<usize>,
    ) -> Result<Self, Error> {
        if outputs.is_empty() {
            return Err(Error::illegal_argument(
                "a type signature needs at least a primary output",
            ));
        }
        if matches!(outputs[0], OutputType::CondCode) {
            return Err(Error::illegal_argument(
                "the primary output must be a value, not a condition code",
            ));
        }
        if outputs
            .iter()
            .skip(1)
            .any(|o| !matches!(o, OutputType::CondCode))
        {
            return Err(Error::illegal_argument(
                "side outputs other than the condition code are not supported",
            ));
        }
        if outputs.len() > 2 {
            return Err(Error::illegal_argument(
                "at most one condition-code side output is supported",
            ));
        }
        let mut inout = inout;
        inout.sort_unstable();
        inout.dedup();
        if let Some(&bad) = inout.iter().find(|&&i| i >= args.len()) {
            return Err(Error::illegal_argument(format!(
                "inout index {bad} out of range for {} argument(s)",
                args.len()
            )));
        }
        for (i, arg) in args.iter().enumerate() {
            if arg.is_composite() && !inout.contains(&i) {
                return Err(Error::illegal_argument(format!(
                    "condition-code argument {i} must be marked inout"
                )));
            }
        }
        Ok(Self {
            args,
            outputs,
            inout,
        })
    }

    /// Shorthand for the common all-scalar, single-return case.
    pub fn scalar(args: &[ScalarType], ret: ScalarType) -> Self {
        Self {
            args: args.iter().copied().map(ArgType::Scalar).collect(),
            outputs: vec![OutputType::Scalar(ret)],
            inout: Vec::new(),
        }
    }

    /// The ordered argument types.
    pub fn args(&self) -> &[ArgType] {
        &self.args
    }

    /// The ordered output slots; index 0 is the primary return value.
    pub fn outputs(&self) -> &[OutputType] {
        &self.outputs
    }

    /// Is argument `i` read-modify-write?
    pub fn is_inout(&self, i: usize) -> bool {
        self.inout.binary_search(&i).is_ok()
    }
}

/// The per-instruction signature registry.
///
/// Built once at startup and passed explicitly to whatever needs it; there
/// is deliberately no global registry to mutate.
#[derive(Debug, Clone, Default)]
pub struct InsnSigs {
    map: HashMap<String, TypeSignature>,
}

impl InsnSigs {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature. Returns the previous one, if any.
    pub fn insert<S>(&mut self, insn: S, sig: TypeSignature) -> Option<TypeSignature>
    where
        S: Into<String>,
    {
        self.map.insert(insn.into(), sig)
    }

    /// Look up the signature for an instruction.
    ///
    /// An unknown instruction is an [`Error::UnsupportedType`]: it aborts
    /// generation for that instruction only, not the whole batch.
    pub fn lookup(&self, insn: &str) -> Result<&TypeSignature, Error> {
        self.map.get(insn).ok_or_else(|| {
            Error::unsupported_type(format!("no type signature for instruction {insn}"))
        })
    }

    /// Number of registered instructions.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The registry for the built-in instruction database.
    pub fn builtin() -> Self {
        use ArgType::CondCode as CcArg;
        use OutputType::CondCode as CcOut;
        use ScalarType::{Pred, F32, S32, U32};

        let mut sigs = Self::new();

        for insn in [
            "add_rm_ftz_f32",
            "add_rm_ftz_sat_f32",
            "add_rn_f32",
            "add_sat_f32",
            "set_ge_f32_f32",
            "sub_rn_ftz_sat_f32",
            "sub_rz_ftz_sat_f32",
        ] {
            sigs.insert(insn, TypeSignature::scalar(&[F32, F32], F32));
        }
        sigs.insert("abs_f32", TypeSignature::scalar(&[F32], F32));
        sigs.insert("sqrt_rm_f32", TypeSignature::scalar(&[F32], F32));
        sigs.insert("set_eq_ftz_s32_f32", TypeSignature::scalar(&[F32, F32], S32));
        sigs.insert("set_gt_s32_f32", TypeSignature::scalar(&[F32, F32], S32));
        sigs.insert("set_gt_u32_f32", TypeSignature::scalar(&[F32, F32], U32));
        sigs.insert("setp_ge_f32", TypeSignature::scalar(&[F32, F32], Pred));
        sigs.insert("selp_f32", TypeSignature::scalar(&[F32, F32, Pred], F32));

        // carry-producing and carry-consuming integer adds
        let cc_out = |args: Vec<ArgType>| {
            TypeSignature::new(args, vec![OutputType::Scalar(U32), CcOut], Vec::new())
                .expect("static signature")
        };
        sigs.insert(
            "add_cc_u32",
            cc_out(vec![ArgType::Scalar(U32), ArgType::Scalar(U32)]),
        );
        sigs.insert(
            "sub_cc_u32",
            cc_out(vec![ArgType::Scalar(U32), ArgType::Scalar(U32)]),
        );
        sigs.insert(
            "addc_cc_u32",
            TypeSignature::new(
                vec![ArgType::Scalar(U32), ArgType::Scalar(U32), CcArg],
                vec![OutputType::Scalar(U32)],
                vec![2],
            )
            .expect("static signature"),
        );

        // value + predicate pair, collapsed into a per-instruction struct
        sigs.insert(
            "shfl_b32",
            TypeSignature::new(
                vec![
                    ArgType::Scalar(U32),
                    ArgType::Scalar(U32),
                    ArgType::Scalar(U32),
                ],
                vec![OutputType::PredPair { value: U32 }],
                Vec::new(),
            )
            .expect("static signature"),
        );

        sigs
    }
}
