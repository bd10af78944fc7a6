//! The packed byte layout shared between the fuzz driver and the offline
//! decoder.
//!
//! The fuzz driver reinterprets its input buffer as a C struct with one
//! member per instruction argument. The compiler lays that struct out with
//! natural alignment, so a naive flat byte-pack of the argument widths does
//! not match it: internal and trailing padding have to be made explicit.
//! The format descriptor computed here records the layout byte by byte and
//! is persisted verbatim as the `struct_info.txt` side artifact; fuzz driver
//! and decoder both derive their view of the bytes from it, which is the one
//! contract in the system that must never drift.

use std::{fs, path::Path};

use crate::{
    types::{ArgType, ScalarType},
    witness::canon,
    Error,
};

/// File name of the persisted format descriptor.
pub const STRUCT_INFO_FILE: &str = "struct_info.txt";

/// Code for one pad byte in a format descriptor.
pub const PAD_CODE: char = 'x';

/// One field of a packed struct layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// The scalar type stored in this field
    pub ty: ScalarType,
    /// Byte offset from the start of the struct
    pub offset: usize,
}

/// A typed value as stored in a packed buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    /// Any signed integer member
    Signed(i64),
    /// Any unsigned integer member
    Unsigned(u64),
    /// A `float` member
    F32(f32),
    /// A `double` member
    F64(f64),
}

impl ScalarValue {
    /// The canonical text form of this value (decimal for integers,
    /// hex-float for floating point).
    pub fn canonical(&self) -> String {
        match self {
            Self::Signed(v) => v.to_string(),
            Self::Unsigned(v) => v.to_string(),
            Self::F32(v) => canon::hex_float32(*v),
            Self::F64(v) => canon::hex_float(*v),
        }
    }
}

/// The packed layout of an argument tuple, mirroring the C struct the fuzz
/// driver declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFormat {
    fields: Vec<Field>,
    size: usize,
    descriptor: String,
}

impl StructFormat {
    /// Compute the layout for an instruction's argument list.
    ///
    /// Composite arguments cannot be byte-packed and raise
    /// [`Error::UnsupportedType`], which aborts packed fuzzing for that
    /// instruction only.
    pub fn for_args(args: &[ArgType]) -> Result<Self, Error> {
        let mut scalars = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            match arg {
                ArgType::Scalar(ty) => scalars.push(*ty),
                ArgType::CondCode => {
                    return Err(Error::unsupported_type(format!(
                        "argument {i} is a condition-code register, which cannot be byte-packed"
                    )));
                }
            }
        }
        Ok(Self::for_scalars(&scalars))
    }

    /// Compute the layout for a list of scalar types.
    pub fn for_scalars(tys: &[ScalarType]) -> Self {
        let mut descriptor = String::new();
        let mut fields = Vec::with_capacity(tys.len());
        let mut offset = 0usize;

        for ty in tys {
            let align = ty.align();
            let pad = (align - offset % align) % align;
            for _ in 0..pad {
                descriptor.push(PAD_CODE);
            }
            offset += pad;
            fields.push(Field { ty: *ty, offset });
            descriptor.push(ty.format_code());
            offset += ty.width();
        }

        let descriptor =
            pad_to_struct_size(&descriptor).expect("descriptor built from valid codes");
        Self {
            fields,
            size: descriptor.len(),
            descriptor,
        }
    }

    /// Rebuild a layout from a persisted descriptor string.
    pub fn parse(descriptor: &str) -> Result<Self, Error> {
        let mut fields = Vec::new();
        let mut offset = 0usize;
        for c in descriptor.chars() {
            if c == PAD_CODE {
                offset += 1;
                continue;
            }
            let ty = ScalarType::from_format_code(c).ok_or_else(|| {
                Error::unsupported_type(format!("unknown format code {c:?} in descriptor"))
            })?;
            fields.push(Field { ty, offset });
            offset += ty.width();
        }
        Ok(Self {
            fields,
            size: offset,
            descriptor: descriptor.to_string(),
        })
    }

    /// The descriptor string, one character per byte of the struct.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Total struct size in bytes, padding included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The laid-out fields in argument order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Persist the descriptor as the `struct_info.txt` side artifact.
    pub fn write_to<P>(&self, dir: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        fs::write(dir.as_ref().join(STRUCT_INFO_FILE), &self.descriptor)?;
        Ok(())
    }

    /// Load the descriptor persisted next to the fuzzer outputs.
    pub fn read_from<P>(dir: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = dir.as_ref().join(STRUCT_INFO_FILE);
        let descriptor = fs::read_to_string(&path)
            .map_err(|e| Error::missing_artifact(format!("{}: {e}", path.display())))?;
        Self::parse(descriptor.trim())
    }

    /// Decode a packed buffer into typed values. The buffer length must
    /// match the padded struct size exactly.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<ScalarValue>, Error> {
        if data.len() != self.size {
            return Err(Error::illegal_argument(format!(
                "packed buffer is {} byte(s), layout `{}` needs {}",
                data.len(),
                self.descriptor,
                self.size
            )));
        }

        let mut out = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let bytes = &data[field.offset..field.offset + field.ty.width()];
            out.push(decode_scalar(field.ty, bytes));
        }
        Ok(out)
    }

    /// Decode a packed buffer straight to canonical text values.
    pub fn decode_canonical(&self, data: &[u8]) -> Result<Vec<String>, Error> {
        Ok(self.decode(data)?.iter().map(ScalarValue::canonical).collect())
    }

    /// Encode typed values into a packed buffer (pad bytes zeroed).
    /// The inverse of [`Self::decode`]; mainly test and replay support.
    pub fn encode(&self, values: &[ScalarValue]) -> Result<Vec<u8>, Error> {
        if values.len() != self.fields.len() {
            return Err(Error::illegal_argument(format!(
                "{} value(s) for a {}-field layout",
                values.len(),
                self.fields.len()
            )));
        }

        let mut out = vec![0u8; self.size];
        for (field, value) in self.fields.iter().zip(values) {
            let dst = &mut out[field.offset..field.offset + field.ty.width()];
            encode_scalar(field.ty, *value, dst)?;
        }
        Ok(out)
    }
}

/// Append trailing pad bytes to a format descriptor so its total length
/// equals the natural-alignment size of the equivalent native struct: the
/// widest member's alignment rounds the size up, exactly as the compiler
/// does. A descriptor maps one character to one byte, so the padded
/// descriptor's length is the struct size.
pub fn pad_to_struct_size(descriptor: &str) -> Result<String, Error> {
    let mut offset = 0usize;
    let mut align = 1usize;
    for c in descriptor.chars() {
        if c == PAD_CODE {
            offset += 1;
            continue;
        }
        let ty = ScalarType::from_format_code(c).ok_or_else(|| {
            Error::unsupported_type(format!("unknown format code {c:?} in descriptor"))
        })?;
        align = align.max(ty.align());
        offset += ty.width();
    }

    let mut out = descriptor.to_string();
    let trail = (align - offset % align) % align;
    for _ in 0..trail {
        out.push(PAD_CODE);
    }
    Ok(out)
}

// The packed contract is native little-endian, matching the compiler's
// layout of the driver struct on the supported targets.
fn decode_scalar(ty: ScalarType, bytes: &[u8]) -> ScalarValue {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    let wide = u64::from_le_bytes(raw);

    match ty {
        ScalarType::F32 => {
            #[allow(clippy::cast_possible_truncation)]
            let bits = wide as u32;
            ScalarValue::F32(f32::from_bits(bits))
        }
        ScalarType::F64 => ScalarValue::F64(f64::from_bits(wide)),
        _ if ty.is_signed() => {
            let width = u32::try_from(bytes.len() * 8).unwrap();
            let shift = 64 - width;
            #[allow(clippy::cast_possible_wrap)]
            let v = ((wide << shift) as i64) >> shift;
            ScalarValue::Signed(v)
        }
        _ => ScalarValue::Unsigned(wide),
    }
}

fn encode_scalar(ty: ScalarType, value: ScalarValue, dst: &mut [u8]) -> Result<(), Error> {
    let wide: u64 = match (ty, value) {
        (ScalarType::F32, ScalarValue::F32(v)) => u64::from(v.to_bits()),
        (ScalarType::F64, ScalarValue::F64(v)) => v.to_bits(),
        (t, ScalarValue::Signed(v)) if t.is_signed() => {
            #[allow(clippy::cast_sign_loss)]
            let bits = v as u64;
            bits
        }
        (t, ScalarValue::Unsigned(v)) if !t.is_signed() && !t.is_float() => v,
        (t, v) => {
            return Err(Error::illegal_argument(format!(
                "value {v:?} does not fit field type {t}"
            )));
        }
    };
    dst.copy_from_slice(&wide.to_le_bytes()[..dst.len()]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ScalarValue, StructFormat, STRUCT_INFO_FILE};
    use crate::{
        types::{ArgType, ScalarType},
        Error,
    };

    #[test]
    fn test_descriptor_codes_and_padding() {
        use ScalarType::{F32, F64, S8, U16, U64};

        // two floats pack flat
        let fmt = StructFormat::for_scalars(&[F32, F32]);
        assert_eq!(fmt.descriptor(), "ff");
        assert_eq!(fmt.size(), 8);

        // float then double: 4 bytes of internal padding
        let fmt = StructFormat::for_scalars(&[F32, F64]);
        assert_eq!(fmt.descriptor(), "fxxxxd");
        assert_eq!(fmt.size(), 16);

        // trailing padding up to the widest member
        let fmt = StructFormat::for_scalars(&[F64, S8]);
        assert_eq!(fmt.descriptor(), "dbxxxxxxx");
        assert_eq!(fmt.size(), 16);

        let fmt = StructFormat::for_scalars(&[S8, U16]);
        assert_eq!(fmt.descriptor(), "bxH");
        assert_eq!(fmt.size(), 4);

        let fmt = StructFormat::for_scalars(&[U64]);
        assert_eq!(fmt.descriptor(), "Q");
        assert_eq!(fmt.size(), 8);
    }

    #[test]
    fn test_sizes_match_reference_sizeof() {
        use ScalarType::{F32, F64, S16, S32, S8, U32, U64, U8};

        // hand-checked against the native compiler's sizeof
        let table: &[(&[ScalarType], usize)] = &[
            (&[S8], 1),
            (&[S8, S8], 2),
            (&[S16, S8], 4),
            (&[S8, S32], 8),
            (&[U32, F32], 8),
            (&[F32, F64], 16),
            (&[F64, F32], 16),
            (&[U8, U64, U8], 24),
            (&[S32, S16, S8], 8),
            (&[U64, U32, F32], 16),
        ];
        for (tys, size) in table {
            assert_eq!(
                StructFormat::for_scalars(tys).size(),
                *size,
                "layout of {tys:?}"
            );
        }
    }

    #[test]
    fn test_pad_to_struct_size() {
        use super::pad_to_struct_size;

        assert_eq!(pad_to_struct_size("ff").unwrap(), "ff");
        assert_eq!(pad_to_struct_size("db").unwrap(), "dbxxxxxxx");
        assert_eq!(pad_to_struct_size("b").unwrap(), "b");
        assert_eq!(pad_to_struct_size("bxH").unwrap(), "bxH");
        assert!(pad_to_struct_size("fz").is_err());
    }

    #[test]
    fn test_composite_args_are_unsupported() {
        let err =
            StructFormat::for_args(&[ArgType::Scalar(ScalarType::U32), ArgType::CondCode])
                .unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));
    }

    #[test]
    fn test_parse_roundtrip() {
        let fmt = StructFormat::for_scalars(&[ScalarType::F32, ScalarType::F64]);
        let parsed = StructFormat::parse(fmt.descriptor()).unwrap();
        assert_eq!(parsed, fmt);

        assert!(StructFormat::parse("fz").is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        use ScalarType::{F32, F64, S16, S32, S64, S8, U16, U32, U64, U8};
        use ScalarValue::{Signed, Unsigned, F32 as Vf32, F64 as Vf64};

        let cases: &[(ScalarType, ScalarValue, &str)] = &[
            (S8, Signed(i64::from(i8::MIN)), "-128"),
            (S8, Signed(i64::from(i8::MAX)), "127"),
            (S16, Signed(i64::from(i16::MIN)), "-32768"),
            (S32, Signed(i64::from(i32::MIN)), "-2147483648"),
            (S64, Signed(i64::MIN), "-9223372036854775808"),
            (S64, Signed(i64::MAX), "9223372036854775807"),
            (U8, Unsigned(u64::from(u8::MAX)), "255"),
            (U16, Unsigned(0), "0"),
            (U32, Unsigned(u64::from(u32::MAX)), "4294967295"),
            (U64, Unsigned(u64::MAX), "18446744073709551615"),
            (F32, Vf32(0.0), "0x0.0p+0"),
            (F32, Vf32(-1.0), "-0x1.0p+0"),
            (F32, Vf32(f32::NEG_INFINITY), "-inf"),
            (F32, Vf32(f32::from_bits(0xffc00000)), "-nan"),
            (F64, Vf64(1.0), "0x1.0p+0"),
            (F64, Vf64(f64::INFINITY), "inf"),
            (F64, Vf64(f64::NAN), "nan"),
        ];

        for (ty, value, canonical) in cases {
            let fmt = StructFormat::for_scalars(&[*ty]);
            let bytes = fmt.encode(&[*value]).unwrap();
            assert_eq!(bytes.len(), fmt.size());
            let decoded = fmt.decode_canonical(&bytes).unwrap();
            assert_eq!(decoded, vec![(*canonical).to_string()], "type {ty}");
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let fmt = StructFormat::for_scalars(&[ScalarType::F32, ScalarType::F32]);
        assert!(fmt.decode(&[0u8; 7]).is_err());
        assert!(fmt.decode(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_struct_info_artifact() {
        let dir = std::env::temp_dir().join(format!("mutcheck_codec_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let fmt = StructFormat::for_scalars(&[ScalarType::F32, ScalarType::F64]);
        fmt.write_to(&dir).unwrap();
        let read = std::fs::read_to_string(dir.join(STRUCT_INFO_FILE)).unwrap();
        assert_eq!(read, "fxxxxd");
        assert_eq!(StructFormat::read_from(&dir).unwrap(), fmt);

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(
            StructFormat::read_from(&dir).unwrap_err(),
            Error::MissingArtifact(_)
        ));
    }
}
