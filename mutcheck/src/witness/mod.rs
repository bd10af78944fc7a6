//! Witnesses: concrete inputs (and observed outputs) demonstrating
//! oracle/mutant divergence, in canonical text form, plus the artifacts
//! that feed them back into the regression suite.

use std::{
    fs,
    io::Write as _,
    path::Path,
};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    codec::StructFormat,
    types::{cc_fields, ArgType, OutputType, TypeSignature},
    Error,
};

pub mod canon;
pub mod trace;

use trace::TraceAssign;

/// Where a round-2 witness came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WitnessSource {
    /// Counterexamples from the equivalence checker
    EqvCheck,
    /// Crash artifacts from the plain fuzzer
    FuzzerSimple,
    /// Crash artifacts from the fuzzer with the stratified custom mutator
    FuzzerCustom,
}

impl WitnessSource {
    /// All sources, in reporting order.
    pub const ALL: [WitnessSource; 3] = [
        WitnessSource::EqvCheck,
        WitnessSource::FuzzerSimple,
        WitnessSource::FuzzerCustom,
    ];

    /// The stable name used in artifact files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EqvCheck => "eqvcheck",
            Self::FuzzerSimple => "fuzzer_simple",
            Self::FuzzerCustom => "fuzzer_custom",
        }
    }

    /// The test-case registry source name for one experiment.
    pub fn source_name(&self, experiment: &str) -> String {
        format!("{}.{experiment}", self.as_str())
    }
}

impl core::fmt::Display for WitnessSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One witness: canonical input and output tuples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// Canonical input values, one per instruction argument
    pub inputs: Vec<String>,
    /// Canonical output values, primary first; empty when outputs are
    /// regenerated later by replaying the oracle
    pub outputs: Vec<String>,
}

impl Witness {
    /// Build a witness from normalized trace assignments, using the type
    /// signature to name and order the tuple slots.
    pub fn from_assigns(sig: &TypeSignature, assigns: &[TraceAssign]) -> Result<Self, Error> {
        let mut values: HashMap<&str, String> = HashMap::with_capacity(assigns.len());
        for a in assigns {
            values.insert(a.lhs.as_str(), a.canonical()?);
        }
        let get = |name: &str| -> Result<String, Error> {
            values
                .get(name)
                .cloned()
                .ok_or_else(|| Error::key_not_found(format!("`{name}` not assigned in trace")))
        };

        let mut inputs = Vec::with_capacity(sig.args().len());
        for (i, arg) in sig.args().iter().enumerate() {
            match arg {
                ArgType::Scalar(_) => inputs.push(get(&format!("arg{i}"))?),
                ArgType::CondCode => {
                    let fields = cc_fields()
                        .iter()
                        .map(|(name, _)| get(&format!("arg{i}.{name}")))
                        .collect::<Result<Vec<_>, _>>()?;
                    inputs.push(fields.join(","));
                }
            }
        }

        let mut outputs = Vec::new();
        for (slot, out) in sig.outputs().iter().enumerate() {
            match out {
                OutputType::Scalar(_) if slot == 0 => outputs.push(get("ret_orig")?),
                OutputType::PredPair { .. } => {
                    outputs.push(get("ret_orig.value")?);
                    outputs.push(get("ret_orig.pred")?);
                }
                OutputType::CondCode => {
                    let fields = cc_fields()
                        .iter()
                        .map(|(name, _)| get(&format!("ret_orig_cc.{name}")))
                        .collect::<Result<Vec<_>, _>>()?;
                    outputs.push(fields.join(","));
                }
                OutputType::Scalar(_) => {
                    return Err(Error::unsupported_type(
                        "scalar side outputs are not decoded",
                    ));
                }
            }
        }

        Ok(Self { inputs, outputs })
    }

    /// Decode a structured JSON verifier trace. `None` means the verifier
    /// proved the mutant equivalent.
    pub fn from_json_trace(sig: &TypeSignature, text: &str) -> Result<Option<Self>, Error> {
        match trace::decode_json(text)? {
            Some(assigns) => Ok(Some(Self::from_assigns(sig, &assigns)?)),
            None => Ok(None),
        }
    }

    /// Decode a plain-text verifier trace. `None` means proved equivalent.
    pub fn from_text_trace(sig: &TypeSignature, text: &str) -> Result<Option<Self>, Error> {
        match trace::decode_text(text)? {
            Some(assigns) => Ok(Some(Self::from_assigns(sig, &assigns)?)),
            None => Ok(None),
        }
    }

    /// Decode a fuzzer crash artifact through the shared packed layout.
    ///
    /// The outputs are left empty; they are produced by replaying the
    /// oracle on the inputs. A zero-byte artifact means the fuzzer crashed
    /// for a non-input reason and yields `None`.
    pub fn from_fuzz_artifact(fmt: &StructFormat, data: &[u8]) -> Result<Option<Self>, Error> {
        if data.is_empty() {
            log::warn!("0-byte fuzzer artifact, most likely a non-input crash");
            return Ok(None);
        }
        Ok(Some(Self {
            inputs: fmt.decode_canonical(data)?,
            outputs: Vec::new(),
        }))
    }
}

/// A deduplicated, insertion-ordered set of witnesses.
#[derive(Debug, Default, Clone)]
pub struct WitnessSet {
    order: Vec<Witness>,
    index: HashMap<Vec<String>, usize>,
}

impl WitnessSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a witness, deduplicating by input tuple. Returns `false` for
    /// duplicates. A duplicate input with divergent outputs is a decode
    /// conflict: it is logged and the first-seen outputs are kept.
    pub fn insert(&mut self, witness: Witness) -> bool {
        if let Some(&i) = self.index.get(&witness.inputs) {
            let kept = &self.order[i];
            if kept.outputs != witness.outputs {
                log::warn!(
                    "duplicate input {:?} has multiple gold outputs: {:?} and {:?}; keeping the first",
                    witness.inputs,
                    kept.outputs,
                    witness.outputs
                );
            }
            return false;
        }
        self.index.insert(witness.inputs.clone(), self.order.len());
        self.order.push(witness);
        true
    }

    /// Number of distinct witnesses.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The witnesses, in insertion order.
    pub fn iter(&self) -> core::slice::Iter<'_, Witness> {
        self.order.iter()
    }

    /// Write the space-separated witness files: one line per witness in the
    /// inputs file and, when given, the matching line in the outputs file.
    pub fn write_ssv(&self, inputs: &Path, outputs: Option<&Path>) -> Result<(), Error> {
        let mut inp = fs::File::create(inputs)?;
        for w in &self.order {
            writeln!(inp, "{}", w.inputs.join(" "))?;
        }
        if let Some(outputs) = outputs {
            let mut out = fs::File::create(outputs)?;
            for w in &self.order {
                writeln!(out, "{}", w.outputs.join(" "))?;
            }
        }
        Ok(())
    }

    /// Read witness files written by [`Self::write_ssv`].
    pub fn read_ssv(inputs: &Path, outputs: Option<&Path>) -> Result<Self, Error> {
        let read_lines = |path: &Path| -> Result<Vec<Vec<String>>, Error> {
            let text = fs::read_to_string(path)
                .map_err(|e| Error::missing_artifact(format!("{}: {e}", path.display())))?;
            Ok(text
                .lines()
                .map(|l| l.split_whitespace().map(str::to_string).collect())
                .collect())
        };

        let inputs = read_lines(inputs)?;
        let outputs = match outputs {
            Some(path) => read_lines(path)?,
            None => vec![Vec::new(); inputs.len()],
        };
        if inputs.len() != outputs.len() {
            return Err(Error::illegal_state(format!(
                "{} input line(s) but {} output line(s)",
                inputs.len(),
                outputs.len()
            )));
        }

        let mut set = Self::new();
        for (inputs, outputs) in inputs.into_iter().zip(outputs) {
            set.insert(Witness { inputs, outputs });
        }
        Ok(set)
    }
}

impl<'a> IntoIterator for &'a WitnessSet {
    type Item = &'a Witness;
    type IntoIter = core::slice::Iter<'a, Witness>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One entry of the test-case registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestcaseEntry {
    /// Path of the inputs file
    pub input: String,
    /// Path of the gold outputs file
    pub output: String,
    /// Source name, e.g. `eqvcheck.<experiment>`
    pub source: String,
}

/// The per-instruction registry of regression test cases; witness files are
/// fed back into it after every harvesting stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestcaseRegistry {
    /// The registered test cases
    pub tests: Vec<TestcaseEntry>,
}

impl TestcaseRegistry {
    /// Load the registry from a JSON file.
    pub fn load<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::missing_artifact(format!("{}: {e}", path.display())))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Save the registry.
    pub fn save<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Replace every entry of `source` with `entry`, dropping the source
    /// entirely when `entry` is `None` (a stage that found no witnesses).
    pub fn replace_source(&mut self, source: &str, entry: Option<TestcaseEntry>) {
        self.tests.retain(|t| t.source != source);
        if let Some(entry) = entry {
            self.tests.push(entry);
        }
    }

    /// The entries whose source name ends with `.{experiment}`.
    pub fn tests_for_experiment<'a>(
        &'a self,
        experiment: &'a str,
    ) -> impl Iterator<Item = &'a TestcaseEntry> {
        self.tests
            .iter()
            .filter(move |t| t.source.ends_with(&format!(".{experiment}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{TestcaseEntry, TestcaseRegistry, Witness, WitnessSet, WitnessSource};
    use crate::{
        codec::StructFormat,
        types::{InsnSigs, ScalarType},
        Error,
    };

    fn float_add_trace(status: &str) -> String {
        json!([
            {"program": "cbmc"},
            {"result": [{
                "trace": [
                    {
                        "stepType": "assignment", "assignmentType": "variable",
                        "lhs": "arg0",
                        "value": {"name": "float", "type": "float", "width": 32,
                                  "binary": "00111111100000000000000000000000"},
                    },
                    {
                        "stepType": "assignment", "assignmentType": "variable",
                        "lhs": "arg1",
                        "value": {"name": "float", "type": "float", "width": 32,
                                  "binary": "01000000000000000000000000000000"},
                    },
                    {
                        "stepType": "assignment", "assignmentType": "variable",
                        "lhs": "ret_orig",
                        "value": {"name": "float", "type": "float", "width": 32,
                                  "binary": "01000000010000000000000000000000"},
                    },
                ],
            }]},
            {"cProverStatus": status},
        ])
        .to_string()
    }

    #[test]
    fn test_two_float_end_to_end() {
        let sigs = InsnSigs::builtin();
        let sig = sigs.lookup("add_rn_f32").unwrap();

        // proved equivalent: no witness
        assert!(Witness::from_json_trace(sig, &float_add_trace("success"))
            .unwrap()
            .is_none());

        let witness = Witness::from_json_trace(sig, &float_add_trace("failure"))
            .unwrap()
            .unwrap();
        assert_eq!(witness.inputs, vec!["0x1.0p+0", "0x1.0p+1"]);
        assert_eq!(witness.outputs, vec!["0x1.8p+1"]);

        // deterministic re-decode
        let again = Witness::from_json_trace(sig, &float_add_trace("failure"))
            .unwrap()
            .unwrap();
        assert_eq!(witness, again);
    }

    #[test]
    fn test_missing_argument_is_an_error() {
        let sigs = InsnSigs::builtin();
        // selp takes three arguments, the trace only assigns two plus ret
        let sig = sigs.lookup("selp_f32").unwrap();
        let err = Witness::from_json_trace(sig, &float_add_trace("failure")).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
    }

    #[test]
    fn test_fuzz_artifact_decode() {
        let fmt = StructFormat::for_scalars(&[ScalarType::F32, ScalarType::F32]);
        let data = fmt
            .encode(&[
                crate::codec::ScalarValue::F32(1.0),
                crate::codec::ScalarValue::F32(f32::from_bits(0xffc00000)),
            ])
            .unwrap();

        let w = Witness::from_fuzz_artifact(&fmt, &data).unwrap().unwrap();
        assert_eq!(w.inputs, vec!["0x1.0p+0", "-nan"]);
        assert!(w.outputs.is_empty());

        assert!(Witness::from_fuzz_artifact(&fmt, &[]).unwrap().is_none());
    }

    #[test]
    fn test_dedup_keeps_first_output() {
        let mut set = WitnessSet::new();
        let a = Witness {
            inputs: vec!["0x1.0p+0".into()],
            outputs: vec!["0x1.0p+0".into()],
        };
        // same input, divergent output: decode conflict, first kept
        let b = Witness {
            inputs: vec!["0x1.0p+0".into()],
            outputs: vec!["-0x1.0p+0".into()],
        };

        assert!(set.insert(a.clone()));
        assert!(!set.insert(b));
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap(), &a);
    }

    #[test]
    fn test_ssv_roundtrip() {
        let dir = std::env::temp_dir().join(format!("mutcheck_ssv_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let inp = dir.join("inputs.ssv");
        let out = dir.join("outputs.ssv");

        let mut set = WitnessSet::new();
        set.insert(Witness {
            inputs: vec!["0x1.0p+0".into(), "2".into()],
            outputs: vec!["0x1.8p+1".into()],
        });
        set.insert(Witness {
            inputs: vec!["-nan".into(), "0".into()],
            outputs: vec!["-nan".into()],
        });
        set.write_ssv(&inp, Some(&out)).unwrap();

        assert_eq!(
            std::fs::read_to_string(&inp).unwrap(),
            "0x1.0p+0 2\n-nan 0\n"
        );

        let read = WitnessSet::read_ssv(&inp, Some(&out)).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.iter().next().unwrap().outputs, vec!["0x1.8p+1"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_registry_replace_source() {
        let mut reg = TestcaseRegistry::default();
        let name = WitnessSource::EqvCheck.source_name("expt1");
        assert_eq!(name, "eqvcheck.expt1");

        reg.replace_source(
            &name,
            Some(TestcaseEntry {
                input: "a.ssv".into(),
                output: "b.ssv".into(),
                source: name.clone(),
            }),
        );
        reg.replace_source(
            &name,
            Some(TestcaseEntry {
                input: "c.ssv".into(),
                output: "d.ssv".into(),
                source: name.clone(),
            }),
        );
        assert_eq!(reg.tests.len(), 1);
        assert_eq!(reg.tests[0].input, "c.ssv");

        assert_eq!(reg.tests_for_experiment("expt1").count(), 1);
        assert_eq!(reg.tests_for_experiment("expt2").count(), 0);

        reg.replace_source(&name, None);
        assert!(reg.tests.is_empty());
    }
}
