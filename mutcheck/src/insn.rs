//! Instruction identity and the naming conventions derived from it.
//!
//! Every per-instruction artifact (semantics file, working directory, driver
//! file, semantics function) is named after the instruction, so the rest of
//! the pipeline only ever passes an [`Insn`] around.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::Error;

/// A single instruction of the semantics database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Insn {
    name: String,
}

impl Insn {
    /// Create an instruction handle from its name, e.g. `add_rn_f32`.
    pub fn new<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self { name: name.into() }
    }

    /// The instruction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the C function implementing this instruction's semantics.
    pub fn semantics_fn(&self) -> String {
        format!("execute_{}", self.name)
    }

    /// File name of the single-instruction semantics source.
    pub fn sem_file(&self) -> String {
        format!("{}.c", self.name)
    }

    /// File name of the generated driver translation unit.
    pub fn driver_file(&self) -> String {
        format!("{}_driver.c", self.name)
    }

    /// The per-instruction working directory, relative to the work dir root.
    pub fn working_dir(&self) -> PathBuf {
        PathBuf::from(&self.name)
    }
}

impl core::fmt::Display for Insn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Load an instruction list file: one name per line, blank lines and lines
/// starting with `#` are skipped.
pub fn load_instruction_list<P>(path: P) -> Result<Vec<Insn>, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| Error::missing_artifact(format!("instruction list {}: {e}", path.display())))?;

    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push(Insn::new(line));
    }
    Ok(out)
}

/// Resolve an `--insn` style argument: a literal instruction name, or
/// `@FILE` to load the list from `FILE`.
pub fn instructions_from_arg(arg: &str) -> Result<Vec<Insn>, Error> {
    if let Some(path) = arg.strip_prefix('@') {
        load_instruction_list(path)
    } else {
        Ok(vec![Insn::new(arg)])
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::{instructions_from_arg, Insn};

    fn tmpfile(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("{name}_{}", std::process::id()));
        p
    }

    #[test]
    fn test_derived_names() {
        let i = Insn::new("add_rn_f32");
        assert_eq!(i.semantics_fn(), "execute_add_rn_f32");
        assert_eq!(i.sem_file(), "add_rn_f32.c");
        assert_eq!(i.driver_file(), "add_rn_f32_driver.c");
        assert_eq!(i.working_dir(), PathBuf::from("add_rn_f32"));
    }

    #[test]
    fn test_instruction_list() {
        let path = tmpfile("insnlist");
        fs::write(&path, "# header\nadd_rn_f32\n\n  sqrt_rm_f32\n").unwrap();

        let insns = instructions_from_arg(&format!("@{}", path.display())).unwrap();
        assert_eq!(
            insns,
            vec![Insn::new("add_rn_f32"), Insn::new("sqrt_rm_f32")]
        );

        let single = instructions_from_arg("abs_f32").unwrap();
        assert_eq!(single, vec![Insn::new("abs_f32")]);

        fs::remove_file(&path).unwrap();
    }
}
