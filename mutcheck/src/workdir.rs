//! Work-directory parameters, persisted so the many pipeline stages do not
//! need the same flags repeated on every invocation.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{insn::Insn, Error};

/// File name of the persisted parameter block inside the work directory.
pub const PARAMS_FILE: &str = "params.json";

/// Parameters of a mutation-testing work directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkParams {
    /// Root of the work directory; one subdirectory per instruction
    pub workdir: PathBuf,
    /// The C semantics file the single-instruction sources were extracted from
    pub csemantics: PathBuf,
    /// Extra include directories passed to the verifier and the compiler
    pub include_dirs: Vec<PathBuf>,
}

impl WorkParams {
    /// Load the parameter block from `<directory>/params.json`.
    pub fn load_from<P>(directory: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = directory.as_ref().join(PARAMS_FILE);
        let file = File::open(&path)
            .map_err(|e| Error::missing_artifact(format!("{}: {e}", path.display())))?;
        let params = serde_json::from_reader(BufReader::new(file))?;
        Ok(params)
    }

    /// Save the parameter block to `<workdir>/params.json`.
    pub fn save(&self) -> Result<(), Error> {
        let path = self.workdir.join(PARAMS_FILE);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// The working directory of a single instruction.
    pub fn insn_dir(&self, insn: &Insn) -> PathBuf {
        self.workdir.join(insn.working_dir())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::WorkParams;
    use crate::{insn::Insn, Error};

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("mutcheck_wp_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let params = WorkParams {
            workdir: dir.clone(),
            csemantics: dir.join("ptxc.c"),
            include_dirs: vec![dir.join("includes")],
        };
        params.save().unwrap();

        let loaded = WorkParams::load_from(&dir).unwrap();
        assert_eq!(loaded.csemantics, params.csemantics);
        assert_eq!(loaded.include_dirs, params.include_dirs);
        assert_eq!(
            loaded.insn_dir(&Insn::new("abs_f32")),
            dir.join("abs_f32")
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_params_is_missing_artifact() {
        let err = WorkParams::load_from("/nonexistent/workdir").unwrap_err();
        assert!(matches!(err, Error::MissingArtifact(_)));
    }
}
