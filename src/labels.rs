//! Class label table.

use std::path::Path;

use crate::error::{PipelineError, Result};

/// Ordered class names indexed by detector class id.
///
/// Loaded once at startup and shared read-only (`Arc<LabelTable>`) by every
/// pipeline iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    /// Load one class name per line from a text file. Line 0 is class id 0.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read labels {}: {}", path.display(), e))
        })?;
        Self::from_lines(raw.lines()).map_err(|err| match err {
            PipelineError::Config(msg) => {
                PipelineError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Build a table from in-memory lines.
    ///
    /// Interior blank lines are kept so later ids stay aligned with the model's
    /// class space; a table without a single non-blank name is rejected.
    pub fn from_lines<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = lines
            .into_iter()
            .map(|line| line.as_ref().trim_end_matches('\r').to_string())
            .collect();
        if names.iter().all(|name| name.trim().is_empty()) {
            return Err(PipelineError::Config("label source is empty".into()));
        }
        Ok(Self { names })
    }

    pub fn name_for(&self, class_id: usize) -> Result<&str> {
        self.names
            .get(class_id)
            .map(String::as_str)
            .ok_or(PipelineError::Index {
                class_id,
                len: self.names.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn names_are_indexed_from_zero() {
        let table = LabelTable::from_lines(["person", "car", "dog"]).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.name_for(1).unwrap(), "car");
        assert!(matches!(
            table.name_for(3),
            Err(PipelineError::Index {
                class_id: 3,
                len: 3
            })
        ));
    }

    #[test]
    fn empty_source_is_a_config_error() {
        assert!(matches!(
            LabelTable::from_lines(Vec::<String>::new()),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            LabelTable::from_lines(["", "  "]),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LabelTable::load(dir.path().join("coco.names")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn load_keeps_blank_lines_and_strips_carriage_returns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"???\r\nperson\r\n\r\ncar\r\n").unwrap();

        let table = LabelTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.name_for(1).unwrap(), "person");
        assert_eq!(table.name_for(2).unwrap(), "");
        assert_eq!(table.name_for(3).unwrap(), "car");
    }
}
