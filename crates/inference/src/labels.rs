use anyhow::Context;
use std::path::Path;

/// Label for class ids outside the table.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Classes of the grapevine leaf model shipped with the device.
const DEFAULT_LABELS: [&str; 5] = [
    "Black-Rot",
    "ESCA",
    "Healthy",
    "Leaf-Blight",
    "Not-Grapevine-Leaf",
];

/// Fixed class id -> name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS)
    }
}

impl LabelTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// One label per line; blank lines and `#` comments are skipped.
    pub fn parse(contents: &str) -> Self {
        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read labels file {}", path.display()))?;
        let table = Self::parse(&contents);
        if table.is_empty() {
            anyhow::bail!("Labels file {} has no labels", path.display());
        }
        Ok(table)
    }

    /// Resolve a class id, failing closed to [`UNKNOWN_LABEL`].
    pub fn resolve(&self, class_id: i64) -> &str {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
