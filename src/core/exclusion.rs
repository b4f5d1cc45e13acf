/// Exclusion filter
///
/// Loads argv templates (one shell-quoted command per line) and drops events whose
/// argv has exactly the same shape: same length, same token at every position.
///
/// This is *not* prefix or substring matching. A template `git status` excludes
/// `git status` and nothing else: not `git status -s`, not `git`. Each template is
/// stored as its ordered token sequence, so a lookup hashes the candidate argv once
/// and checks set membership.

use crate::error::Result;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct ExclusionFilter {
    templates: HashSet<Vec<String>>,
}

impl ExclusionFilter {
    /// Filter that matches nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load templates from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let filter = Self::from_reader(std::io::BufReader::new(file))?;
        info!(
            path = %path.as_ref().display(),
            templates = filter.len(),
            "loaded exclusion templates"
        );
        Ok(filter)
    }

    /// Load from the configured path, or match nothing when there is none
    pub fn from_optional_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::empty()),
        }
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut filter = Self::default();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            filter.add_line(&line, lineno + 1);
        }
        Ok(filter)
    }

    fn add_line(&mut self, line: &str, lineno: usize) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        match shlex::split(trimmed) {
            Some(argv) if !argv.is_empty() => {
                self.templates.insert(argv);
            }
            Some(_) => {}
            None => warn!(lineno, line = %trimmed, "skipping untokenizable template"),
        }
    }

    /// Add one template directly
    pub fn insert<I, S>(&mut self, argv: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if !argv.is_empty() {
            self.templates.insert(argv);
        }
    }

    /// True if `argv` has exactly the shape of a loaded template.
    ///
    /// An empty argv (command that could not be tokenized) never matches.
    pub fn matches(&self, argv: &[String]) -> bool {
        !argv.is_empty() && self.templates.contains(argv)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
