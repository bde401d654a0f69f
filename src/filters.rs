//! Glob-style include/ignore pattern sets shared by the bridge and the
//! file-change monitor. Ignore patterns are checked first; they match any
//! path component, while include patterns match the file name only.

use std::path::Path;

use regex::Regex;

use crate::error::{SyncError, SyncResult};

#[derive(Debug)]
pub struct PatternSet {
    include: Vec<Regex>,
    ignore: Vec<Regex>,
}

impl PatternSet {
    pub fn compile(file_patterns: &[String], ignore_patterns: &[String]) -> SyncResult<Self> {
        Ok(PatternSet {
            include: compile_globs(file_patterns)?,
            ignore: compile_globs(ignore_patterns)?,
        })
    }

    /// True when the path passes the ignore patterns (every component) and
    /// matches at least one include pattern (file name).
    pub fn allows(&self, path: &Path) -> bool {
        for component in path.components() {
            let name = component.as_os_str().to_string_lossy();
            if self.ignore.iter().any(|re| re.is_match(&name)) {
                return false;
            }
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        self.include.iter().any(|re| re.is_match(&name))
    }
}

fn compile_globs(patterns: &[String]) -> SyncResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&glob_to_regex(p)).map_err(|e| {
                SyncError::Configuration(format!("invalid pattern {p:?}: {e}"))
            })
        })
        .collect()
}

/// Translate a glob pattern into an anchored regex: `*` matches any run of
/// characters, `?` exactly one; everything else is literal.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}
