//! Sketch preprocessor.
//!
//! Turns a sketch source (bare statements and methods, no class wrapper) into
//! a Java translation unit:
//!
//! ```text
//! package org.example;        <- hoisted when present
//!
//! import java.util.List;      <- every top-level import line
//! import processing.core.*;   <- implicit runtime import
//!
//! public class Main extends PApplet {
//!     <every other line, indented>
//! }
//! ```
//!
//! Declarations are recognised line by line with regular expressions, not
//! parsed. An import split over several lines, or an import-looking line
//! inside a block comment or text block, is treated exactly as its line
//! matches. Wildcard imports (`import a.b.*;`) do not match and stay in the
//! class body. A trailing `\r` is ignored when matching, so CRLF sketches
//! hoist the same lines as LF ones.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

/// Base class of the sketch runtime.
pub const RUNTIME_BASE_CLASS: &str = "PApplet";

/// Import every translation unit needs to reach the runtime.
pub const RUNTIME_IMPORT: &str = "import processing.core.*;";

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^import\s+(static\s+)?[a-zA-Z\d_.]+\s*;$").expect("import pattern is valid")
});

static PACKAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^package\s+[\d_.a-zA-Z]+\s*;$").expect("package pattern is valid")
});

/// Returns true when `line` is a whole-line import declaration.
pub fn is_import_line(line: &str) -> bool {
    IMPORT_LINE.is_match(without_cr(line))
}

/// Returns true when `line` is a whole-line package declaration.
pub fn is_package_line(line: &str) -> bool {
    PACKAGE_LINE.is_match(without_cr(line))
}

fn without_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Wraps sketch sources into a class extending the runtime base class.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    base_class: String,
    implicit_import: String,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(RUNTIME_BASE_CLASS, RUNTIME_IMPORT)
    }
}

impl Preprocessor {
    pub fn new(base_class: impl Into<String>, implicit_import: impl Into<String>) -> Self {
        Self {
            base_class: base_class.into(),
            implicit_import: implicit_import.into(),
        }
    }

    /// Produce the translation unit for `source`, naming the class `unit_name`.
    pub fn preprocess(&self, source: &str, unit_name: &str) -> String {
        let lines = source_lines(source);

        let package = lines.iter().find(|line| is_package_line(line)).copied();
        let imports: Vec<&str> = lines
            .iter()
            .filter(|line| is_import_line(line))
            .map(|line| line.trim())
            .collect();

        let mut java = String::with_capacity(source.len() + 128);
        if let Some(package) = package {
            java.push_str(package.trim());
            java.push_str("\n\n");
        }
        for import in imports
            .iter()
            .copied()
            .chain(std::iter::once(self.implicit_import.as_str()))
        {
            java.push_str(import);
            java.push('\n');
        }
        java.push('\n');

        java.push_str("public class ");
        java.push_str(unit_name);
        java.push_str(" extends ");
        java.push_str(&self.base_class);
        java.push_str(" {\n");
        for line in &lines {
            if is_import_line(line) || (package.is_some() && is_package_line(line)) {
                continue;
            }
            java.push('\t');
            java.push_str(line);
            java.push('\n');
        }
        java.push('}');
        java
    }

    /// Read a sketch file and preprocess it, using the file stem as class name.
    pub fn preprocess_file(&self, path: &Path) -> Result<String> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading sketch source '{}'", path.display()))?;
        let unit_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("sketch file has no usable name: {}", path.display()))?;
        Ok(self.preprocess(&source, unit_name))
    }
}

/// Split on `\n`, dropping trailing empty lines. An empty source is one
/// empty line.
fn source_lines(source: &str) -> Vec<&str> {
    if source.is_empty() {
        return vec![""];
    }
    let mut lines: Vec<&str> = source.split('\n').collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Preprocess with the default runtime settings.
pub fn preprocess(source: &str, unit_name: &str) -> String {
    Preprocessor::default().preprocess(source, unit_name)
}
