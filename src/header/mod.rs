//! Parsed representation of addon config headers (`config.cpp` and friends) and the
//! parser seam used by the indexing pipeline.

mod grammar;
mod preprocessor;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use preprocessor::Preprocessor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Syntax {
        path: Utf8PathBuf,
        line: usize,
        message: String,
    },

    #[error("{path}:{line}: preprocessor: {message}")]
    Preprocess {
        path: Utf8PathBuf,
        line: usize,
        message: String,
    },
}

/// A literal or expression on the right-hand side of an assignment
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    String(String),
    Number(f64),
    Array(Vec<HeaderValue>),
    /// Unquoted expression text (identifiers, arithmetic, `true`/`false`, ...)
    Raw(String),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) | HeaderValue::Raw(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            HeaderValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderAssignment {
    pub name: String,
    /// Declared as `name[]`
    pub is_array: bool,
    /// Declared with `+=`
    pub append: bool,
    pub value: HeaderValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderClass {
    pub name: String,
    pub extends: Option<String>,
    pub classes: Vec<HeaderClass>,
    pub assignments: Vec<HeaderAssignment>,
}

impl HeaderClass {
    /// Direct child class, case-insensitive.
    pub fn class(&self, name: &str) -> Option<&HeaderClass> {
        find_in(&self.classes, name)
    }

    /// Direct assignment, case-insensitive.
    pub fn assignment(&self, name: &str) -> Option<&HeaderAssignment> {
        self.assignments
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderFile {
    pub path: Utf8PathBuf,
    pub classes: Vec<HeaderClass>,
    pub assignments: Vec<HeaderAssignment>,
}

impl HeaderFile {
    /// Look up a class by slash-separated path, e.g. `CfgPatches/My_Addon`.
    /// Class names compare case-insensitively, as the game does.
    pub fn find_class(&self, path: &str) -> Option<&HeaderClass> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut current = find_in(&self.classes, segments.next()?)?;
        for segment in segments {
            current = current.class(segment)?;
        }
        Some(current)
    }
}

fn find_in<'a>(classes: &'a [HeaderClass], name: &str) -> Option<&'a HeaderClass> {
    classes.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// A parsed config file together with the macros its preprocessing defined
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub file: HeaderFile,
    pub define_macros: IndexMap<String, String>,
}

/// Turns a text config into a [`ParseResult`].
///
/// `include_dir` is searched for `#include` targets that are not found next to the
/// including file.
pub trait ConfigParser: Send + Sync {
    fn parse(&self, file: &Utf8Path, include_dir: &Utf8Path) -> Result<ParseResult, ParseError>;
}

/// Default [`ConfigParser`]: preprocessor followed by the class/assignment grammar.
pub struct HeaderParser {
    preprocessor: Preprocessor,
}

impl HeaderParser {
    pub fn new() -> Self {
        Self {
            preprocessor: Preprocessor::new(),
        }
    }
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigParser for HeaderParser {
    fn parse(&self, file: &Utf8Path, include_dir: &Utf8Path) -> Result<ParseResult, ParseError> {
        let preprocessed = self.preprocessor.run(file, include_dir)?;
        let body = grammar::parse(file, &preprocessed.text)?;
        tracing::trace!(
            "Parsed {}: {} classes, {} defines",
            file,
            body.classes.len(),
            preprocessed.defines.len()
        );

        Ok(ParseResult {
            file: HeaderFile {
                path: file.to_path_buf(),
                classes: body.classes,
                assignments: body.assignments,
            },
            define_macros: preprocessed.defines,
        })
    }
}
