//! C-style preprocessor for config headers.
//!
//! Supports the subset found in addon configs: comments, line continuations,
//! `#define`/`#undef`, `#ifdef`/`#ifndef`/`#if`/`#else`/`#endif` and `#include "..."`.
//! Object-like macros are expanded in ordinary lines; function-like macros are recorded
//! but left unexpanded.
//!
//! Every input line of the root file produces exactly one output line (directives become
//! blank lines), so syntax errors in files without includes report the original line.

use super::ParseError;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::fs;

const MAX_INCLUDE_DEPTH: usize = 16;
const MAX_EXPANSION_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MacroDef {
    params: Option<String>,
    body: String,
}

/// Output of preprocessing one file
#[derive(Debug, Default)]
pub(crate) struct Preprocessed {
    pub text: String,
    /// Every `#define` seen, name -> replacement text, in definition order.
    /// Later definitions of the same name overwrite earlier ones.
    pub defines: IndexMap<String, String>,
}

pub(crate) struct Preprocessor {
    define_re: Regex,
    include_re: Regex,
}

struct Frame {
    parent_active: bool,
    branch_active: bool,
    seen_else: bool,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && self.branch_active
    }
}

struct FileState<'a> {
    path: &'a Utf8Path,
    depth: usize,
}

impl Preprocessor {
    pub(crate) fn new() -> Self {
        Self {
            define_re: Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\([^)]*\))?\s*(.*)$")
                .expect("Invalid define regex"),
            include_re: Regex::new(r#"^["<]([^">]+)[">]"#).expect("Invalid include regex"),
        }
    }

    pub(crate) fn run(&self, path: &Utf8Path, include_dir: &Utf8Path) -> Result<Preprocessed, ParseError> {
        let mut out = Preprocessed::default();
        let mut macros = IndexMap::new();
        self.process_file(
            FileState { path, depth: 0 },
            include_dir,
            &mut macros,
            &mut out,
        )?;
        Ok(out)
    }

    fn process_file(
        &self,
        file: FileState<'_>,
        include_dir: &Utf8Path,
        macros: &mut IndexMap<String, MacroDef>,
        out: &mut Preprocessed,
    ) -> Result<(), ParseError> {
        let source = fs::read_to_string(file.path).map_err(|source| ParseError::Io {
            path: file.path.to_path_buf(),
            source,
        })?;

        let lines = join_continuations(&strip_comments(&source));
        let mut stack: Vec<Frame> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let line_no = index + 1;
            let active = stack.last().is_none_or(Frame::active);
            let trimmed = line.trim_start();

            let Some(directive) = trimmed.strip_prefix('#') else {
                if active {
                    out.text.push_str(&expand(line, macros));
                }
                out.text.push('\n');
                continue;
            };

            let directive = directive.trim_start();
            let (keyword, rest) = match directive.find(|c: char| c.is_whitespace()) {
                Some(split) => (&directive[..split], directive[split..].trim()),
                None => (directive, ""),
            };

            match keyword {
                "define" if active => {
                    let caps = self.define_re.captures(rest).ok_or_else(|| {
                        preprocess_error(file.path, line_no, format!("malformed #define '{}'", rest))
                    })?;
                    let name = caps[1].to_string();
                    let params = caps.get(2).map(|m| m.as_str().to_string());
                    let body = caps[3].trim().to_string();
                    out.defines.insert(name.clone(), body.clone());
                    macros.insert(name, MacroDef { params, body });
                }
                "undef" if active => {
                    macros.shift_remove(rest);
                }
                "include" if active => {
                    let caps = self.include_re.captures(rest).ok_or_else(|| {
                        preprocess_error(file.path, line_no, format!("malformed #include '{}'", rest))
                    })?;
                    if file.depth >= MAX_INCLUDE_DEPTH {
                        return Err(preprocess_error(
                            file.path,
                            line_no,
                            format!("#include nested deeper than {}", MAX_INCLUDE_DEPTH),
                        ));
                    }
                    let target = resolve_include(file.path, include_dir, &caps[1]).ok_or_else(|| {
                        preprocess_error(file.path, line_no, format!("included file '{}' not found", &caps[1]))
                    })?;
                    self.process_file(
                        FileState {
                            path: &target,
                            depth: file.depth + 1,
                        },
                        include_dir,
                        macros,
                        out,
                    )?;
                }
                "ifdef" | "ifndef" => {
                    let defined = macros.contains_key(rest);
                    stack.push(Frame {
                        parent_active: active,
                        branch_active: if keyword == "ifdef" { defined } else { !defined },
                        seen_else: false,
                    });
                }
                "if" => {
                    stack.push(Frame {
                        parent_active: active,
                        branch_active: rest != "0",
                        seen_else: false,
                    });
                }
                "else" => {
                    let frame = stack.last_mut().ok_or_else(|| {
                        preprocess_error(file.path, line_no, "#else without #if".to_string())
                    })?;
                    if frame.seen_else {
                        return Err(preprocess_error(file.path, line_no, "duplicate #else".to_string()));
                    }
                    frame.seen_else = true;
                    frame.branch_active = !frame.branch_active;
                }
                "endif" => {
                    if stack.pop().is_none() {
                        return Err(preprocess_error(file.path, line_no, "#endif without #if".to_string()));
                    }
                }
                _ => {
                    // Inactive branch, or a directive with no effect on the output (#pragma etc.)
                }
            }
            out.text.push('\n');
        }

        if !stack.is_empty() {
            return Err(preprocess_error(
                file.path,
                lines.len(),
                "unterminated conditional block".to_string(),
            ));
        }
        Ok(())
    }
}

fn preprocess_error(path: &Utf8Path, line: usize, message: String) -> ParseError {
    ParseError::Preprocess {
        path: path.to_path_buf(),
        line,
        message,
    }
}

fn resolve_include(current: &Utf8Path, include_dir: &Utf8Path, name: &str) -> Option<Utf8PathBuf> {
    let name = name.replace('\\', "/");
    let name = name.trim_start_matches('/');
    let local = current.parent().map(|dir| dir.join(name));
    local
        .into_iter()
        .chain(std::iter::once(include_dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// Remove `//` and `/* */` comments outside string literals, keeping newlines so line
/// numbers are preserved.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            // Unterminated strings end at the line break
            if c == '"' || c == '\n' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Join lines ending in `\`, padding with blank lines to keep the line count.
fn join_continuations(source: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut joined = 0usize;

    for raw in source.lines() {
        let raw = raw.trim_end_matches('\r');
        if let Some(head) = raw.strip_suffix('\\') {
            pending.push_str(head);
            joined += 1;
            continue;
        }
        pending.push_str(raw);
        lines.push(std::mem::take(&mut pending));
        lines.extend(std::iter::repeat_n(String::new(), joined));
        joined = 0;
    }
    if !pending.is_empty() || joined > 0 {
        lines.push(pending);
        lines.extend(std::iter::repeat_n(String::new(), joined.saturating_sub(1)));
    }
    lines
}

/// Expand object-like macros on identifier boundaries, outside string literals.
fn expand(line: &str, macros: &IndexMap<String, MacroDef>) -> String {
    if macros.is_empty() {
        return line.to_string();
    }
    let mut current = line.to_string();
    for _ in 0..MAX_EXPANSION_PASSES {
        let (next, changed) = expand_once(&current, macros);
        current = next;
        if !changed {
            break;
        }
    }
    current
}

fn expand_once(line: &str, macros: &IndexMap<String, MacroDef>) -> (String, bool) {
    let mut out = String::with_capacity(line.len());
    let mut changed = false;
    let mut in_string = false;
    let mut in_number = false;
    let mut ident = String::new();

    let flush = |ident: &mut String, out: &mut String, changed: &mut bool| {
        if ident.is_empty() {
            return;
        }
        match macros.get(ident.as_str()) {
            Some(def) if def.params.is_none() => {
                out.push_str(&def.body);
                *changed = true;
            }
            _ => out.push_str(ident),
        }
        ident.clear();
    };

    for c in line.chars() {
        if in_string {
            out.push(c);
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            if in_number {
                out.push(c);
            } else if ident.is_empty() && c.is_ascii_digit() {
                // Numeric literal, including suffixes like 1e5 or 0x1F
                in_number = true;
                out.push(c);
            } else {
                ident.push(c);
            }
            continue;
        }
        in_number = false;
        flush(&mut ident, &mut out, &mut changed);
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    flush(&mut ident, &mut out, &mut changed);
    (out, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::try_from(dir.path().join(name)).unwrap();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn dir_of(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_strip_comments_keeps_strings_and_lines() {
        let stripped = strip_comments("a = \"//not\"; // gone\n/* x\ny */b = 1;");
        assert_eq!(stripped, "a = \"//not\"; \n\nb = 1;");
    }

    #[test]
    fn test_join_continuations_preserves_line_count() {
        let lines = join_continuations("#define A 1 \\\n + 2\nx = A;");
        assert_eq!(lines, vec!["#define A 1  + 2".to_string(), String::new(), "x = A;".to_string()]);
    }

    #[test]
    fn test_define_and_expand() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.cpp", "#define VALUE 42\n#define NAME \"hi\"\nx = VALUE;\ns = NAME;\nt = \"VALUE\";\n");

        let result = Preprocessor::new().run(&path, &dir_of(&dir)).unwrap();

        assert_eq!(result.defines.get("VALUE").map(String::as_str), Some("42"));
        assert!(result.text.contains("x = 42;"));
        assert!(result.text.contains("s = \"hi\";"));
        assert!(result.text.contains("t = \"VALUE\";"));
    }

    #[test]
    fn test_identifier_boundaries_respected() {
        let mut macros = IndexMap::new();
        macros.insert(
            "A".to_string(),
            MacroDef {
                params: None,
                body: "1".to_string(),
            },
        );
        assert_eq!(expand("AB = A; x1A = A", &macros), "AB = 1; x1A = 1");
    }

    #[test]
    fn test_conditionals() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "config.cpp",
            "#define ON\n#ifdef ON\na = 1;\n#else\na = 2;\n#endif\n#ifndef ON\nb = 1;\n#endif\n#if 0\nc = 1;\n#endif\n",
        );

        let text = Preprocessor::new().run(&path, &dir_of(&dir)).unwrap().text;
        assert!(text.contains("a = 1;"));
        assert!(!text.contains("a = 2;"));
        assert!(!text.contains("b = 1;"));
        assert!(!text.contains("c = 1;"));
    }

    #[test]
    fn test_unterminated_conditional_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.cpp", "#ifdef X\na = 1;\n");

        let err = Preprocessor::new().run(&path, &dir_of(&dir)).unwrap_err();
        assert!(matches!(err, ParseError::Preprocess { .. }));
    }

    #[test]
    fn test_include_relative_then_include_dir() {
        let dir = TempDir::new().unwrap();
        write(&dir, "sub/local.hpp", "local = 1;\n");
        write(&dir, "shared.hpp", "#define SHARED 7\n");
        let path = write(&dir, "sub/config.cpp", "#include \"local.hpp\"\n#include \"shared.hpp\"\nx = SHARED;\n");

        let result = Preprocessor::new().run(&path, &dir_of(&dir)).unwrap();
        assert!(result.text.contains("local = 1;"));
        assert!(result.text.contains("x = 7;"));
    }

    #[test]
    fn test_missing_include_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.cpp", "#include \"nope.hpp\"\n");

        let err = Preprocessor::new().run(&path, &dir_of(&dir)).unwrap_err();
        assert!(err.to_string().contains("nope.hpp"));
    }

    #[test]
    fn test_function_like_macro_recorded_not_expanded() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.cpp", "#define QUOTE(x) #x\ny = QUOTE(a);\n");

        let result = Preprocessor::new().run(&path, &dir_of(&dir)).unwrap();
        assert_eq!(result.defines.get("QUOTE").map(String::as_str), Some("#x"));
        assert!(result.text.contains("y = QUOTE(a);"));
    }
}
