//! Shorten function names for display.

use regex::Regex;

/// Names longer than this are wrapped onto several lines.
const WRAP_WIDTH: usize = 32;

/// Which compressions to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameFormat {
    /// Remove parameters, template arguments and a trailing `const`.
    pub strip: bool,
    /// Break long names on whitespace.
    pub wrap: bool,
}

/// Applies a [`NameFormat`] to demangled names.
#[derive(Debug, Clone)]
pub struct NameCompressor {
    format: NameFormat,
    parenthesis: Regex,
    angles: Regex,
    trailing_const: Regex,
}

impl NameCompressor {
    pub fn new(format: NameFormat) -> Result<Self, regex::Error> {
        Ok(Self {
            format,
            parenthesis: Regex::new(r"\([^()]*\)")?,
            angles: Regex::new(r"<[^<>]*>")?,
            trailing_const: Regex::new(r"\s+const$")?,
        })
    }

    pub fn compress(&self, name: &str) -> String {
        let mut name = name.to_string();
        if self.format.strip {
            name = self.strip(&name);
        }
        if self.format.wrap {
            name = wrap(&name);
        }
        name
    }

    /// Strip C++ parameters, `const` and template arguments, innermost
    /// brackets first.
    pub fn strip(&self, name: &str) -> String {
        let name = remove_nested(&self.parenthesis, name);
        let name = self.trailing_const.replace(&name, "").into_owned();
        remove_nested(&self.angles, &name)
    }
}

fn remove_nested(pattern: &Regex, name: &str) -> String {
    let mut name = name.to_string();
    while pattern.is_match(&name) {
        name = pattern.replace_all(&name, "").into_owned();
    }
    name
}

/// Wrap a long name on whitespace and squeeze the spaces C++ demanglers
/// put after commas and between closing angles.
pub fn wrap(name: &str) -> String {
    let mut name = if name.chars().count() > WRAP_WIDTH {
        fill(name, WRAP_WIDTH)
    } else {
        name.to_string()
    };

    name = name.replace(", ", ",");
    // twice, for "> > >"
    name = name.replace("> >", ">>");
    name.replace("> >", ">>")
}

/// Greedy line filling that never splits a word.
fn fill(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join("\n")
}
