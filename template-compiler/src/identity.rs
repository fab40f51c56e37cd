// Script identity and generated-unit naming
// Identities key the unit cache, label diagnostics and name generated units.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Name used when neither the caller nor the context can name the script.
pub const NO_SCRIPT: &str = "NO_SCRIPT";

const RESERVED_WORDS: &[&str] = &[
    "as", "break", "class", "const", "continue", "else", "end", "enum", "false", "fn", "for",
    "if", "impl", "import", "in", "let", "loop", "match", "mod", "new", "null", "package",
    "pub", "return", "self", "set", "static", "struct", "super", "true", "use", "while",
];

fn identifier_pattern() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// True when `name` can be used verbatim as a generated identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// True when `path` is a dotted sequence of valid identifiers (`com.acme.Model`).
pub fn is_valid_reference_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_valid_identifier)
}

/// Last segment of a dotted reference path.
pub fn simple_name(path: &str) -> &str {
    match path.rfind('.') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Escape a single path segment into an identifier.
///
/// Characters outside `[A-Za-z0-9_]` become `__XXXX__` hex escapes, a leading
/// digit or a reserved word gets a `_` prefix.
pub fn make_identifier(segment: &str) -> String {
    if is_valid_identifier(segment) && !RESERVED_WORDS.contains(&segment) {
        return segment.to_string();
    }
    let mut out = String::with_capacity(segment.len() + 8);
    for (i, c) in segment.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push_str(&format!("__{:04x}__", c as u32));
        }
    }
    if RESERVED_WORDS.contains(&out.as_str()) {
        out.insert(0, '_');
    }
    out
}

/// Turn a slash separated content path into a dotted package name.
///
/// `/apps/my-site/components` becomes `apps.my__002d__site.components`.
/// Empty segments are skipped, so leading and trailing slashes do not matter.
pub fn make_package(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(make_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Unique identity of a script: a display name and a normalised logical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptIdentity {
    name: String,
    path: String,
}

impl ScriptIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let path = normalize_path(&name);
        Self { name, path }
    }

    /// Sentinel identity for scripts nobody could name.
    pub fn no_script() -> Self {
        Self::new(NO_SCRIPT)
    }

    pub fn is_no_script(&self) -> bool {
        self.name == NO_SCRIPT
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ScriptIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn normalize_path(name: &str) -> String {
    let path = name.trim().replace('\\', "/");
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

/// Names the generated unit for a script under a configured prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentifier {
    identity: ScriptIdentity,
    package: String,
    unit_name: String,
}

impl SourceIdentifier {
    pub fn new(prefix: &str, identity: &ScriptIdentity) -> Self {
        let path = identity.path();
        let (dir, file) = match path.rfind('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        };
        let sub_package = make_package(dir);
        let package = match (prefix.is_empty(), sub_package.is_empty()) {
            (true, _) => sub_package,
            (false, true) => prefix.to_string(),
            (false, false) => format!("{}.{}", prefix, sub_package),
        };
        let unit_name = if file.is_empty() {
            make_identifier(NO_SCRIPT)
        } else {
            make_identifier(file)
        };
        Self {
            identity: identity.clone(),
            package,
            unit_name,
        }
    }

    pub fn identity(&self) -> &ScriptIdentity {
        &self.identity
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn fully_qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.unit_name.clone()
        } else {
            format!("{}.{}", self.package, self.unit_name)
        }
    }
}
