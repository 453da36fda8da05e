//! Source comments keyed by their position in the descriptor tree.
//!
//! Schema compilers record comments in `SourceCodeInfo` against a path of
//! field numbers and indices (`4,0,2,1` is field 1 of message 0). The
//! renderer recomputes the same paths while walking the tree and asks the
//! [`CommentMap`] for the text to print around each declaration.

use protobuf::descriptor::SourceCodeInfo;
use std::collections::BTreeMap;
use std::fmt;

/// Offset appended to a path that collides with an earlier location.
pub const COLLISION_STRIDE: i32 = 1000;

/// Positional path of a declaration, e.g. `4,0,2,0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourcePath(Vec<i32>);

impl SourcePath {
    pub fn new(components: Vec<i32>) -> Self {
        Self(components)
    }

    /// Path of the `index`-th element of the repeated field `tag`.
    pub fn child(&self, tag: i32, index: usize) -> Self {
        let mut components = self.0.clone();
        components.push(tag);
        components.push(index as i32);
        Self(components)
    }

    pub fn push(&self, component: i32) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }

    /// Key under which the `n`-th location sharing this path is stored.
    pub fn nth_duplicate(&self, n: usize) -> Self {
        if n == 0 {
            self.clone()
        } else {
            self.push(n as i32 * COLLISION_STRIDE)
        }
    }

    pub fn components(&self) -> &[i32] {
        &self.0
    }
}

impl From<&[i32]> for SourcePath {
    fn from(components: &[i32]) -> Self {
        Self(components.to_vec())
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

/// Comments attached to one location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentEntry {
    pub leading: Option<String>,
    pub trailing: Option<String>,
}

/// All attached comments of one file.
#[derive(Debug, Clone, Default)]
pub struct CommentMap {
    entries: BTreeMap<SourcePath, CommentEntry>,
    detached: usize,
}

impl CommentMap {
    pub fn from_source_info(info: &SourceCodeInfo) -> Self {
        let mut map = Self::default();
        for location in &info.location {
            map.detached += location.leading_detached_comments.len();
            let entry = CommentEntry {
                leading: non_blank(location.leading_comments.as_deref()),
                trailing: non_blank(location.trailing_comments.as_deref()),
            };
            if entry.leading.is_none() && entry.trailing.is_none() {
                continue;
            }
            map.insert(SourcePath::from(location.path.as_slice()), entry);
        }
        map
    }

    /// Stores `entry`, moving it to the next free collision slot when the
    /// path is already taken. Returns the key actually used.
    pub fn insert(&mut self, path: SourcePath, entry: CommentEntry) -> SourcePath {
        let mut n = 0;
        let mut key = path.clone();
        while self.entries.contains_key(&key) {
            n += 1;
            key = path.nth_duplicate(n);
        }
        self.entries.insert(key.clone(), entry);
        key
    }

    pub fn get(&self, path: &SourcePath) -> Option<&CommentEntry> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourcePath, &CommentEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of detached comments seen in the source info. These belong to
    /// no declaration and are not reproduced.
    pub fn detached_count(&self) -> usize {
        self.detached
    }

    /// Leading comment of `path` as comment lines at `indent`.
    pub fn leading(&self, path: &SourcePath, indent: &str) -> String {
        self.get(path)
            .and_then(|entry| entry.leading.as_deref())
            .map(|text| render_comment(text, indent))
            .unwrap_or_default()
    }

    /// Trailing comment of `path` as comment lines at `indent`.
    pub fn trailing(&self, path: &SourcePath, indent: &str) -> String {
        self.get(path)
            .and_then(|entry| entry.trailing.as_deref())
            .map(|text| render_comment(text, indent))
            .unwrap_or_default()
    }

    /// Line ending for a one-line declaration: a single-line trailing
    /// comment stays on the same line, a longer one follows at `indent`.
    pub fn trailing_suffix(&self, path: &SourcePath, indent: &str) -> String {
        let Some(text) = self.get(path).and_then(|entry| entry.trailing.as_deref()) else {
            return "\n".to_string();
        };
        let text = text.trim_end_matches('\n');
        if text.contains('\n') {
            format!("\n{}", render_comment(text, indent))
        } else {
            format!(" {}\n", line_comment(text.trim()))
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty()).map(str::to_string)
}

fn line_comment(text: &str) -> String {
    if text.is_empty() {
        "//".to_string()
    } else {
        format!("// {text}")
    }
}

/// Renders comment text as `//` lines or a `/* */` block at `indent`.
///
/// Multi-line text becomes a block comment, continuation lines aligned
/// under the first, unless the text itself contains block delimiters.
pub fn render_comment(text: &str, indent: &str) -> String {
    let text = text.trim_end_matches('\n');
    let lines: Vec<&str> = text.split('\n').map(str::trim).collect();
    let mut out = String::new();

    if lines.len() == 1 || text.contains("/*") || text.contains("*/") {
        for line in &lines {
            out.push_str(indent);
            out.push_str(&line_comment(line));
            out.push('\n');
        }
        return out;
    }

    let last = lines.len() - 1;
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            out.push_str(indent);
            out.push_str("/* ");
            out.push_str(line);
        } else if !line.is_empty() {
            out.push_str(indent);
            out.push_str("   ");
            out.push_str(line);
        } else if i == last {
            out.push_str(indent);
            out.push_str("  ");
        }
        if i == last {
            out.push_str(" */");
        }
        out.push('\n');
    }
    out
}
