//! Round-trip verification of formatted output.
//!
//! The formatted text is parsed again and its schema summary compared with the
//! summary of the descriptor it was printed from. Comments and option values
//! are not part of the summary.

use crate::text_gen::{format_file, TextGeneratorOptions};
use anyhow::{bail, Context, Result};
use log::debug;
use protobuf::descriptor::{DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto};
use protobuf_parse::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldSummary {
    pub extendee: String,
    pub number: i32,
    pub name: String,
    pub label: String,
    pub type_: String,
    pub type_name: String,
}

impl FieldSummary {
    fn of(field: &FieldDescriptorProto) -> Self {
        Self {
            extendee: field.extendee().to_string(),
            number: field.number(),
            name: field.name().to_string(),
            label: format!("{:?}", field.label()),
            type_: format!("{:?}", field.type_()),
            type_name: field.type_name().to_string(),
        }
    }
}

/// The parts of a file's schema that formatting must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSummary {
    pub package: String,
    /// Fields of every message, keyed by qualified name, sorted by number.
    pub messages: BTreeMap<String, Vec<FieldSummary>>,
    pub enums: BTreeMap<String, Vec<(String, i32)>>,
    pub services: BTreeMap<String, Vec<String>>,
    /// File- and message-scoped extensions sorted by (extendee, number).
    pub extensions: Vec<FieldSummary>,
}

impl SchemaSummary {
    pub fn of(file: &FileDescriptorProto) -> Self {
        let mut summary = Self {
            package: file.package().to_string(),
            ..Default::default()
        };
        let scope = if file.package().is_empty() {
            String::new()
        } else {
            format!(".{}", file.package())
        };

        for msg in &file.message_type {
            summary.add_message(&scope, msg);
        }
        for e in &file.enum_type {
            summary.add_enum(&scope, e);
        }
        summary
            .extensions
            .extend(file.extension.iter().map(FieldSummary::of));
        for service in &file.service {
            let methods = service
                .method
                .iter()
                .map(|m| {
                    format!(
                        "{}({}{}) -> {}{}",
                        m.name(),
                        if m.client_streaming() { "stream " } else { "" },
                        m.input_type(),
                        if m.server_streaming() { "stream " } else { "" },
                        m.output_type()
                    )
                })
                .collect();
            summary
                .services
                .insert(format!("{scope}.{}", service.name()), methods);
        }
        summary.extensions.sort();
        summary
    }

    fn add_message(&mut self, scope: &str, msg: &DescriptorProto) {
        let full_name = format!("{scope}.{}", msg.name());
        let mut fields: Vec<FieldSummary> = msg.field.iter().map(FieldSummary::of).collect();
        fields.sort();
        self.extensions
            .extend(msg.extension.iter().map(FieldSummary::of));
        for nested in &msg.nested_type {
            self.add_message(&full_name, nested);
        }
        for e in &msg.enum_type {
            self.add_enum(&full_name, e);
        }
        self.messages.insert(full_name, fields);
    }

    fn add_enum(&mut self, scope: &str, e: &EnumDescriptorProto) {
        let values = e
            .value
            .iter()
            .map(|v| (v.name().to_string(), v.number()))
            .collect();
        self.enums.insert(format!("{scope}.{}", e.name()), values);
    }

    /// Human-readable differences between `self` (expected) and `other`.
    pub fn diff(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        if self.package != other.package {
            out.push(format!(
                "package: expected {:?}, found {:?}",
                self.package, other.package
            ));
        }
        diff_maps("message", &self.messages, &other.messages, &mut out);
        diff_maps("enum", &self.enums, &other.enums, &mut out);
        diff_maps("service", &self.services, &other.services, &mut out);
        if self.extensions != other.extensions {
            out.push(format!(
                "extensions: expected {:?}, found {:?}",
                self.extensions, other.extensions
            ));
        }
        out
    }
}

fn diff_maps<V: PartialEq + Debug>(
    kind: &str,
    expected: &BTreeMap<String, V>,
    found: &BTreeMap<String, V>,
    out: &mut Vec<String>,
) {
    let names: BTreeSet<&String> = expected.keys().chain(found.keys()).collect();
    for name in names {
        match (expected.get(name), found.get(name)) {
            (Some(_), None) => out.push(format!("{kind} {name}: missing")),
            (None, Some(_)) => out.push(format!("{kind} {name}: unexpected")),
            (Some(a), Some(b)) if a != b => {
                out.push(format!("{kind} {name}: expected {a:?}, found {b:?}"))
            }
            _ => {}
        }
    }
}

/// Names of every file `target` imports, directly or not, in `files`.
fn transitive_deps<'a>(files: &'a [FileDescriptorProto], target: &str) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![target.to_string()];
    let mut out = Vec::new();
    while let Some(name) = stack.pop() {
        let Some(file) = files.iter().find(|f| f.name() == name) else {
            continue;
        };
        for dep in &file.dependency {
            if seen.insert(dep.as_str()) {
                out.push(dep.as_str());
                stack.push(dep.clone());
            }
        }
    }
    out
}

fn write_source(root: &Path, name: &str, content: &str) -> Result<()> {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create import dir: {name}"))?;
    }
    std::fs::write(&path, content).with_context(|| format!("Failed to write temp file: {name}"))
}

/// Parses `formatted` as the source of `target`.
///
/// The non-`google/protobuf` files `target` depends on are formatted from
/// `files` and laid out next to it so imports resolve.
pub fn reparse(
    files: &[FileDescriptorProto],
    target: &str,
    formatted: &str,
    options: &TextGeneratorOptions,
) -> Result<FileDescriptorProto> {
    let temp_dir = tempfile::tempdir().context("Failed to create temp directory")?;

    for dep in transitive_deps(files, target) {
        if dep.starts_with("google/protobuf/") {
            continue;
        }
        if !files.iter().any(|f| f.name() == dep) {
            debug!("{dep} is not in the descriptor set, not writing it");
            continue;
        }
        let text = format_file(files, dep, options)
            .with_context(|| format!("Failed to format dependency {dep}"))?;
        write_source(temp_dir.path(), dep, &text)?;
    }
    write_source(temp_dir.path(), target, formatted)?;

    let parsed = Parser::new()
        .pure()
        .include(temp_dir.path())
        .input(temp_dir.path().join(target))
        .file_descriptor_set()
        .with_context(|| format!("Formatted {target} does not parse"))?;

    parsed
        .file
        .into_iter()
        .find(|d| d.name() == target)
        .context("Could not find the parsed file descriptor")
}

/// Checks that `formatted` describes the same schema as `target` in `files`.
pub fn verify_round_trip(
    files: &[FileDescriptorProto],
    target: &str,
    formatted: &str,
    options: &TextGeneratorOptions,
) -> Result<()> {
    let original = files
        .iter()
        .find(|f| f.name() == target)
        .with_context(|| format!("{target} is not part of the descriptor set"))?;
    let reparsed = reparse(files, target, formatted, options)?;

    let diff = SchemaSummary::of(original).diff(&SchemaSummary::of(&reparsed));
    if !diff.is_empty() {
        bail!(
            "Formatted {target} does not match its descriptor:\n  {}",
            diff.join("\n  ")
        );
    }
    debug!("{target}: formatted output verified");
    Ok(())
}
