//! protofmt: comment-preserving formatter for Protocol Buffers schema files
//!
//! This library provides tools for:
//! - Rendering file descriptors back to canonical `.proto` source
//! - Decoding custom option extensions from their raw wire bytes
//! - Re-attaching source comments to the declarations they belong to
//! - Verifying formatted output by parsing it again

pub mod comments;
pub mod config;
pub mod header;
pub mod names;
pub mod options;
pub mod plugin;
pub mod text_gen;
pub mod tree;
pub mod verify;
pub mod wire;

#[cfg(test)]
mod test_util;

// Re-export main types
pub use comments::{CommentMap, SourcePath};
pub use config::Config;
pub use text_gen::{descriptor_to_proto, format_file, TextGenerator, TextGeneratorOptions};
pub use tree::SchemaTree;
pub use verify::{verify_round_trip, SchemaSummary};

use anyhow::{Context, Result};
use protobuf::descriptor::FileDescriptorProto;
use protobuf_parse::Parser;
use std::path::{Component, Path, PathBuf};

/// Descriptors of a parsed set of inputs and everything they import.
#[derive(Debug, Clone)]
pub struct ParsedFiles {
    pub files: Vec<FileDescriptorProto>,
    /// Descriptor names of the inputs, in input order.
    pub names: Vec<String>,
}

/// Name the schema compiler gives `input`: its path relative to the first
/// include directory containing it, with `/` separators.
pub fn proto_name(input: &Path, includes: &[PathBuf]) -> Result<String> {
    let input_parts = normal_components(input);
    let relative = includes
        .iter()
        .map(|dir| normal_components(dir))
        .find(|dir| input_parts.len() > dir.len() && input_parts.starts_with(dir))
        .map(|dir| &input_parts[dir.len()..])
        .with_context(|| format!("{} is not under any include path", input.display()))?;
    let parts: Vec<String> = relative
        .iter()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn normal_components(path: &Path) -> Vec<Component<'_>> {
    path.components()
        .filter(|c| *c != Component::CurDir)
        .collect()
}

/// Parses `inputs` with their imports.
///
/// When `includes` is empty each input's own directory is used. The pure Rust
/// parser does not record comments; pass `use_protoc` to run `protoc` with
/// `--include_source_info` instead.
pub fn parse_proto_files(
    inputs: &[PathBuf],
    includes: &[PathBuf],
    use_protoc: bool,
) -> Result<ParsedFiles> {
    let mut includes = includes.to_vec();
    if includes.is_empty() {
        for input in inputs {
            let dir = match input.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !includes.contains(&dir) {
                includes.push(dir);
            }
        }
    }

    let names = inputs
        .iter()
        .map(|input| proto_name(input, &includes))
        .collect::<Result<Vec<_>>>()?;

    let mut parser = Parser::new();
    if use_protoc {
        parser.protoc();
        parser.protoc_extra_args(["--include_source_info"]);
    } else {
        parser.pure();
    }
    parser.includes(&includes);
    parser.inputs(inputs);

    let parsed = parser
        .file_descriptor_set()
        .context("Protobuf parsing failed")?;

    Ok(ParsedFiles {
        files: parsed.file,
        names,
    })
}

/// Parses in-memory sources given as `(name, content)` pairs.
///
/// Sources are laid out in a temporary include tree under their names, so
/// imports between them resolve.
pub fn parse_sources(sources: &[(&str, &str)]) -> Result<Vec<FileDescriptorProto>> {
    let temp_dir = tempfile::tempdir().context("Failed to create temp directory")?;

    let mut inputs = Vec::new();
    for (name, content) in sources {
        let path = temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create import dir: {name}"))?;
        }
        std::fs::write(&path, content).context("Failed to write temp file")?;
        inputs.push(path);
    }

    let parsed = Parser::new()
        .pure()
        .include(temp_dir.path())
        .inputs(&inputs)
        .file_descriptor_set()
        .context("Protobuf parsing failed")?;

    Ok(parsed.file)
}
