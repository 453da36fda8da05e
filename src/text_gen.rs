//! Protobuf text generator - renders a file of a [`SchemaTree`] back to
//! schema source, with its attached comments.
//!
//! Declarations are written in a fixed order per scope. Scattered `extend`
//! blocks for one target are merged, group fields are written inline with
//! the nested message that carries their body, and type references are
//! shortened to the shortest name that still resolves.

use crate::comments::{CommentMap, SourcePath};
use crate::names::NameResolver;
use crate::options::{OptionRenderer, OptionsKind, RawExtensions};
use crate::tree::{
    enum_tags, file_tags, message_tags, method_tags, service_tags, EnumId, FieldNode, FileId,
    MessageId, SchemaTree, ServiceNode,
};
use crate::wire::escape_string;
use anyhow::{bail, Result};
use log::{debug, warn};
use protobuf::descriptor::field_descriptor_proto::{Label, Type};
use protobuf::descriptor::field_options::{CType, JSType};
use protobuf::descriptor::file_options::OptimizeMode;
use protobuf::descriptor::method_options::IdempotencyLevel;
use protobuf::descriptor::{FieldDescriptorProto, FileDescriptorProto, FileOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;

/// Largest legal field number.
const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// Configuration for text generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextGeneratorOptions {
    /// Indent size in spaces (default: 2)
    pub indent_size: usize,
}

impl Default for TextGeneratorOptions {
    fn default() -> Self {
        Self { indent_size: 2 }
    }
}

/// A built-in option: `name = value`, stored under `number` in its options
/// message.
struct StdOption {
    name: &'static str,
    value: String,
    number: i32,
}

impl StdOption {
    fn new(name: &'static str, value: impl ToString, number: i32) -> Self {
        Self {
            name,
            value: value.to_string(),
            number,
        }
    }
}

/// Renders one file of a schema tree.
pub struct TextGenerator<'t, 'a> {
    options: TextGeneratorOptions,
    tree: &'t SchemaTree<'a>,
    file: FileId,
    names: NameResolver<'t, 'a>,
    custom: OptionRenderer<'t, 'a>,
    output: String,
    indent_level: usize,
}

impl<'t, 'a> TextGenerator<'t, 'a> {
    pub fn new(tree: &'t SchemaTree<'a>, file: FileId, options: TextGeneratorOptions) -> Self {
        Self {
            options,
            tree,
            file,
            names: NameResolver::new(tree, file),
            custom: OptionRenderer::new(tree, file),
            output: String::new(),
            indent_level: 0,
        }
    }

    /// Main entry point: the whole file as source text.
    pub fn format_file(mut self) -> Result<String> {
        let tree = self.tree;
        let file = tree.file(self.file);
        let comments = self.comments();

        if comments.detached_count() > 0 {
            warn!(
                "{}: {} detached comment(s) belong to no declaration and will be dropped",
                file.name(),
                comments.detached_count()
            );
        }

        // 1. Syntax (always first, proto2 when unset)
        let syntax = format!("syntax = \"{}\";", file.syntax());
        self.write_line(&SourcePath::new(vec![file_tags::SYNTAX]), &syntax);

        // 2. Package
        if let Some(package) = file.package() {
            self.write_newline();
            self.write_line(
                &SourcePath::new(vec![file_tags::PACKAGE]),
                &format!("package {package};"),
            );
        }

        // 3. Imports
        self.write_imports()?;

        // 4. File-level options
        let options = self.file_options(file.proto)?;
        if !options.is_empty() {
            self.write_newline();
            self.output.push_str(&options);
        }

        // 5. Extends, one block per target
        let mut started = true;
        self.write_extend_blocks(
            &file.extensions,
            &SourcePath::new(vec![file_tags::EXTENSION]),
            &mut started,
        )?;

        // 6. Enums
        for &id in &file.enums {
            self.write_newline();
            self.write_enum(id)?;
        }

        // 7. Messages
        for &id in &file.messages {
            if self.is_hidden(id) {
                continue;
            }
            self.write_newline();
            self.write_message(id)?;
        }

        // 8. Services
        for service in &file.services {
            self.write_newline();
            self.write_service(service)?;
        }

        while self.output.ends_with("\n\n") {
            self.output.pop();
        }
        debug!("formatted {} ({} bytes)", file.name(), self.output.len());
        Ok(self.output)
    }

    // ========== Helper Methods ==========

    fn comments(&self) -> &'t CommentMap {
        let tree: &'t SchemaTree<'a> = self.tree;
        &tree.file(self.file).comments
    }

    fn indent_at(&self, level: usize) -> String {
        " ".repeat(level * self.options.indent_size)
    }

    fn indent_str(&self) -> String {
        self.indent_at(self.indent_level)
    }

    fn write_newline(&mut self) {
        self.output.push('\n');
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Blank line before every section of a scope but the first.
    fn separate(&mut self, started: &mut bool) {
        if *started {
            self.write_newline();
        }
        *started = true;
    }

    /// One-line declaration with its leading and trailing comments.
    fn write_line(&mut self, path: &SourcePath, text: &str) {
        let indent = self.indent_str();
        let comments = self.comments();
        self.output.push_str(&comments.leading(path, &indent));
        self.output.push_str(&indent);
        self.output.push_str(text);
        self.output.push_str(&comments.trailing_suffix(path, &indent));
    }

    /// Writes `header {` and enters the body. The trailing comment of the
    /// declaration becomes the first line of the body. Returns the position
    /// [`Self::close_block`] needs to collapse an empty body.
    fn open_block(&mut self, path: &SourcePath, header: &str) -> usize {
        let indent = self.indent_str();
        let comments = self.comments();
        self.output.push_str(&comments.leading(path, &indent));
        self.output.push_str(&indent);
        self.output.push_str(header);
        self.output.push_str(" {");
        let mark = self.output.len();
        self.write_newline();
        self.indent();
        let inner = self.indent_str();
        self.output.push_str(&comments.trailing(path, &inner));
        mark
    }

    fn close_block(&mut self, mark: usize) {
        self.dedent();
        if self.output.len() == mark + 1 {
            self.output.truncate(mark);
        } else {
            let indent = self.indent_str();
            self.output.push_str(&indent);
        }
        self.output.push_str("}\n");
    }

    /// Group bodies and map entries are written by their fields.
    fn is_hidden(&self, id: MessageId) -> bool {
        let msg = self.tree.message(id);
        msg.group || msg.is_map_entry()
    }

    // ========== Imports ==========

    fn write_imports(&mut self) -> Result<()> {
        let file = self.tree.file(self.file).proto;
        if file.dependency.is_empty() {
            return Ok(());
        }

        // (index, path, rank): normal=0, public=1, weak=2
        let mut imports: Vec<(usize, &str, u8)> = file
            .dependency
            .iter()
            .enumerate()
            .map(|(i, dep)| {
                let rank = if file.public_dependency.contains(&(i as i32)) {
                    1
                } else if file.weak_dependency.contains(&(i as i32)) {
                    2
                } else {
                    0
                };
                (i, dep.as_str(), rank)
            })
            .collect();
        imports.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.1.cmp(b.1)));

        self.write_newline();
        for (index, path, rank) in imports {
            let keyword = match rank {
                1 => "public ",
                2 => "weak ",
                _ => "",
            };
            self.write_line(
                &SourcePath::new(vec![file_tags::DEPENDENCY, index as i32]),
                &format!("import {keyword}\"{path}\";"),
            );
        }
        Ok(())
    }

    // ========== Options ==========

    /// `option` statements: built-in options sorted by name, then custom
    /// options sorted by name, each with its comments.
    fn option_lines(
        &self,
        mut std: Vec<StdOption>,
        raw: &RawExtensions,
        kind: OptionsKind,
        indent: &str,
        options_path: &SourcePath,
    ) -> Result<String> {
        let comments = self.comments();
        std.sort_by(|a, b| a.name.cmp(b.name));

        let mut out = String::new();
        for opt in &std {
            let path = options_path.push(opt.number);
            out.push_str(&comments.leading(&path, indent));
            write!(out, "{indent}option {} = {};", opt.name, opt.value)?;
            out.push_str(&comments.trailing_suffix(&path, indent));
        }
        if !raw.is_empty() {
            out.push_str(
                &self
                    .custom
                    .statements(raw, kind, indent, options_path, comments)?,
            );
        }
        Ok(out)
    }

    fn file_options(&self, file: &FileDescriptorProto) -> Result<String> {
        let Some(options) = file.options.as_ref() else {
            return Ok(String::new());
        };
        let std = file_std_options(options);
        let raw = RawExtensions::from_message(options)?;
        self.option_lines(
            std,
            &raw,
            OptionsKind::File,
            "",
            &SourcePath::new(vec![file_tags::OPTIONS]),
        )
    }

    // ========== Extends ==========

    /// Merges extensions by target, in order of first appearance.
    fn write_extend_blocks(
        &mut self,
        extensions: &'t [FieldNode<'a>],
        block_path: &SourcePath,
        started: &mut bool,
    ) -> Result<()> {
        let mut groups: Vec<(&str, Vec<&FieldNode<'a>>)> = Vec::new();
        for ext in extensions {
            match groups.iter_mut().find(|(target, _)| *target == ext.extendee()) {
                Some((_, fields)) => fields.push(ext),
                None => groups.push((ext.extendee(), vec![ext])),
            }
        }

        for (k, (target, fields)) in groups.iter().enumerate() {
            self.separate(started);
            let first = fields[0];
            let name = self
                .names
                .reference(target, &self.tree.field_scope(first), first.parent);
            let mark = self.open_block(&block_path.nth_duplicate(k), &format!("extend {name}"));
            for field in fields {
                self.write_field(field, false)?;
            }
            self.close_block(mark);
        }
        Ok(())
    }

    // ========== Messages ==========

    fn write_message(&mut self, id: MessageId) -> Result<()> {
        let msg = self.tree.message(id);
        let mark = self.open_block(&msg.path, &format!("message {}", msg.name()));
        self.write_message_body(id)?;
        self.close_block(mark);
        Ok(())
    }

    fn write_message_body(&mut self, id: MessageId) -> Result<()> {
        let tree = self.tree;
        let msg = tree.message(id);
        let mut started = false;

        // Options
        if let Some(options) = msg.proto.options.as_ref() {
            let mut std = Vec::new();
            if options.message_set_wire_format() {
                std.push(StdOption::new("message_set_wire_format", true, 1));
            }
            if options.no_standard_descriptor_accessor() {
                std.push(StdOption::new("no_standard_descriptor_accessor", true, 2));
            }
            if options.deprecated() {
                std.push(StdOption::new("deprecated", true, 3));
            }
            let raw = RawExtensions::from_message(options)?;
            let indent = self.indent_str();
            let text = self.option_lines(
                std,
                &raw,
                OptionsKind::Message,
                &indent,
                &msg.path.push(message_tags::OPTIONS),
            )?;
            if !text.is_empty() {
                self.separate(&mut started);
                self.output.push_str(&text);
            }
        }

        // Fields, with oneofs at the position of their first member
        if !msg.fields.is_empty() {
            self.separate(&mut started);
            let mut written_oneofs = HashSet::new();
            for field in &msg.fields {
                match field.oneof_index() {
                    Some(index) => {
                        if written_oneofs.insert(index) {
                            self.write_oneof(id, index)?;
                        }
                    }
                    None => self.write_field(field, false)?,
                }
            }
        }

        // Extension ranges (stored end is exclusive), one line per statement
        let ranges = &msg.proto.extension_range;
        if !ranges.is_empty() {
            self.separate(&mut started);
            let path = msg.path.push(message_tags::EXTENSION_RANGE);
            let groups = self.statement_groups(&path, ranges.len());
            let mut i = 0;
            while i < ranges.len() {
                let statement = groups[i];
                let mut parts = Vec::new();
                while i < ranges.len() && groups[i] == statement {
                    let end = if ranges[i].end() >= MAX_FIELD_NUMBER {
                        "max".to_string()
                    } else {
                        (ranges[i].end() - 1).to_string()
                    };
                    parts.push(format!("{} to {end}", ranges[i].start()));
                    i += 1;
                }
                self.write_line(
                    &path.nth_duplicate(statement),
                    &format!("extensions {};", parts.join(", ")),
                );
            }
        }

        // Reserved
        if !msg.proto.reserved_range.is_empty() || !msg.proto.reserved_name.is_empty() {
            self.separate(&mut started);
            let ranges: Vec<String> = msg
                .proto
                .reserved_range
                .iter()
                .map(|r| reserved_range(r.start(), r.end() - 1))
                .collect();
            self.write_reserved(&msg.path, &ranges, &msg.proto.reserved_name, (9, 10));
        }

        // Extends
        self.write_extend_blocks(
            &msg.extensions,
            &msg.path.push(message_tags::EXTENSION),
            &mut started,
        )?;

        // Nested enums
        for &enum_id in &msg.enums {
            self.separate(&mut started);
            self.write_enum(enum_id)?;
        }

        // Nested messages
        for &nested in &msg.nested {
            if self.is_hidden(nested) {
                continue;
            }
            self.separate(&mut started);
            self.write_message(nested)?;
        }
        Ok(())
    }

    fn write_reserved(
        &mut self,
        owner: &SourcePath,
        ranges: &[String],
        names: &[String],
        tags: (i32, i32),
    ) {
        if !ranges.is_empty() {
            self.write_line(
                &owner.push(tags.0),
                &format!("reserved {};", ranges.join(", ")),
            );
        }
        if !names.is_empty() {
            let quoted: Vec<String> = names.iter().map(|n| quoted(n)).collect();
            self.write_line(
                &owner.push(tags.1),
                &format!("reserved {};", quoted.join(", ")),
            );
        }
    }

    /// Statement each element of the repeated field at `list` was declared
    /// in, matched by source span. Without source info every element is a
    /// statement of its own.
    fn statement_groups(&self, list: &SourcePath, count: usize) -> Vec<usize> {
        let own: Vec<usize> = (0..count).collect();
        let Some(info) = self.tree.file(self.file).proto.source_code_info.as_ref() else {
            return own;
        };
        let statements: Vec<&[i32]> = info
            .location
            .iter()
            .filter(|l| l.path == list.components())
            .map(|l| l.span.as_slice())
            .collect();
        if statements.is_empty() {
            return own;
        }

        let mut groups: Vec<usize> = Vec::with_capacity(count);
        for i in 0..count {
            let element = list.push(i as i32);
            let start = info
                .location
                .iter()
                .find(|l| l.path == element.components())
                .and_then(|l| span_start(&l.span));
            let group = start
                .and_then(|at| statements.iter().position(|s| span_contains(s, at)))
                .unwrap_or_else(|| groups.last().copied().unwrap_or(0));
            groups.push(group);
        }
        groups
    }

    // ========== Fields ==========

    fn write_oneof(&mut self, msg_id: MessageId, index: usize) -> Result<()> {
        let tree = self.tree;
        let msg = tree.message(msg_id);
        let members = msg
            .fields
            .iter()
            .filter(|f| f.oneof_index() == Some(index));

        let Some(decl) = msg.proto.oneof_decl.get(index) else {
            debug!("{}: oneof index {index} out of range", msg.full_name);
            for field in members {
                self.write_field(field, false)?;
            }
            return Ok(());
        };

        let path = msg.path.child(message_tags::ONEOF, index);
        let mark = self.open_block(&path, &format!("oneof {}", decl.name()));
        if let Some(options) = decl.options.as_ref() {
            let raw = RawExtensions::from_message(options)?;
            let indent = self.indent_str();
            // OneofDescriptorProto.options is field 2
            let text =
                self.option_lines(Vec::new(), &raw, OptionsKind::Oneof, &indent, &path.push(2))?;
            self.output.push_str(&text);
        }
        for field in members {
            self.write_field(field, true)?;
        }
        self.close_block(mark);
        Ok(())
    }

    fn write_field(&mut self, field: &FieldNode<'a>, in_oneof: bool) -> Result<()> {
        if let Some(body) = field.group_body {
            return self.write_group(field, body, in_oneof);
        }

        let options = self.field_options(field)?;
        let declared = match self.map_types(field) {
            Some((key, value)) => format!("map<{key}, {value}>"),
            None => format!("{}{}", self.label(field, in_oneof), self.field_type(field)),
        };
        let text = format!(
            "{declared} {} = {}{options};",
            field.name(),
            field.number()
        );
        self.write_line(&field.path, &text);
        Ok(())
    }

    fn write_group(&mut self, field: &FieldNode<'a>, body: MessageId, in_oneof: bool) -> Result<()> {
        let options = self.field_options(field)?;
        let header = format!(
            "{}group {} = {}{options}",
            self.label(field, in_oneof),
            self.tree.message(body).name(),
            field.number()
        );
        // Comments sit on the field, or on the body for hand-built trees.
        let path = if self.comments().get(&field.path).is_some() {
            field.path.clone()
        } else {
            self.tree.message(body).path.clone()
        };
        let mark = self.open_block(&path, &header);
        self.write_message_body(body)?;
        self.close_block(mark);
        Ok(())
    }

    fn label(&self, field: &FieldNode<'_>, in_oneof: bool) -> &'static str {
        if in_oneof {
            return "";
        }
        let proto2 = self.tree.file(self.file).is_proto2();
        match field.label() {
            Label::LABEL_REPEATED => "repeated ",
            Label::LABEL_REQUIRED if proto2 => "required ",
            Label::LABEL_OPTIONAL if proto2 || field.proto.proto3_optional() => "optional ",
            _ => "",
        }
    }

    fn field_type(&self, field: &FieldNode<'_>) -> String {
        self.type_text(field.proto, &self.tree.field_scope(field), field.parent)
    }

    fn type_text(
        &self,
        proto: &FieldDescriptorProto,
        scope: &str,
        parent: Option<MessageId>,
    ) -> String {
        match proto.type_() {
            Type::TYPE_MESSAGE | Type::TYPE_ENUM | Type::TYPE_GROUP => {
                self.names.reference(proto.type_name(), scope, parent)
            }
            other => scalar_type_name(other).to_string(),
        }
    }

    /// Key and value types when `field` is a map field.
    fn map_types(&self, field: &FieldNode<'_>) -> Option<(String, String)> {
        if field.label() != Label::LABEL_REPEATED || field.type_() != Type::TYPE_MESSAGE {
            return None;
        }
        let entry = self.tree.message(self.tree.lookup_message(field.type_name())?);
        if !entry.is_map_entry() {
            return None;
        }
        let key = entry.proto.field.iter().find(|f| f.number() == 1)?;
        let value = entry.proto.field.iter().find(|f| f.number() == 2)?;
        let scope = self.tree.field_scope(field);
        Some((
            self.type_text(key, &scope, field.parent),
            self.type_text(value, &scope, field.parent),
        ))
    }

    /// Bracketed option suffix: default first, then custom options, then
    /// the built-in flags.
    fn field_options(&self, field: &FieldNode<'_>) -> Result<String> {
        let mut opts = Vec::new();

        if let Some(default) = field.proto.default_value.as_deref() {
            opts.push(format!("default = {}", self.default_literal(field, default)));
        }

        if let Some(options) = field.proto.options.as_ref() {
            let raw = RawExtensions::from_message(options)?;
            opts.extend(self.custom.inline(&raw, OptionsKind::Field)?);

            if let Some(val) = options.packed {
                opts.push(format!("packed = {val}"));
            }
            if options.lazy() {
                opts.push("lazy = true".to_string());
            }
            if options.deprecated() {
                opts.push("deprecated = true".to_string());
            }
            if options.weak() {
                opts.push("weak = true".to_string());
            }
            if options.ctype.is_some() {
                let ctype = match options.ctype() {
                    CType::STRING => "STRING",
                    CType::CORD => "CORD",
                    CType::STRING_PIECE => "STRING_PIECE",
                };
                opts.push(format!("ctype = {ctype}"));
            }
            if options.jstype.is_some() {
                let jstype = match options.jstype() {
                    JSType::JS_NORMAL => "JS_NORMAL",
                    JSType::JS_STRING => "JS_STRING",
                    JSType::JS_NUMBER => "JS_NUMBER",
                };
                opts.push(format!("jstype = {jstype}"));
            }
        }

        if let Some(json) = field.proto.json_name.as_deref() {
            if field.extendee().is_empty() && json != default_json_name(field.name()) {
                opts.push(format!("json_name = {}", quoted(json)));
            }
        }

        Ok(bracketed(&opts))
    }

    fn default_literal(&self, field: &FieldNode<'_>, default: &str) -> String {
        match field.type_() {
            Type::TYPE_STRING => quoted(default),
            // Stored already C-escaped.
            Type::TYPE_BYTES => format!("\"{default}\""),
            Type::TYPE_ENUM => default
                .parse::<i32>()
                .ok()
                .and_then(|number| {
                    let id = self.tree.lookup_enum(field.type_name())?;
                    self.tree.enum_node(id).value_name(number)
                })
                .unwrap_or(default)
                .to_string(),
            Type::TYPE_FLOAT | Type::TYPE_DOUBLE => normalize_float_default(default).to_string(),
            _ => default.to_string(),
        }
    }

    // ========== Enums ==========

    fn write_enum(&mut self, id: EnumId) -> Result<()> {
        let tree = self.tree;
        let node = tree.enum_node(id);
        let mark = self.open_block(&node.path, &format!("enum {}", node.name()));
        let mut started = false;

        if let Some(options) = node.proto.options.as_ref() {
            let mut std = Vec::new();
            if options.allow_alias() {
                std.push(StdOption::new("allow_alias", true, 2));
            }
            if options.deprecated() {
                std.push(StdOption::new("deprecated", true, 3));
            }
            let raw = RawExtensions::from_message(options)?;
            let indent = self.indent_str();
            let text = self.option_lines(
                std,
                &raw,
                OptionsKind::Enum,
                &indent,
                &node.path.push(enum_tags::OPTIONS),
            )?;
            if !text.is_empty() {
                self.separate(&mut started);
                self.output.push_str(&text);
            }
        }

        if !node.proto.value.is_empty() {
            self.separate(&mut started);
            for (i, value) in node.proto.value.iter().enumerate() {
                let mut opts = Vec::new();
                if let Some(options) = value.options.as_ref() {
                    if options.deprecated() {
                        opts.push("deprecated = true".to_string());
                    }
                    let raw = RawExtensions::from_message(options)?;
                    opts.extend(self.custom.inline(&raw, OptionsKind::EnumValue)?);
                }
                let text = format!("{} = {}{};", value.name(), value.number(), bracketed(&opts));
                self.write_line(&node.path.child(enum_tags::VALUE, i), &text);
            }
        }

        // Enum reserved ranges are inclusive.
        if !node.proto.reserved_range.is_empty() || !node.proto.reserved_name.is_empty() {
            self.separate(&mut started);
            let ranges: Vec<String> = node
                .proto
                .reserved_range
                .iter()
                .map(|r| reserved_range(r.start(), r.end()))
                .collect();
            self.write_reserved(&node.path, &ranges, &node.proto.reserved_name, (4, 5));
        }

        self.close_block(mark);
        Ok(())
    }

    // ========== Services ==========

    fn write_service(&mut self, service: &ServiceNode<'a>) -> Result<()> {
        let mark = self.open_block(&service.path, &format!("service {}", service.proto.name()));
        let mut started = false;

        if let Some(options) = service.proto.options.as_ref() {
            let mut std = Vec::new();
            if options.deprecated() {
                std.push(StdOption::new("deprecated", true, 33));
            }
            let raw = RawExtensions::from_message(options)?;
            let indent = self.indent_str();
            let text = self.option_lines(
                std,
                &raw,
                OptionsKind::Service,
                &indent,
                &service.path.push(service_tags::OPTIONS),
            )?;
            if !text.is_empty() {
                self.separate(&mut started);
                self.output.push_str(&text);
            }
        }

        if !service.proto.method.is_empty() {
            self.separate(&mut started);
        }
        let scope = self.tree.file(self.file).scope();
        for (i, method) in service.proto.method.iter().enumerate() {
            let path = service.path.child(service_tags::METHOD, i);
            let stream = |on: bool| if on { "stream " } else { "" };
            let header = format!(
                "rpc {}({}{}) returns ({}{})",
                method.name(),
                stream(method.client_streaming()),
                self.names.reference(method.input_type(), &scope, None),
                stream(method.server_streaming()),
                self.names.reference(method.output_type(), &scope, None),
            );

            let mut text = String::new();
            if let Some(options) = method.options.as_ref() {
                let mut std = Vec::new();
                if options.deprecated() {
                    std.push(StdOption::new("deprecated", true, 33));
                }
                if options.idempotency_level.is_some() {
                    let level = match options.idempotency_level() {
                        IdempotencyLevel::IDEMPOTENCY_UNKNOWN => "IDEMPOTENCY_UNKNOWN",
                        IdempotencyLevel::NO_SIDE_EFFECTS => "NO_SIDE_EFFECTS",
                        IdempotencyLevel::IDEMPOTENT => "IDEMPOTENT",
                    };
                    std.push(StdOption::new("idempotency_level", level, 34));
                }
                let raw = RawExtensions::from_message(options)?;
                let inner = self.indent_at(self.indent_level + 1);
                text = self.option_lines(
                    std,
                    &raw,
                    OptionsKind::Method,
                    &inner,
                    &path.push(method_tags::OPTIONS),
                )?;
            }

            if text.is_empty() {
                self.write_line(&path, &format!("{header};"));
            } else {
                let method_mark = self.open_block(&path, &header);
                self.output.push_str(&text);
                self.close_block(method_mark);
            }
        }

        self.close_block(mark);
        Ok(())
    }
}

fn file_std_options(options: &FileOptions) -> Vec<StdOption> {
    let mut opts = Vec::new();
    if let Some(val) = options.java_package.as_deref() {
        opts.push(StdOption::new("java_package", quoted(val), 1));
    }
    if let Some(val) = options.java_outer_classname.as_deref() {
        opts.push(StdOption::new("java_outer_classname", quoted(val), 8));
    }
    if let Some(val) = options.java_multiple_files {
        opts.push(StdOption::new("java_multiple_files", val, 10));
    }
    if let Some(val) = options.java_string_check_utf8 {
        opts.push(StdOption::new("java_string_check_utf8", val, 27));
    }
    if let Some(val) = options.go_package.as_deref() {
        opts.push(StdOption::new("go_package", quoted(val), 11));
    }
    if options.optimize_for.is_some() {
        let mode = match options.optimize_for() {
            OptimizeMode::SPEED => "SPEED",
            OptimizeMode::CODE_SIZE => "CODE_SIZE",
            OptimizeMode::LITE_RUNTIME => "LITE_RUNTIME",
        };
        opts.push(StdOption::new("optimize_for", mode, 9));
    }
    if let Some(val) = options.cc_enable_arenas {
        opts.push(StdOption::new("cc_enable_arenas", val, 31));
    }
    if let Some(val) = options.cc_generic_services {
        opts.push(StdOption::new("cc_generic_services", val, 16));
    }
    if let Some(val) = options.java_generic_services {
        opts.push(StdOption::new("java_generic_services", val, 17));
    }
    if let Some(val) = options.py_generic_services {
        opts.push(StdOption::new("py_generic_services", val, 18));
    }
    if options.deprecated() {
        opts.push(StdOption::new("deprecated", true, 23));
    }
    if let Some(val) = options.objc_class_prefix.as_deref() {
        opts.push(StdOption::new("objc_class_prefix", quoted(val), 36));
    }
    if let Some(val) = options.csharp_namespace.as_deref() {
        opts.push(StdOption::new("csharp_namespace", quoted(val), 37));
    }
    if let Some(val) = options.swift_prefix.as_deref() {
        opts.push(StdOption::new("swift_prefix", quoted(val), 39));
    }
    if let Some(val) = options.php_class_prefix.as_deref() {
        opts.push(StdOption::new("php_class_prefix", quoted(val), 40));
    }
    if let Some(val) = options.php_namespace.as_deref() {
        opts.push(StdOption::new("php_namespace", quoted(val), 41));
    }
    if let Some(val) = options.php_metadata_namespace.as_deref() {
        opts.push(StdOption::new("php_metadata_namespace", quoted(val), 44));
    }
    if let Some(val) = options.ruby_package.as_deref() {
        opts.push(StdOption::new("ruby_package", quoted(val), 45));
    }
    opts
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

fn bracketed(opts: &[String]) -> String {
    if opts.is_empty() {
        String::new()
    } else {
        format!(" [{}]", opts.join(", "))
    }
}

/// `start`, `start to end` or `start to max` for an inclusive range.
fn reserved_range(start: i32, end: i32) -> String {
    if start == end {
        start.to_string()
    } else if end >= MAX_FIELD_NUMBER {
        format!("{start} to max")
    } else {
        format!("{start} to {end}")
    }
}

/// `(line, column)` a source span starts at.
fn span_start(span: &[i32]) -> Option<(i32, i32)> {
    Some((*span.first()?, *span.get(1)?))
}

/// Spans are `[line, col, end_col]` or `[line, col, end_line, end_col]`.
fn span_contains(span: &[i32], at: (i32, i32)) -> bool {
    let (start, end) = match *span {
        [line, col, end_col] => ((line, col), (line, end_col)),
        [line, col, end_line, end_col] => ((line, col), (end_line, end_col)),
        _ => return false,
    };
    start <= at && at <= end
}

fn scalar_type_name(type_: Type) -> &'static str {
    match type_ {
        Type::TYPE_DOUBLE => "double",
        Type::TYPE_FLOAT => "float",
        Type::TYPE_INT64 => "int64",
        Type::TYPE_UINT64 => "uint64",
        Type::TYPE_INT32 => "int32",
        Type::TYPE_FIXED64 => "fixed64",
        Type::TYPE_FIXED32 => "fixed32",
        Type::TYPE_BOOL => "bool",
        Type::TYPE_STRING => "string",
        Type::TYPE_GROUP => "group",
        Type::TYPE_MESSAGE => "message",
        Type::TYPE_BYTES => "bytes",
        Type::TYPE_UINT32 => "uint32",
        Type::TYPE_ENUM => "enum",
        Type::TYPE_SFIXED32 => "sfixed32",
        Type::TYPE_SFIXED64 => "sfixed64",
        Type::TYPE_SINT32 => "sint32",
        Type::TYPE_SINT64 => "sint64",
    }
}

fn normalize_float_default(val: &str) -> &str {
    match val {
        "Infinity" | "+Infinity" | "+Inf" | "Inf" => "inf",
        "-Infinity" | "-Inf" => "-inf",
        "NaN" => "nan",
        _ => val,
    }
}

/// JSON name the compiler derives when none is given: underscores dropped,
/// the following letter upper-cased.
fn default_json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Formats the file named `target` out of `files`.
///
/// `files` must contain every file `target` refers to so that extension
/// options and type references can be resolved.
pub fn format_file(
    files: &[FileDescriptorProto],
    target: &str,
    options: &TextGeneratorOptions,
) -> Result<String> {
    let tree = SchemaTree::build(files);
    let Some(file) = tree.find_file(target) else {
        bail!("{target} is not part of the descriptor set");
    };
    TextGenerator::new(&tree, file, options.clone()).format_file()
}

/// Convenience function to convert a self-contained FileDescriptorProto to proto text.
pub fn descriptor_to_proto(file: &FileDescriptorProto) -> Result<String> {
    format_file(
        std::slice::from_ref(file),
        file.name(),
        &TextGeneratorOptions::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use protobuf::Message;
    use protobuf::descriptor::descriptor_proto::ExtensionRange;
    use protobuf::descriptor::{
        DescriptorProto, EnumValueOptions, FieldOptions, MethodDescriptorProto,
        OneofDescriptorProto, ServiceDescriptorProto,
    };

    fn proto2(name: &str) -> FileDescriptorProto {
        let mut f = file(name, Some("demo"));
        f.set_syntax("proto2".to_string());
        f
    }

    fn range(start: i32, end: i32) -> ExtensionRange {
        let mut r = ExtensionRange::new();
        r.set_start(start);
        r.set_end(end);
        r
    }

    fn render(f: FileDescriptorProto) -> String {
        descriptor_to_proto(&f).unwrap()
    }

    #[test]
    fn test_comments_attach_to_fields() {
        let mut f = proto2("user.proto");
        let mut id = typed("id", 1, Type::TYPE_INT64, "");
        id.set_label(Label::LABEL_REQUIRED);
        f.message_type.push(message(
            "User",
            vec![id, scalar("name", 2, Label::LABEL_OPTIONAL)],
        ));
        comment(&mut f, &[4, 0], Some(" A user.\n"), None);
        comment(&mut f, &[4, 0, 2, 0], Some(" The id.\n"), None);
        comment(&mut f, &[4, 0, 2, 1], None, Some(" display name\n"));

        assert_eq!(
            render(f),
            "syntax = \"proto2\";\n\
             \n\
             package demo;\n\
             \n\
             // A user.\n\
             message User {\n\
             \x20 // The id.\n\
             \x20 required int64 id = 1;\n\
             \x20 optional string name = 2; // display name\n\
             }\n"
        );
    }

    #[test]
    fn test_extension_range_bounds() {
        let mut f = proto2("ranges.proto");
        let mut base = message("Base", vec![]);
        base.extension_range.push(range(100, 101));
        base.extension_range.push(range(1000, 536_870_912));
        base.extension_range.push(range(5, 536_870_911));
        f.message_type.push(base);

        let text = render(f);
        assert!(text.contains("  extensions 100 to 100;\n"));
        assert!(text.contains("  extensions 1000 to max;\n"));
        assert!(text.contains("  extensions 5 to max;\n"));

        let mut f = proto2("ranges.proto");
        let mut base = message("Base", vec![]);
        base.extension_range.push(range(1, 100));
        f.message_type.push(base);
        assert!(render(f).contains("  extensions 1 to 99;\n"));
    }

    #[test]
    fn test_extension_range_statements_keep_their_comments() {
        let mut f = proto2("ranges.proto");
        let mut base = message("Base", vec![]);
        base.extension_range.push(range(1, 6));
        base.extension_range.push(range(10, 21));
        base.extension_range.push(range(100, 201));
        f.message_type.push(base);
        // extensions 1 to 5, 10 to 20;
        // extensions 100 to 200;
        located(&mut f, &[4, 0, 5], &[4, 2, 32], Some(" first\n"));
        located(&mut f, &[4, 0, 5, 0], &[4, 13, 19], None);
        located(&mut f, &[4, 0, 5, 1], &[4, 21, 29], None);
        located(&mut f, &[4, 0, 5], &[6, 2, 25], Some(" second\n"));
        located(&mut f, &[4, 0, 5, 2], &[6, 13, 23], None);

        let text = render(f);
        assert!(text.contains(
            "  // first\n  extensions 1 to 5, 10 to 20;\n  // second\n  extensions 100 to 200;\n"
        ));
    }

    #[test]
    fn test_group_rendered_once() {
        let mut f = proto2("search.proto");
        let mut search = message(
            "Search",
            vec![group_field("foobar", 3, ".demo.Search.FooBar")],
        );
        search.nested_type.push(message(
            "FooBar",
            vec![scalar("url", 1, Label::LABEL_OPTIONAL)],
        ));
        f.message_type.push(search);

        let text = render(f);
        assert_eq!(
            text,
            "syntax = \"proto2\";\n\
             \n\
             package demo;\n\
             \n\
             message Search {\n\
             \x20 optional group FooBar = 3 {\n\
             \x20   optional string url = 1;\n\
             \x20 }\n\
             }\n"
        );
        assert_eq!(text.matches("FooBar").count(), 1);
    }

    #[test]
    fn test_scattered_extends_are_merged() {
        let mut f = proto2("ext.proto");
        for name in ["Base", "Other"] {
            let mut msg = message(name, vec![]);
            msg.extension_range.push(range(100, 200));
            f.message_type.push(msg);
        }
        f.extension
            .push(extension("a", 100, Type::TYPE_INT32, ".demo.Base"));
        f.extension
            .push(extension("b", 100, Type::TYPE_STRING, ".demo.Other"));
        f.extension
            .push(extension("c", 101, Type::TYPE_INT32, ".demo.Base"));
        comment(&mut f, &[7, 2], Some(" second\n"), None);

        assert_eq!(
            render(f),
            "syntax = \"proto2\";\n\
             \n\
             package demo;\n\
             \n\
             extend Base {\n\
             \x20 optional int32 a = 100;\n\
             \x20 // second\n\
             \x20 optional int32 c = 101;\n\
             }\n\
             \n\
             extend Other {\n\
             \x20 optional string b = 100;\n\
             }\n\
             \n\
             message Base {\n\
             \x20 extensions 100 to 199;\n\
             }\n\
             \n\
             message Other {\n\
             \x20 extensions 100 to 199;\n\
             }\n"
        );
    }

    #[test]
    fn test_second_extend_block_takes_collision_comment() {
        let mut f = proto2("ext.proto");
        for name in ["Base", "Other"] {
            let mut msg = message(name, vec![]);
            msg.extension_range.push(range(100, 200));
            f.message_type.push(msg);
        }
        f.extension
            .push(extension("a", 100, Type::TYPE_INT32, ".demo.Base"));
        f.extension
            .push(extension("b", 100, Type::TYPE_STRING, ".demo.Other"));
        comment(&mut f, &[7], Some(" for Base\n"), None);
        comment(&mut f, &[7], Some(" for Other\n"), None);

        let text = render(f);
        assert!(text.contains("// for Base\nextend Base {\n"));
        assert!(text.contains("// for Other\nextend Other {\n"));
    }

    #[test]
    fn test_proto3_maps_and_oneofs() {
        let mut f = file("bag.proto", Some("demo"));
        f.set_syntax("proto3".to_string());

        let mut entry = message(
            "CountsEntry",
            vec![
                scalar("key", 1, Label::LABEL_OPTIONAL),
                typed("value", 2, Type::TYPE_INT32, ""),
            ],
        );
        entry.options.mut_or_insert_default().set_map_entry(true);

        let mut counts = typed("counts", 1, Type::TYPE_MESSAGE, ".demo.Bag.CountsEntry");
        counts.set_label(Label::LABEL_REPEATED);
        let mut a = scalar("a", 2, Label::LABEL_OPTIONAL);
        a.set_oneof_index(0);
        let mut b = typed("b", 3, Type::TYPE_INT32, "");
        b.set_oneof_index(0);
        let mut c = typed("c", 4, Type::TYPE_INT32, "");
        c.set_oneof_index(1);
        c.set_proto3_optional(true);
        let tags = scalar("tags", 5, Label::LABEL_REPEATED);

        let mut bag = message("Bag", vec![counts, a, b, c, tags]);
        bag.nested_type.push(entry);
        for name in ["choice", "_c"] {
            let mut oneof = OneofDescriptorProto::new();
            oneof.set_name(name.to_string());
            bag.oneof_decl.push(oneof);
        }
        f.message_type.push(bag);

        assert_eq!(
            render(f),
            "syntax = \"proto3\";\n\
             \n\
             package demo;\n\
             \n\
             message Bag {\n\
             \x20 map<string, int32> counts = 1;\n\
             \x20 oneof choice {\n\
             \x20   string a = 2;\n\
             \x20   int32 b = 3;\n\
             \x20 }\n\
             \x20 optional int32 c = 4;\n\
             \x20 repeated string tags = 5;\n\
             }\n"
        );
    }

    #[test]
    fn test_empty_message_and_enum_trailing_comment() {
        let mut f = proto2("misc.proto");
        f.message_type.push(message("Empty", vec![]));
        let mut color = enumeration("Color", &[("RED", 0), ("GREEN", 1)]);
        let mut deprecated = EnumValueOptions::new();
        deprecated.set_deprecated(true);
        color.value[1].options = Some(deprecated).into();
        f.enum_type.push(color);
        comment(&mut f, &[5, 0], None, Some(" colors\n"));

        assert_eq!(
            render(f),
            "syntax = \"proto2\";\n\
             \n\
             package demo;\n\
             \n\
             enum Color {\n\
             \x20 // colors\n\
             \x20 RED = 0;\n\
             \x20 GREEN = 1 [deprecated = true];\n\
             }\n\
             \n\
             message Empty {}\n"
        );
    }

    #[test]
    fn test_services_and_streaming() {
        let mut f = file("svc.proto", Some("demo"));
        f.set_syntax("proto3".to_string());
        f.message_type.push(message("Req", vec![]));
        f.message_type.push(message("Resp", vec![]));

        let mut hello = MethodDescriptorProto::new();
        hello.set_name("Hello".to_string());
        hello.set_input_type(".demo.Req".to_string());
        hello.set_output_type(".demo.Resp".to_string());
        hello.set_server_streaming(true);

        let mut old = MethodDescriptorProto::new();
        old.set_name("Old".to_string());
        old.set_input_type(".demo.Req".to_string());
        old.set_output_type(".demo.Resp".to_string());
        old.options.mut_or_insert_default().set_deprecated(true);

        let mut service = ServiceDescriptorProto::new();
        service.set_name("Greeter".to_string());
        service.method.push(hello);
        service.method.push(old);
        f.service.push(service);
        comment(&mut f, &[6, 0, 2, 0], Some(" Says hello.\n"), None);

        assert_eq!(
            render(f),
            "syntax = \"proto3\";\n\
             \n\
             package demo;\n\
             \n\
             message Req {}\n\
             \n\
             message Resp {}\n\
             \n\
             service Greeter {\n\
             \x20 // Says hello.\n\
             \x20 rpc Hello(Req) returns (stream Resp);\n\
             \x20 rpc Old(Req) returns (Resp) {\n\
             \x20   option deprecated = true;\n\
             \x20 }\n\
             }\n"
        );
    }

    #[test]
    fn test_field_defaults_and_flags() {
        let mut f = proto2("defaults.proto");
        let mut greeting = scalar("greeting", 1, Label::LABEL_OPTIONAL);
        greeting.set_default_value("hi \"x\"".to_string());
        let mut ratio = typed("ratio", 2, Type::TYPE_DOUBLE, "");
        ratio.set_default_value("inf".to_string());
        let mut ids = typed("ids", 3, Type::TYPE_INT32, "");
        ids.set_label(Label::LABEL_REPEATED);
        let mut packed = FieldOptions::new();
        packed.set_packed(true);
        packed.set_deprecated(true);
        ids.options = Some(packed).into();
        let mut old_name = scalar("old_name", 4, Label::LABEL_OPTIONAL);
        old_name.set_json_name("legacy".to_string());
        let mut new_name = scalar("new_name", 5, Label::LABEL_OPTIONAL);
        new_name.set_json_name("newName".to_string());
        f.message_type.push(message(
            "Defaults",
            vec![greeting, ratio, ids, old_name, new_name],
        ));

        let text = render(f);
        assert!(text.contains("  optional string greeting = 1 [default = \"hi \\\"x\\\"\"];\n"));
        assert!(text.contains("  optional double ratio = 2 [default = inf];\n"));
        assert!(text.contains("  repeated int32 ids = 3 [packed = true, deprecated = true];\n"));
        assert!(text.contains("  optional string old_name = 4 [json_name = \"legacy\"];\n"));
        assert!(text.contains("  optional string new_name = 5;\n"));
    }

    #[test]
    fn test_imports_and_file_options() {
        let mut f = proto2("imports.proto");
        f.dependency.push("z/last.proto".to_string());
        f.dependency.push("a/public.proto".to_string());
        f.dependency.push("b/first.proto".to_string());
        f.public_dependency.push(1);
        let options = f.options.mut_or_insert_default();
        options.set_java_package("com.demo".to_string());
        options.set_go_package("demo/pb".to_string());
        comment(&mut f, &[3, 0], None, Some(" keep\n"));

        assert_eq!(
            render(f),
            "syntax = \"proto2\";\n\
             \n\
             package demo;\n\
             \n\
             import \"b/first.proto\";\n\
             import \"z/last.proto\"; // keep\n\
             import public \"a/public.proto\";\n\
             \n\
             option go_package = \"demo/pb\";\n\
             option java_package = \"com.demo\";\n"
        );
    }

    #[test]
    fn test_nested_types_use_short_names() {
        let mut f = proto2("nested.proto");
        let mut outer = message(
            "Outer",
            vec![typed("inner", 1, Type::TYPE_MESSAGE, ".demo.Outer.Inner")],
        );
        let mut inner: DescriptorProto = message("Inner", vec![]);
        inner
            .field
            .push(typed("kind", 1, Type::TYPE_ENUM, ".demo.Kind"));
        outer.nested_type.push(inner);
        f.message_type.push(outer);
        f.enum_type.push(enumeration("Kind", &[("A", 0)]));

        let text = render(f);
        assert!(text.contains("  optional Inner inner = 1;\n"));
        assert!(text.contains("    optional Kind kind = 1;\n"));
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let files = vec![proto2("a.proto")];
        assert!(format_file(&files, "b.proto", &TextGeneratorOptions::default()).is_err());
    }

    #[test]
    fn test_render_is_deterministic() {
        let build = || {
            let mut f = proto2("det.proto");
            f.message_type
                .push(message("A", vec![scalar("x", 1, Label::LABEL_OPTIONAL)]));
            f.options
                .mut_or_insert_default()
                .mut_unknown_fields()
                .add_varint(50000, 1);
            f
        };
        assert_eq!(render(build()), render(build()));
    }

    #[test]
    fn test_default_json_name() {
        assert_eq!(default_json_name("foo_bar_baz"), "fooBarBaz");
        assert_eq!(default_json_name("id"), "id");
    }

    #[test]
    fn test_custom_indent() {
        let mut f = proto2("indent.proto");
        f.message_type
            .push(message("A", vec![scalar("x", 1, Label::LABEL_OPTIONAL)]));
        let files = vec![f];
        let options = TextGeneratorOptions { indent_size: 4 };
        let text = format_file(&files, "indent.proto", &options).unwrap();
        assert!(text.contains("\n    optional string x = 1;\n"));
    }
}
