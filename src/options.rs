//! Rendering of custom (extension) options.
//!
//! Extension values set on an options message are not known to the
//! descriptor types, so they survive parsing only as unknown fields. They
//! are collected per field number as raw records, matched against the
//! extension declarations of the loaded files, and printed back as
//! `(name) = value` or `(name).field = value`.

use crate::comments::{CommentMap, SourcePath};
use crate::tree::{FieldNode, FileId, SchemaTree};
use crate::wire::{self, ScalarKind, Tag, WireType};
use anyhow::{Context, Result};
use log::debug;
use protobuf::descriptor::field_descriptor_proto::Type;
use protobuf::descriptor::FieldDescriptorProto;
use protobuf::{CodedOutputStream, Message, UnknownFields, UnknownValueRef};
use std::collections::BTreeMap;

/// Options message a custom option extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsKind {
    File,
    Message,
    Field,
    Oneof,
    Enum,
    EnumValue,
    Service,
    Method,
}

impl OptionsKind {
    pub fn extendee(self) -> &'static str {
        match self {
            OptionsKind::File => ".google.protobuf.FileOptions",
            OptionsKind::Message => ".google.protobuf.MessageOptions",
            OptionsKind::Field => ".google.protobuf.FieldOptions",
            OptionsKind::Oneof => ".google.protobuf.OneofOptions",
            OptionsKind::Enum => ".google.protobuf.EnumOptions",
            OptionsKind::EnumValue => ".google.protobuf.EnumValueOptions",
            OptionsKind::Service => ".google.protobuf.ServiceOptions",
            OptionsKind::Method => ".google.protobuf.MethodOptions",
        }
    }
}

/// Raw extension records of one options message, keyed by field number.
/// Each value holds complete records (tag and payload) for that number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtensions {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl RawExtensions {
    pub fn from_message<M: Message>(options: &M) -> Result<Self> {
        Self::from_unknown_fields(options.unknown_fields())
    }

    pub fn from_unknown_fields(fields: &UnknownFields) -> Result<Self> {
        let mut entries: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        for (number, value) in fields.iter() {
            let buf = entries.entry(number).or_default();
            let mut os = CodedOutputStream::vec(buf);
            match value {
                UnknownValueRef::Varint(v) => {
                    os.write_raw_varint32(Tag::new(number, WireType::Varint).key())?;
                    os.write_raw_varint64(v)?;
                }
                UnknownValueRef::Fixed32(v) => {
                    os.write_raw_varint32(Tag::new(number, WireType::Fixed32).key())?;
                    os.write_raw_little_endian32(v)?;
                }
                UnknownValueRef::Fixed64(v) => {
                    os.write_raw_varint32(Tag::new(number, WireType::Fixed64).key())?;
                    os.write_raw_little_endian64(v)?;
                }
                UnknownValueRef::LengthDelimited(bytes) => {
                    os.write_raw_varint32(Tag::new(number, WireType::LengthDelimited).key())?;
                    os.write_raw_varint32(bytes.len() as u32)?;
                    os.write_raw_bytes(bytes)?;
                }
            }
            os.flush()?;
        }
        Ok(Self { entries })
    }

    /// Adds already-encoded records for `number`.
    pub fn insert_raw(&mut self, number: u32, records: &[u8]) {
        self.entries
            .entry(number)
            .or_default()
            .extend_from_slice(records);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.entries.iter().map(|(n, b)| (*n, b.as_slice()))
    }
}

/// One decoded option assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOption {
    pub name: String,
    pub field: Option<String>,
    pub value: String,
    pub number: u32,
    pub field_number: Option<u32>,
}

impl RenderedOption {
    /// Left- and right-hand side as written in source, without `option`.
    pub fn source(&self) -> String {
        match &self.field {
            Some(field) => format!("({}).{} = {}", self.name, field, self.value),
            None => format!("({}) = {}", self.name, self.value),
        }
    }

    fn path_tail(&self) -> Vec<i32> {
        let mut tail = vec![self.number as i32];
        tail.extend(self.field_number.map(|n| n as i32));
        tail
    }
}

pub struct OptionRenderer<'t, 'a> {
    tree: &'t SchemaTree<'a>,
    file: FileId,
}

impl<'t, 'a> OptionRenderer<'t, 'a> {
    pub fn new(tree: &'t SchemaTree<'a>, file: FileId) -> Self {
        Self { tree, file }
    }

    /// Decodes every known extension of `raw` in field-number order.
    /// Numbers without a matching declaration are skipped.
    pub fn decode_all(&self, raw: &RawExtensions, kind: OptionsKind) -> Result<Vec<RenderedOption>> {
        let mut out = Vec::new();
        for (number, records) in raw.iter() {
            let Some(ext) = self.tree.find_extension(kind.extendee(), number) else {
                debug!("no declaration for option {number} on {}", kind.extendee());
                continue;
            };
            let decoded = self
                .decode_extension(ext, number, records)
                .with_context(|| format!("malformed option ({}) payload", ext.name()))?;
            out.extend(decoded);
        }
        Ok(out)
    }

    /// Options as `option ...;` lines at `indent`, sorted by name, each with
    /// its attached comments. `options_path` is the path of the options
    /// message in the source info.
    pub fn statements(
        &self,
        raw: &RawExtensions,
        kind: OptionsKind,
        indent: &str,
        options_path: &SourcePath,
        comments: &CommentMap,
    ) -> Result<String> {
        let mut options = self.decode_all(raw, kind)?;
        options.sort_by(|a, b| a.name.cmp(&b.name));

        let mut seen: BTreeMap<Vec<i32>, usize> = BTreeMap::new();
        let mut out = String::new();
        for option in &options {
            let tail = option.path_tail();
            let slot = seen.entry(tail.clone()).or_insert(0);
            let mut path = options_path.clone();
            for component in tail {
                path = path.push(component);
            }
            let path = path.nth_duplicate(*slot);
            *slot += 1;

            out.push_str(&comments.leading(&path, indent));
            out.push_str(&format!("{indent}option {};", option.source()));
            out.push_str(&comments.trailing_suffix(&path, indent));
        }
        Ok(out)
    }

    /// Options in the comma-separated form used inside `[...]`.
    pub fn inline(&self, raw: &RawExtensions, kind: OptionsKind) -> Result<Vec<String>> {
        Ok(self
            .decode_all(raw, kind)?
            .iter()
            .map(RenderedOption::source)
            .collect())
    }

    fn decode_extension(
        &self,
        ext: &FieldNode<'a>,
        number: u32,
        records: &[u8],
    ) -> Result<Vec<RenderedOption>> {
        let name = self.extension_name(ext);
        let option = |field: Option<(String, u32)>, value: String| RenderedOption {
            name: name.clone(),
            field: field.as_ref().map(|(f, _)| f.clone()),
            value,
            number,
            field_number: field.map(|(_, n)| n),
        };

        let mut out = Vec::new();
        let mut offset = 0;
        while offset < records.len() {
            let (tag, used) = Tag::decode(records, offset)?;
            offset += used;

            match ext.type_() {
                Type::TYPE_GROUP => {
                    debug!("group-typed option ({name}) is not printed");
                    break;
                }
                Type::TYPE_MESSAGE if tag.wire_type == WireType::LengthDelimited => {
                    let (payload, used) = wire::read_length_delimited(records, offset)?;
                    offset += used;
                    let fields = self.message_fields(ext.type_name(), payload)?;
                    if fields.is_empty() {
                        out.push(option(None, "{}".to_string()));
                    }
                    for (field, value) in fields {
                        out.push(option(Some(field), value));
                    }
                }
                Type::TYPE_MESSAGE => {
                    offset += wire::skip(records, offset, tag.wire_type)?;
                }
                _ => {
                    let (values, used) = self.field_values(ext.proto, tag.wire_type, records, offset)?;
                    offset += used;
                    out.extend(values.into_iter().map(|v| option(None, v)));
                }
            }
        }
        Ok(out)
    }

    /// Sub-fields of a message-typed option payload as `(name, number)`
    /// and value pairs, in payload order.
    fn message_fields(&self, type_name: &str, payload: &[u8]) -> Result<Vec<((String, u32), String)>> {
        let message = self.tree.lookup_message(type_name).map(|id| self.tree.message(id));
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let (tag, used) = Tag::decode(payload, offset)?;
            offset += used;

            let field = message.and_then(|m| {
                m.proto
                    .field
                    .iter()
                    .find(|f| f.number() == tag.number as i32)
            });
            let Some(field) = field else {
                debug!("skipping unknown sub-field {} of {type_name}", tag.number);
                offset += wire::skip(payload, offset, tag.wire_type)?;
                continue;
            };

            let (values, used) = self.field_values(field, tag.wire_type, payload, offset)?;
            offset += used;
            for value in values {
                out.push(((field.name().to_string(), tag.number), value));
            }
        }
        Ok(out)
    }

    /// Literal(s) of one value of `field` whose tag carried `wire_type`.
    /// Packed payloads yield one literal per element; a declared type that
    /// does not fit the wire type falls back to the wire type's default.
    fn field_values(
        &self,
        field: &FieldDescriptorProto,
        wire_type: WireType,
        buf: &[u8],
        offset: usize,
    ) -> Result<(Vec<String>, usize)> {
        match (field.type_(), wire_type) {
            (Type::TYPE_MESSAGE, WireType::LengthDelimited) => {
                let (payload, used) = wire::read_length_delimited(buf, offset)?;
                Ok((vec![self.aggregate(field.type_name(), payload)?], used))
            }
            (Type::TYPE_GROUP, _) | (_, WireType::StartGroup) | (_, WireType::EndGroup) => {
                debug!("group value for {} is not printed", field.name());
                Ok((Vec::new(), buf.len() - offset))
            }
            _ => {
                let declared = ScalarKind::from_field_type(field.type_())
                    .filter(|kind| kind.wire_type() == wire_type);
                if let Some(kind) = declared {
                    let (value, used) = self.scalar(field, kind, buf, offset)?;
                    return Ok((vec![value], used));
                }

                let packable = ScalarKind::from_field_type(field.type_())
                    .filter(|kind| kind.wire_type() != WireType::LengthDelimited);
                if let (Some(kind), WireType::LengthDelimited) = (packable, wire_type) {
                    let (payload, used) = wire::read_length_delimited(buf, offset)?;
                    let mut values = Vec::new();
                    let mut pos = 0;
                    while pos < payload.len() {
                        let (value, n) = self.scalar(field, kind, payload, pos)?;
                        values.push(value);
                        pos += n;
                    }
                    return Ok((values, used));
                }

                match ScalarKind::for_wire_type(wire_type) {
                    Some(kind) => {
                        let (value, used) = wire::decode(buf, offset, kind)?;
                        Ok((vec![value], used))
                    }
                    None => Ok((Vec::new(), buf.len() - offset)),
                }
            }
        }
    }

    fn scalar(
        &self,
        field: &FieldDescriptorProto,
        kind: ScalarKind,
        buf: &[u8],
        offset: usize,
    ) -> Result<(String, usize)> {
        let (literal, used) = wire::decode(buf, offset, kind)?;
        if kind != ScalarKind::Enum {
            return Ok((literal, used));
        }
        let name = literal.parse::<i32>().ok().and_then(|number| {
            self.tree
                .lookup_enum(field.type_name())
                .and_then(|id| self.tree.enum_node(id).value_name(number))
        });
        Ok((name.map(str::to_string).unwrap_or(literal), used))
    }

    /// Text-format rendering of a nested message value: `{ a: 1 b: "x" }`.
    fn aggregate(&self, type_name: &str, payload: &[u8]) -> Result<String> {
        let fields = self.message_fields(type_name, payload)?;
        if fields.is_empty() {
            return Ok("{}".to_string());
        }
        let body: Vec<String> = fields
            .into_iter()
            .map(|((name, _), value)| format!("{name}: {value}"))
            .collect();
        Ok(format!("{{ {} }}", body.join(" ")))
    }

    /// Name of an extension as written from the file being rendered.
    fn extension_name(&self, ext: &FieldNode<'a>) -> String {
        let local = match ext.parent {
            Some(parent) => format!("{}.{}", self.tree.relative_name(parent), ext.name()),
            None => ext.name().to_string(),
        };
        match self.tree.file(ext.file).package() {
            Some(package) if ext.file != self.file => format!("{package}.{local}"),
            _ => local,
        }
    }
}
