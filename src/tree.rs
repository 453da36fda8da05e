//! Navigable view over a set of file descriptors.
//!
//! The descriptor protos delivered by a schema compiler only point
//! downwards. [`SchemaTree`] wraps them in an arena so that every message,
//! enum and field knows its positional path, its file, and its enclosing
//! message. Parent links are plain ids into the arena; the protos stay owned
//! by the caller.

use crate::comments::{CommentMap, SourcePath};
use log::debug;
use protobuf::descriptor::field_descriptor_proto::{Label, Type};
use protobuf::descriptor::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    ServiceDescriptorProto,
};
use std::collections::{HashMap, HashSet};

/// Field numbers of `FileDescriptorProto` used in source paths.
pub mod file_tags {
    pub const PACKAGE: i32 = 2;
    pub const DEPENDENCY: i32 = 3;
    pub const MESSAGE: i32 = 4;
    pub const ENUM: i32 = 5;
    pub const SERVICE: i32 = 6;
    pub const EXTENSION: i32 = 7;
    pub const OPTIONS: i32 = 8;
    pub const SYNTAX: i32 = 12;
}

/// Field numbers of `DescriptorProto` used in source paths.
pub mod message_tags {
    pub const FIELD: i32 = 2;
    pub const NESTED: i32 = 3;
    pub const ENUM: i32 = 4;
    pub const EXTENSION_RANGE: i32 = 5;
    pub const EXTENSION: i32 = 6;
    pub const OPTIONS: i32 = 7;
    pub const ONEOF: i32 = 8;
}

pub mod enum_tags {
    pub const VALUE: i32 = 2;
    pub const OPTIONS: i32 = 3;
}

pub mod service_tags {
    pub const METHOD: i32 = 2;
    pub const OPTIONS: i32 = 3;
}

pub mod method_tags {
    pub const OPTIONS: i32 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumId(usize);

/// What a fully-qualified name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Package,
    Message(MessageId),
    Enum(EnumId),
}

pub struct SchemaFile<'a> {
    pub proto: &'a FileDescriptorProto,
    /// Top-level messages, in declaration order.
    pub messages: Vec<MessageId>,
    pub enums: Vec<EnumId>,
    pub extensions: Vec<FieldNode<'a>>,
    pub services: Vec<ServiceNode<'a>>,
    pub comments: CommentMap,
}

impl<'a> SchemaFile<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn package(&self) -> Option<&'a str> {
        self.proto.package.as_deref().filter(|p| !p.is_empty())
    }

    /// Fully-qualified scope of top-level declarations (`.pkg` or empty).
    pub fn scope(&self) -> String {
        self.package().map(|p| format!(".{p}")).unwrap_or_default()
    }

    pub fn syntax(&self) -> &'a str {
        match self.proto.syntax.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => "proto2",
        }
    }

    pub fn is_proto2(&self) -> bool {
        self.syntax() == "proto2"
    }
}

pub struct MessageNode<'a> {
    pub proto: &'a DescriptorProto,
    pub file: FileId,
    pub parent: Option<MessageId>,
    pub path: SourcePath,
    /// Fully-qualified name with leading dot.
    pub full_name: String,
    pub fields: Vec<FieldNode<'a>>,
    pub extensions: Vec<FieldNode<'a>>,
    pub nested: Vec<MessageId>,
    pub enums: Vec<EnumId>,
    /// Set when a group field renders this message inline.
    pub group: bool,
}

impl<'a> MessageNode<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn is_map_entry(&self) -> bool {
        self.proto
            .options
            .as_ref()
            .map(|o| o.map_entry())
            .unwrap_or(false)
    }
}

pub struct FieldNode<'a> {
    pub proto: &'a FieldDescriptorProto,
    pub file: FileId,
    pub parent: Option<MessageId>,
    pub path: SourcePath,
    /// Nested message holding the body of a group field.
    pub group_body: Option<MessageId>,
}

impl<'a> FieldNode<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn number(&self) -> i32 {
        self.proto.number()
    }

    pub fn label(&self) -> Label {
        self.proto.label()
    }

    pub fn type_(&self) -> Type {
        self.proto.type_()
    }

    pub fn type_name(&self) -> &'a str {
        self.proto.type_name()
    }

    pub fn extendee(&self) -> &'a str {
        self.proto.extendee()
    }

    /// Index of the declared oneof this field belongs to. Synthetic oneofs
    /// of proto3 `optional` fields are not reported.
    pub fn oneof_index(&self) -> Option<usize> {
        if self.proto.proto3_optional() {
            return None;
        }
        self.proto.oneof_index.map(|i| i as usize)
    }
}

pub struct EnumNode<'a> {
    pub proto: &'a EnumDescriptorProto,
    pub file: FileId,
    pub parent: Option<MessageId>,
    pub path: SourcePath,
    pub full_name: String,
}

impl<'a> EnumNode<'a> {
    pub fn name(&self) -> &'a str {
        self.proto.name()
    }

    pub fn value_name(&self, number: i32) -> Option<&'a str> {
        self.proto
            .value
            .iter()
            .find(|v| v.number() == number)
            .map(|v| v.name())
    }
}

pub struct ServiceNode<'a> {
    pub proto: &'a ServiceDescriptorProto,
    pub path: SourcePath,
    pub full_name: String,
}

#[derive(Debug, Clone, Copy)]
enum ExtensionRef {
    File(FileId, usize),
    Message(MessageId, usize),
}

/// Arena of every declaration in a set of files.
#[derive(Default)]
pub struct SchemaTree<'a> {
    files: Vec<SchemaFile<'a>>,
    messages: Vec<MessageNode<'a>>,
    enums: Vec<EnumNode<'a>>,
    symbols: HashMap<String, Symbol>,
    extensions: HashMap<(String, u32), ExtensionRef>,
}

impl<'a> SchemaTree<'a> {
    /// Wraps every file of the set. An empty set yields an empty tree.
    pub fn build(files: &'a [FileDescriptorProto]) -> Self {
        let mut tree = SchemaTree::default();
        for proto in files {
            tree.wrap_file(proto);
        }
        tree.index_extensions();
        debug!(
            "built schema tree: {} files, {} messages, {} enums",
            tree.files.len(),
            tree.messages.len(),
            tree.enums.len()
        );
        tree
    }

    pub fn file(&self, id: FileId) -> &SchemaFile<'a> {
        &self.files[id.0]
    }

    pub fn find_file(&self, name: &str) -> Option<FileId> {
        self.files.iter().position(|f| f.name() == name).map(FileId)
    }

    pub fn message(&self, id: MessageId) -> &MessageNode<'a> {
        &self.messages[id.0]
    }

    pub fn enum_node(&self, id: EnumId) -> &EnumNode<'a> {
        &self.enums[id.0]
    }

    /// Looks up a fully-qualified name (leading dot optional).
    pub fn lookup(&self, full_name: &str) -> Option<Symbol> {
        if full_name.starts_with('.') {
            self.symbols.get(full_name).copied()
        } else {
            self.symbols.get(&format!(".{full_name}")).copied()
        }
    }

    pub fn lookup_message(&self, full_name: &str) -> Option<MessageId> {
        match self.lookup(full_name) {
            Some(Symbol::Message(id)) => Some(id),
            _ => None,
        }
    }

    pub fn lookup_enum(&self, full_name: &str) -> Option<EnumId> {
        match self.lookup(full_name) {
            Some(Symbol::Enum(id)) => Some(id),
            _ => None,
        }
    }

    /// Declaration of extension `number` on the options type `extendee`.
    pub fn find_extension(&self, extendee: &str, number: u32) -> Option<&FieldNode<'a>> {
        let key = (qualify(extendee), number);
        match *self.extensions.get(&key)? {
            ExtensionRef::File(file, i) => self.files[file.0].extensions.get(i),
            ExtensionRef::Message(msg, i) => self.messages[msg.0].extensions.get(i),
        }
    }

    /// Name of a message relative to its file's package, e.g. `Outer.Inner`.
    pub fn relative_name(&self, id: MessageId) -> &str {
        let msg = self.message(id);
        let scope = self.file(msg.file).scope();
        &msg.full_name[scope.len() + 1..]
    }

    /// Fully-qualified scope that names inside `field` are resolved from.
    pub fn field_scope(&self, field: &FieldNode<'_>) -> String {
        match field.parent {
            Some(parent) => self.message(parent).full_name.clone(),
            None => self.file(field.file).scope(),
        }
    }

    /// Resolves `name` as written inside `scope` using the schema
    /// language's rules: the innermost scope that declares the first
    /// component wins, and the rest of the name must be found under it.
    pub fn resolve_relative(&self, name: &str, scope: &str) -> Option<String> {
        if name.starts_with('.') {
            return self.symbols.contains_key(name).then(|| name.to_string());
        }
        let first = name.split('.').next().unwrap_or(name);
        let mut scope = scope.to_string();
        loop {
            if self.symbols.contains_key(&format!("{scope}.{first}")) {
                let candidate = format!("{scope}.{name}");
                return self.symbols.contains_key(&candidate).then_some(candidate);
            }
            if scope.is_empty() {
                return None;
            }
            match scope.rfind('.') {
                Some(i) => scope.truncate(i),
                None => scope.clear(),
            }
        }
    }

    fn wrap_file(&mut self, proto: &'a FileDescriptorProto) {
        let file = FileId(self.files.len());
        let scope = proto
            .package
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!(".{p}"))
            .unwrap_or_default();

        let mut prefix = String::new();
        for component in scope.split('.').skip(1) {
            prefix.push('.');
            prefix.push_str(component);
            self.symbols.insert(prefix.clone(), Symbol::Package);
        }

        let messages: Vec<MessageId> = proto
            .message_type
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let path = SourcePath::new(vec![file_tags::MESSAGE, i as i32]);
                self.wrap_message(m, file, None, path, &scope)
            })
            .collect();

        let enums = proto
            .enum_type
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let path = SourcePath::new(vec![file_tags::ENUM, i as i32]);
                self.wrap_enum(e, file, None, path, &scope)
            })
            .collect();

        let mut claimed = HashSet::new();
        let extensions = proto
            .extension
            .iter()
            .enumerate()
            .map(|(i, f)| FieldNode {
                proto: f,
                file,
                parent: None,
                path: SourcePath::new(vec![file_tags::EXTENSION, i as i32]),
                group_body: self.claim_group(f, &messages, &mut claimed),
            })
            .collect();

        let services = proto
            .service
            .iter()
            .enumerate()
            .map(|(i, s)| ServiceNode {
                proto: s,
                path: SourcePath::new(vec![file_tags::SERVICE, i as i32]),
                full_name: format!("{scope}.{}", s.name()),
            })
            .collect();

        let comments = proto
            .source_code_info
            .as_ref()
            .map(CommentMap::from_source_info)
            .unwrap_or_default();

        self.files.push(SchemaFile {
            proto,
            messages,
            enums,
            extensions,
            services,
            comments,
        });
    }

    fn wrap_message(
        &mut self,
        proto: &'a DescriptorProto,
        file: FileId,
        parent: Option<MessageId>,
        path: SourcePath,
        scope: &str,
    ) -> MessageId {
        let id = MessageId(self.messages.len());
        let full_name = format!("{scope}.{}", proto.name());
        self.symbols.insert(full_name.clone(), Symbol::Message(id));
        self.messages.push(MessageNode {
            proto,
            file,
            parent,
            path: path.clone(),
            full_name: full_name.clone(),
            fields: Vec::new(),
            extensions: Vec::new(),
            nested: Vec::new(),
            enums: Vec::new(),
            group: false,
        });

        let enums = proto
            .enum_type
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let enum_path = path.child(message_tags::ENUM, i);
                self.wrap_enum(e, file, Some(id), enum_path, &full_name)
            })
            .collect();

        let nested: Vec<MessageId> = proto
            .nested_type
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let nested_path = path.child(message_tags::NESTED, i);
                self.wrap_message(m, file, Some(id), nested_path, &full_name)
            })
            .collect();

        let mut claimed = HashSet::new();
        let fields = proto
            .field
            .iter()
            .enumerate()
            .map(|(i, f)| FieldNode {
                proto: f,
                file,
                parent: Some(id),
                path: path.child(message_tags::FIELD, i),
                group_body: self.claim_group(f, &nested, &mut claimed),
            })
            .collect();
        let extensions = proto
            .extension
            .iter()
            .enumerate()
            .map(|(i, f)| FieldNode {
                proto: f,
                file,
                parent: Some(id),
                path: path.child(message_tags::EXTENSION, i),
                group_body: self.claim_group(f, &nested, &mut claimed),
            })
            .collect();

        let node = &mut self.messages[id.0];
        node.fields = fields;
        node.extensions = extensions;
        node.nested = nested;
        node.enums = enums;
        id
    }

    fn wrap_enum(
        &mut self,
        proto: &'a EnumDescriptorProto,
        file: FileId,
        parent: Option<MessageId>,
        path: SourcePath,
        scope: &str,
    ) -> EnumId {
        let id = EnumId(self.enums.len());
        let full_name = format!("{scope}.{}", proto.name());
        self.symbols.insert(full_name.clone(), Symbol::Enum(id));
        self.enums.push(EnumNode {
            proto,
            file,
            parent,
            path,
            full_name,
        });
        id
    }

    /// Pairs a group field with the sibling message carrying its body.
    /// Each message is handed out at most once.
    fn claim_group(
        &mut self,
        field: &FieldDescriptorProto,
        candidates: &[MessageId],
        claimed: &mut HashSet<MessageId>,
    ) -> Option<MessageId> {
        if field.type_() != Type::TYPE_GROUP {
            return None;
        }
        let type_short = field.type_name().rsplit('.').next().unwrap_or_default();
        let free = || candidates.iter().copied().filter(|id| !claimed.contains(id));
        let found = free()
            .find(|id| self.messages[id.0].name().to_lowercase() == field.name())
            .or_else(|| free().find(|id| self.messages[id.0].name() == type_short));

        match found {
            Some(id) => {
                claimed.insert(id);
                self.messages[id.0].group = true;
            }
            None => debug!("group field {} has no matching nested message", field.name()),
        }
        found
    }

    fn index_extensions(&mut self) {
        let mut index = HashMap::new();
        for (f, file) in self.files.iter().enumerate() {
            for (i, ext) in file.extensions.iter().enumerate() {
                index
                    .entry((qualify(ext.extendee()), ext.number() as u32))
                    .or_insert(ExtensionRef::File(FileId(f), i));
            }
        }
        for (m, msg) in self.messages.iter().enumerate() {
            for (i, ext) in msg.extensions.iter().enumerate() {
                index
                    .entry((qualify(ext.extendee()), ext.number() as u32))
                    .or_insert(ExtensionRef::Message(MessageId(m), i));
            }
        }
        self.extensions = index;
    }
}

fn qualify(name: &str) -> String {
    if name.starts_with('.') {
        name.to_string()
    } else {
        format!(".{name}")
    }
}
