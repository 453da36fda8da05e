//! Printing of message and enum references.
//!
//! Descriptors store every type reference fully qualified (`.pkg.Outer.Inner`).
//! When writing source back out we want the shortest name a reader of the
//! file would write, but only if the schema compiler resolves it back to the
//! same type from the place it is written.

use crate::tree::{FileId, MessageId, SchemaTree, Symbol};

pub struct NameResolver<'t, 'a> {
    tree: &'t SchemaTree<'a>,
    file: FileId,
}

impl<'t, 'a> NameResolver<'t, 'a> {
    pub fn new(tree: &'t SchemaTree<'a>, file: FileId) -> Self {
        Self { tree, file }
    }

    /// Name to print for the type `full_name` when referenced from `scope`.
    ///
    /// `parent` is the message the reference appears in, if any; its nested
    /// types and enums are preferred candidates.
    pub fn reference(&self, full_name: &str, scope: &str, parent: Option<MessageId>) -> String {
        let target = if full_name.starts_with('.') {
            full_name.to_string()
        } else {
            format!(".{full_name}")
        };
        let resolves = |candidate: &str| {
            self.tree.resolve_relative(candidate, scope).as_deref() == Some(target.as_str())
        };

        for candidate in self.candidates(&target, parent) {
            if resolves(&candidate) {
                return candidate;
            }
        }

        let parts: Vec<&str> = target[1..].split('.').collect();
        for start in (0..parts.len()).rev() {
            let candidate = parts[start..].join(".");
            if resolves(&candidate) {
                return candidate;
            }
        }

        if self.tree.lookup(&target).is_none() {
            target[1..].to_string()
        } else {
            target
        }
    }

    fn candidates(&self, target: &str, parent: Option<MessageId>) -> Vec<String> {
        let tree = self.tree;
        let file = tree.file(self.file);
        let short = target.rsplit('.').next().unwrap_or(target);
        let mut out = Vec::new();

        if file
            .messages
            .iter()
            .any(|&id| tree.message(id).full_name == target)
        {
            out.push(short.to_string());
        }

        if let Some(parent) = parent {
            let node = tree.message(parent);
            let prefix = format!("{}.", node.full_name);
            if let (Some(rest), Some(Symbol::Message(_))) =
                (target.strip_prefix(&prefix), tree.lookup(target))
            {
                out.push(rest.to_string());
            }
            if node
                .enums
                .iter()
                .any(|&id| tree.enum_node(id).full_name == target)
            {
                out.push(short.to_string());
            }
        }

        let package_prefix = format!("{}.", file.scope());
        if let (Some(rest), Some(symbol)) = (target.strip_prefix(&package_prefix), tree.lookup(target)) {
            if symbol != Symbol::Package {
                out.push(rest.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use protobuf::descriptor::field_descriptor_proto::Type;
    use protobuf::descriptor::FileDescriptorProto;

    fn files() -> Vec<FileDescriptorProto> {
        let mut outer = message("Outer", vec![]);
        outer.nested_type.push(message("Inner", vec![]));
        outer.enum_type.push(enumeration("State", &[("IDLE", 0)]));

        let mut shadow = message("Shadow", vec![]);
        shadow.nested_type.push(message("Outer", vec![]));

        let mut a = file("a.proto", Some("demo.v1"));
        a.message_type.push(outer);
        a.message_type.push(shadow);

        let mut b = file("b.proto", Some("demo.v1"));
        b.message_type.push(message("Shared", vec![]));

        let mut c = file("c.proto", Some("other"));
        let mut ext = message("Ext", vec![]);
        ext.field
            .push(typed("x", 1, Type::TYPE_MESSAGE, ".demo.v1.Shared"));
        c.message_type.push(ext);
        vec![a, b, c]
    }

    #[test]
    fn test_sibling_and_nested_names() {
        let files = files();
        let tree = SchemaTree::build(&files);
        let a = tree.find_file("a.proto").unwrap();
        let outer = tree.file(a).messages[0];
        let names = NameResolver::new(&tree, a);

        assert_eq!(names.reference(".demo.v1.Outer", ".demo.v1.Outer", Some(outer)), "Outer");
        assert_eq!(
            names.reference(".demo.v1.Outer.Inner", ".demo.v1.Outer", Some(outer)),
            "Inner"
        );
        assert_eq!(
            names.reference(".demo.v1.Outer.State", ".demo.v1.Outer", Some(outer)),
            "State"
        );
        assert_eq!(names.reference(".demo.v1.Outer.Inner", ".demo.v1", None), "Outer.Inner");
    }

    #[test]
    fn test_same_package_other_file() {
        let files = files();
        let tree = SchemaTree::build(&files);
        let a = tree.find_file("a.proto").unwrap();
        let names = NameResolver::new(&tree, a);
        assert_eq!(names.reference(".demo.v1.Shared", ".demo.v1", None), "Shared");
    }

    #[test]
    fn test_shadowed_name_is_qualified() {
        let files = files();
        let tree = SchemaTree::build(&files);
        let a = tree.find_file("a.proto").unwrap();
        let shadow = tree.file(a).messages[1];
        let names = NameResolver::new(&tree, a);

        // Inside Shadow, `Outer` means Shadow.Outer.
        assert_eq!(
            names.reference(".demo.v1.Outer", ".demo.v1.Shadow", Some(shadow)),
            "v1.Outer"
        );
    }

    #[test]
    fn test_cross_package_and_unknown() {
        let files = files();
        let tree = SchemaTree::build(&files);
        let c = tree.find_file("c.proto").unwrap();
        let names = NameResolver::new(&tree, c);

        assert_eq!(names.reference(".demo.v1.Shared", ".other.Ext", None), "demo.v1.Shared");
        assert_eq!(names.reference(".missing.Thing", ".other", None), "missing.Thing");
    }
}
