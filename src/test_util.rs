//! Descriptor builders shared by unit tests.

use protobuf::descriptor::field_descriptor_proto::{Label, Type};
use protobuf::descriptor::source_code_info::Location;
use protobuf::descriptor::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto,
};

pub fn file(name: &str, package: Option<&str>) -> FileDescriptorProto {
    let mut file = FileDescriptorProto::new();
    file.set_name(name.to_string());
    if let Some(package) = package {
        file.set_package(package.to_string());
    }
    file
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    let mut msg = DescriptorProto::new();
    msg.set_name(name.to_string());
    msg.field = fields;
    msg
}

pub fn typed(name: &str, number: i32, type_: Type, type_name: &str) -> FieldDescriptorProto {
    let mut field = FieldDescriptorProto::new();
    field.set_name(name.to_string());
    field.set_number(number);
    field.set_label(Label::LABEL_OPTIONAL);
    field.set_type(type_);
    if !type_name.is_empty() {
        field.set_type_name(type_name.to_string());
    }
    field
}

/// `string` field with the given label.
pub fn scalar(name: &str, number: i32, label: Label) -> FieldDescriptorProto {
    let mut field = typed(name, number, Type::TYPE_STRING, "");
    field.set_label(label);
    field
}

pub fn group_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    typed(name, number, Type::TYPE_GROUP, type_name)
}

pub fn extension(name: &str, number: i32, type_: Type, extendee: &str) -> FieldDescriptorProto {
    let mut field = typed(name, number, type_, "");
    field.set_extendee(extendee.to_string());
    field
}

pub fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    let mut e = EnumDescriptorProto::new();
    e.set_name(name.to_string());
    for (value_name, number) in values {
        let mut value = EnumValueDescriptorProto::new();
        value.set_name(value_name.to_string());
        value.set_number(*number);
        e.value.push(value);
    }
    e
}

/// Attaches a comment location to `file`.
pub fn comment(
    file: &mut FileDescriptorProto,
    path: &[i32],
    leading: Option<&str>,
    trailing: Option<&str>,
) {
    let info = file.source_code_info.mut_or_insert_default();
    let mut location = Location::new();
    location.path = path.to_vec();
    location.leading_comments = leading.map(str::to_string);
    location.trailing_comments = trailing.map(str::to_string);
    info.location.push(location);
}

/// Attaches a location with a source span and optional leading comment.
pub fn located(file: &mut FileDescriptorProto, path: &[i32], span: &[i32], leading: Option<&str>) {
    let info = file.source_code_info.mut_or_insert_default();
    let mut location = Location::new();
    location.path = path.to_vec();
    location.span = span.to_vec();
    location.leading_comments = leading.map(str::to_string);
    info.location.push(location);
}
