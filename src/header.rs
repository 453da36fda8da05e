//! File header preservation.
//!
//! A block of `//` lines at the top of a file that is not attached to the
//! first declaration (license text, "generated by" banners) never reaches the
//! descriptor, so it is lifted straight from the source text.

/// Returns the leading `//` comment block of `content`, one line per entry,
/// joined with newlines.
///
/// Returns an empty string when there is no such block, or when the block runs
/// directly into a statement (`syntax`, `package`, ...), since the schema
/// compiler then attaches it to that statement and it is printed from the
/// descriptor.
pub fn read_file_header(content: &str) -> String {
    let mut lines = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("//") {
            lines.push(line);
            continue;
        }
        if !line.is_empty() {
            return String::new();
        }
        break;
    }
    lines.join("\n")
}

/// Whether `content` has comments besides its file header.
///
/// These only survive formatting when the parser recorded source info.
pub fn has_body_comments(content: &str) -> bool {
    let header = read_file_header(content);
    let skip = if header.is_empty() {
        0
    } else {
        header.lines().count()
    };
    let body: Vec<&str> = content.lines().skip(skip).collect();
    contains_comment(&body.join("\n"))
}

/// `//` or `/*` outside string literals.
fn contains_comment(text: &str) -> bool {
    let mut quote = None;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => match ch {
                '\\' => {
                    chars.next();
                }
                '\n' => quote = None,
                c if c == q => quote = None,
                _ => {}
            },
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '/' if matches!(chars.peek(), Some(&'/') | Some(&'*')) => return true,
                _ => {}
            },
        }
    }
    false
}

/// Places `header` above `formatted`, separated by a blank line.
pub fn apply_header(header: &str, formatted: &str) -> String {
    if header.is_empty() {
        return formatted.to_string();
    }
    format!("{header}\n\n{formatted}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_header() {
        let source = "// Copyright 2024 Acme\n// SPDX: MIT\n\nsyntax = \"proto3\";\n";
        assert_eq!(read_file_header(source), "// Copyright 2024 Acme\n// SPDX: MIT");
    }

    #[test]
    fn test_header_attached_to_statement() {
        assert_eq!(read_file_header("// Package docs\npackage demo;\n"), "");
        assert_eq!(read_file_header("// Syntax docs\nsyntax = \"proto3\";\n"), "");
    }

    #[test]
    fn test_no_header() {
        assert_eq!(read_file_header("syntax = \"proto3\";\n// late\n"), "");
        assert_eq!(read_file_header(""), "");
    }

    #[test]
    fn test_apply_header() {
        assert_eq!(apply_header("", "syntax = \"proto3\";\n"), "syntax = \"proto3\";\n");
        assert_eq!(
            apply_header("// a\n// b", "syntax = \"proto3\";\n"),
            "// a\n// b\n\nsyntax = \"proto3\";\n"
        );
    }

    #[test]
    fn test_body_comments() {
        assert!(has_body_comments("message User {\n  string id = 1; // trailing\n}\n"));
        assert!(has_body_comments("/* block */\nmessage A {}\n"));
        // attached to the first statement, so not a header
        assert!(has_body_comments("// A user record.\nmessage User {}\n"));
    }

    #[test]
    fn test_header_and_strings_are_not_body_comments() {
        assert!(!has_body_comments("// License\n\nsyntax = \"proto3\";\nmessage A {}\n"));
        assert!(!has_body_comments(
            "syntax = \"proto3\";\noption go_package = \"http://x/y\";\n"
        ));
        assert!(!has_body_comments("option (note) = 'a \\' // b';\n"));
    }
}
