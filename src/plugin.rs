//! protoc plugin mode: `protoc --protofmt_out=DIR` writes the formatted copy of
//! every file on the command line into `DIR` under its original name.
//!
//! The plugin parameter (`--protofmt_opt=...`) is a comma separated list of
//! `no_verify` and `indent=<n>`.

use crate::config::Config;
use crate::text_gen::format_file;
use crate::verify::verify_round_trip;
use anyhow::{bail, Context, Result};
use log::{debug, error};
use protobuf::descriptor::FileDescriptorProto;
use protobuf::plugin::{code_generator_response, CodeGeneratorRequest, CodeGeneratorResponse};

/// Formats every file the request asks for.
///
/// Failures are reported through the response's `error` field, as protoc
/// expects, and no files are returned in that case.
pub fn handle_request(request: &CodeGeneratorRequest, config: &Config) -> CodeGeneratorResponse {
    let mut response = CodeGeneratorResponse::new();
    response.set_supported_features(
        code_generator_response::Feature::FEATURE_PROTO3_OPTIONAL as u64,
    );

    let config = match with_parameter(config, request.parameter()) {
        Ok(config) => config,
        Err(e) => {
            response.set_error(format!("{e:#}"));
            return response;
        }
    };

    for name in &request.file_to_generate {
        match format_one(&request.proto_file, name, &config) {
            Ok(content) => {
                let mut file = code_generator_response::File::new();
                file.set_name(name.clone());
                file.set_content(content);
                response.file.push(file);
            }
            Err(e) => {
                error!("{name}: {e:#}");
                response.file.clear();
                response.set_error(format!("{name}: {e:#}"));
                break;
            }
        }
    }
    response
}

fn with_parameter(config: &Config, parameter: &str) -> Result<Config> {
    let mut config = config.clone();
    for item in parameter.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('=') {
            None if item == "no_verify" => config.verify = false,
            Some(("indent", n)) => {
                config.indent_size = n
                    .parse()
                    .with_context(|| format!("Invalid indent in plugin parameter: {n}"))?;
            }
            _ => bail!("Unknown plugin parameter: {item}"),
        }
    }
    Ok(config)
}

fn format_one(files: &[FileDescriptorProto], name: &str, config: &Config) -> Result<String> {
    debug!("Formatting {name}");
    let options = config.text_options();
    let formatted = format_file(files, name, &options)?;
    if config.verify {
        verify_round_trip(files, name, &formatted, &options)?;
    }
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use protobuf::descriptor::field_descriptor_proto::Label;

    fn request(files: Vec<FileDescriptorProto>, targets: &[&str]) -> CodeGeneratorRequest {
        let mut request = CodeGeneratorRequest::new();
        request.proto_file = files;
        request.file_to_generate = targets.iter().map(|s| s.to_string()).collect();
        request
    }

    #[test]
    fn test_formats_requested_files() {
        let mut a = file("a.proto", Some("demo"));
        a.message_type
            .push(message("A", vec![scalar("id", 1, Label::LABEL_REQUIRED)]));
        let b = file("b.proto", Some("demo"));

        let response = handle_request(&request(vec![a, b], &["a.proto"]), &Config::default());
        assert!(response.error.is_none());
        assert_eq!(response.file.len(), 1);
        assert_eq!(response.file[0].name(), "a.proto");
        assert!(response.file[0]
            .content()
            .contains("message A {\n  required string id = 1;\n}\n"));
    }

    #[test]
    fn test_parameter_overrides_config() {
        let config = with_parameter(&Config::default(), "no_verify, indent=4").unwrap();
        assert!(!config.verify);
        assert_eq!(config.indent_size, 4);
        assert_eq!(with_parameter(&Config::default(), "").unwrap(), Config::default());
        assert!(with_parameter(&Config::default(), "indent=wide").is_err());
        assert!(with_parameter(&Config::default(), "colour").is_err());
    }

    #[test]
    fn test_bad_parameter_sets_error() {
        let mut req = request(vec![file("a.proto", None)], &["a.proto"]);
        req.set_parameter("frobnicate".to_string());

        let response = handle_request(&req, &Config::default());
        assert!(response.error().contains("frobnicate"));
        assert!(response.file.is_empty());
    }

    #[test]
    fn test_unknown_file_sets_error() {
        let a = file("a.proto", None);
        let config = Config {
            verify: false,
            ..Config::default()
        };

        let response = handle_request(&request(vec![a], &["a.proto", "missing.proto"]), &config);
        assert!(response.error().contains("missing.proto"));
        assert!(response.file.is_empty());
    }
}
