//! protofmt CLI: format proto files, run as a protoc plugin, inspect comments

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use protobuf::plugin::CodeGeneratorRequest;
use protobuf::Message;
use protofmt::comments::CommentMap;
use protofmt::header::{apply_header, has_body_comments, read_file_header};
use protofmt::{format_file, parse_proto_files, plugin, verify_round_trip, Config};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "protofmt")]
#[command(about = "Comment-preserving formatter for proto files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Format proto file(s)
    /// - Default: print the formatted files to stdout
    /// - --write: rewrite files in place
    /// - --check: fail if any file is not formatted
    Format {
        /// Input proto files
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Import search path (defaults to each file's directory)
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        includes: Vec<PathBuf>,

        /// Rewrite files in place
        #[arg(short, long, conflicts_with = "check")]
        write: bool,

        /// Exit with an error if any file would change
        #[arg(long)]
        check: bool,

        /// Skip re-parsing the formatted output
        #[arg(long)]
        no_verify: bool,

        /// Parse with protoc instead of the built-in parser (keeps comments)
        #[arg(long)]
        protoc: bool,

        /// JSON config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Run as a protoc plugin (CodeGeneratorRequest on stdin)
    Plugin {
        /// JSON config file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the comment locations recorded for a proto file
    Inspect {
        /// Proto file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Import search path (defaults to the file's directory)
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        includes: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    // 执行命令
    if let Err(e) = run(cli) {
        error!("执行失败: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Format {
            files,
            includes,
            write,
            check,
            no_verify,
            protoc,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if no_verify {
                config.verify = false;
            }
            let mode = if check {
                Mode::Check
            } else if write {
                Mode::Write
            } else {
                Mode::Print
            };
            format_files(&files, &includes, protoc, &config, mode)
        }
        Commands::Plugin { config } => run_plugin(&load_config(config.as_deref())?),
        Commands::Inspect { file, includes } => inspect_file(&file, &includes),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Print,
    Write,
    Check,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            debug!("读取配置文件: {}", path.display());
            Config::load(path)
        }
        None => Ok(Config::default()),
    }
}

/// 格式化文件
fn format_files(
    files: &[PathBuf],
    includes: &[PathBuf],
    protoc: bool,
    config: &Config,
    mode: Mode,
) -> Result<()> {
    if !protoc {
        debug!("使用内置解析器, 注释不会保留 (使用 --protoc 保留注释)");
    }

    info!("解析 {} 个 proto 文件", files.len());
    let parsed = parse_proto_files(files, includes, protoc).context("解析 proto 文件失败")?;
    let options = config.text_options();

    let mut unformatted = Vec::new();
    for (path, name) in files.iter().zip(&parsed.names) {
        debug!("格式化: {name}");
        let source = fs::read_to_string(path)
            .with_context(|| format!("读取文件失败: {}", path.display()))?;

        let recorded_comments = parsed
            .files
            .iter()
            .find(|f| f.name() == *name)
            .is_some_and(|f| f.source_code_info.is_some());
        if !recorded_comments && has_body_comments(&source) {
            bail!(
                "{} 含有注释, 但内置解析器不记录注释, 格式化会丢失它们 (使用 --protoc 保留注释)",
                path.display()
            );
        }

        let mut formatted = format_file(&parsed.files, name, &options)
            .with_context(|| format!("格式化失败: {name}"))?;
        if config.verify {
            verify_round_trip(&parsed.files, name, &formatted, &options)
                .with_context(|| format!("校验失败: {name}"))?;
        }
        if config.preserve_header {
            formatted = apply_header(&read_file_header(&source), &formatted);
        }

        match mode {
            Mode::Print => print!("{formatted}"),
            Mode::Write => {
                if formatted == source {
                    debug!("无需修改: {}", path.display());
                } else {
                    info!("写入文件: {}", path.display());
                    fs::write(path, &formatted)
                        .with_context(|| format!("写入文件失败: {}", path.display()))?;
                }
            }
            Mode::Check => {
                if formatted != source {
                    warn!("未格式化: {}", path.display());
                    unformatted.push(path);
                }
            }
        }
    }

    if !unformatted.is_empty() {
        bail!("{} 个文件需要格式化", unformatted.len());
    }
    Ok(())
}

/// 作为 protoc 插件运行
fn run_plugin(config: &Config) -> Result<()> {
    let mut stdin = std::io::stdin().lock();
    let request =
        CodeGeneratorRequest::parse_from_reader(&mut stdin).context("读取 CodeGeneratorRequest 失败")?;
    debug!("收到 {} 个待生成文件", request.file_to_generate.len());

    let response = plugin::handle_request(&request, config);

    let mut stdout = std::io::stdout().lock();
    response
        .write_to_writer(&mut stdout)
        .context("写入 CodeGeneratorResponse 失败")?;
    stdout.flush().context("写入 CodeGeneratorResponse 失败")?;
    Ok(())
}

/// 查看文件注释位置
fn inspect_file(file: &Path, includes: &[PathBuf]) -> Result<()> {
    info!("读取文件: {}", file.display());
    let parsed = parse_proto_files(&[file.to_path_buf()], includes, true)
        .context("解析 proto 文件失败")?;

    let name = parsed.names.first().context("解析结果为空")?;
    let descriptor = parsed
        .files
        .iter()
        .find(|f| f.name() == *name)
        .with_context(|| format!("找不到文件 descriptor: {name}"))?;

    let comments = descriptor
        .source_code_info
        .as_ref()
        .map(CommentMap::from_source_info)
        .unwrap_or_default();

    debug!("输出 {} 个注释位置", comments.len());
    for (path, entry) in comments.iter() {
        println!("[{path}]");
        if let Some(leading) = &entry.leading {
            println!("  leading: {leading:?}");
        }
        if let Some(trailing) = &entry.trailing {
            println!("  trailing: {trailing:?}");
        }
    }
    if comments.detached_count() > 0 {
        println!("detached: {}", comments.detached_count());
    }
    Ok(())
}
