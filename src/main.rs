//! Purpose: `pickleframe` CLI entry point.
//! Role: Binary crate root; reads one framed record from a file and prints it as JSON
//! (or graphite text lines) on stdout.
//! Invariants: Output is fully rendered before the first byte reaches stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use pickleframe::api::{
    self, Converter, DecodeLimits, DecodedValue, Error, ErrorKind, FRAME_HEADER_LEN, to_exit_code,
};
use pickleframe::graphite::{Batch, metrics_from_value};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

#[derive(Parser)]
#[command(
    name = "pickleframe",
    version,
    about = "Decode a length-prefixed pickle record into JSON",
    long_about = None,
    before_help = r#"The file starts with a 4-byte big-endian length followed by that many bytes
of pickle payload. Bytes after the record are ignored."#,
    after_help = r#"EXAMPLES
  $ pickleframe record.bin
  $ pickleframe --pretty record.bin
  $ pickleframe --format graphite batch.bin
  $ RUST_LOG=debug pickleframe record.bin

EXIT CODES
  0 ok, 2 usage, 3 file access, 4 truncated header, 5 truncated payload,
  6 malformed payload, 7 unsupported type, 8 output i/o, 1 internal"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(help = "File holding one framed record", value_hint = ValueHint::FilePath)]
    path: PathBuf,
    #[arg(long, help = "Pretty-print JSON output")]
    pretty: bool,
    #[arg(
        long,
        default_value = "json",
        value_enum,
        help = "Output format: json|graphite"
    )]
    format: OutputFormat,
    #[arg(long, help = "Render set and frozenset values as JSON arrays")]
    sets_as_arrays: bool,
    #[arg(long, value_name = "N", help = "Deepest container nesting accepted (default: 512)")]
    max_depth: Option<usize>,
    #[arg(long, value_name = "N", help = "Most values accepted after expanding shared references")]
    max_nodes: Option<usize>,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Graphite,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `pickleframe --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    let output = read_input(&cli.path)
        .and_then(|buf| render(&cli, &buf))
        .map_err(|err| (add_hint(err), color_mode))?;
    write_stdout(&output).map_err(|err| (err, color_mode))?;
    Ok(RunOutcome::ok())
}

fn converter_for(cli: &Cli) -> Converter {
    let defaults = DecodeLimits::default();
    let limits = DecodeLimits {
        max_depth: cli.max_depth.unwrap_or(defaults.max_depth),
        max_nodes: cli.max_nodes.unwrap_or(defaults.max_nodes),
        ..defaults
    };
    let converter = Converter::new().with_limits(limits);
    if cli.sets_as_arrays {
        converter.with_sets_as_arrays()
    } else {
        converter
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>, Error> {
    let metadata = fs::metadata(path).map_err(|err| file_access_error(path, err))?;
    if metadata.is_dir() {
        return Err(Error::new(ErrorKind::FileAccess)
            .with_message("path is a directory")
            .with_path(path));
    }
    let buf = fs::read(path).map_err(|err| file_access_error(path, err))?;
    debug!(path = %path.display(), bytes = buf.len(), "read input");
    Ok(buf)
}

fn file_access_error(path: &Path, err: io::Error) -> Error {
    let message = match err.kind() {
        io::ErrorKind::NotFound => "file not found",
        io::ErrorKind::PermissionDenied => "permission denied",
        _ => "failed to read file",
    };
    Error::new(ErrorKind::FileAccess)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

fn render(cli: &Cli, buf: &[u8]) -> Result<String, Error> {
    let converter = converter_for(cli);
    let value = api::decode_buffer(buf, &converter)?;
    match cli.format {
        OutputFormat::Json => render_json(&converter, &value, cli.pretty),
        OutputFormat::Graphite => Ok(metrics_from_value(&value)?
            .into_iter()
            .collect::<Batch>()
            .to_text()),
    }
}

fn render_json(converter: &Converter, value: &DecodedValue, pretty: bool) -> Result<String, Error> {
    let json = converter.to_json_value(value)?;
    let mut text = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    }
    .map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    text.push('\n');
    Ok(text)
}

fn write_stdout(output: &str) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(output.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write output")
                .with_source(err)
        })
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::FileAccess => err.with_hint("Check the path and its read permissions."),
        ErrorKind::TruncatedHeader => err.with_hint(format!(
            "A record needs at least {FRAME_HEADER_LEN} bytes of big-endian length header."
        )),
        ErrorKind::TruncatedPayload => {
            err.with_hint("The file ends before the length in its header says it should.")
        }
        ErrorKind::MalformedPayload => {
            err.with_hint("The payload is not a pickle stream this tool understands.")
        }
        ErrorKind::UnsupportedType => {
            err.with_hint("The record holds a value with no JSON form; see the message for which.")
        }
        _ => err,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::FileAccess => "cannot read input file".to_string(),
        ErrorKind::TruncatedHeader => "truncated frame header".to_string(),
        ErrorKind::TruncatedPayload => "truncated frame payload".to_string(),
        ErrorKind::MalformedPayload => "malformed pickle payload".to_string(),
        ErrorKind::UnsupportedType => "unsupported value type".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!(
            "{} {offset}",
            colorize_label("offset:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, add_hint, error_json, error_text};
    use serde_json::json;

    #[test]
    fn error_json_carries_offset_and_hint() {
        let err = add_hint(
            Error::new(ErrorKind::MalformedPayload)
                .with_message("unknown opcode 0xff")
                .with_offset(6),
        );
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], json!("MalformedPayload"));
        assert_eq!(value["error"]["message"], json!("unknown opcode 0xff"));
        assert_eq!(value["error"]["offset"], json!(6));
        assert!(value["error"]["hint"].is_string());
        assert!(value["error"].get("path").is_none());
    }

    #[test]
    fn error_json_lists_causes() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::new(ErrorKind::FileAccess)
            .with_path("/tmp/missing.bin")
            .with_source(io_err);
        let value = error_json(&err);
        assert_eq!(value["error"]["message"], json!("cannot read input file"));
        assert_eq!(value["error"]["path"], json!("/tmp/missing.bin"));
        assert_eq!(value["error"]["causes"], json!(["gone"]));
    }

    #[test]
    fn error_text_respects_color_flag() {
        let err = Error::new(ErrorKind::TruncatedHeader)
            .with_message("need 4 header bytes, found 2")
            .with_offset(2);
        let plain = error_text(&err, false);
        assert_eq!(plain, "error: need 4 header bytes, found 2\noffset: 2");
        let colored = error_text(&err, true);
        assert!(colored.contains("\u{1b}[31merror:\u{1b}[0m"));
    }

    #[test]
    fn existing_hints_are_kept() {
        let err = add_hint(Error::new(ErrorKind::UnsupportedType).with_hint("custom"));
        assert_eq!(err.hint(), Some("custom"));
        let err = add_hint(Error::new(ErrorKind::Io));
        assert_eq!(err.hint(), None);
    }
}
