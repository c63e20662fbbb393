mod debug_report;

use bh::{Engine, Node, RenderFlags};
use serde_json::Value;
use std::io::{self, IsTerminal, Read};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("BH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let mut engine = Engine::new();
    if let Some(patch) = &config.options {
        if let Err(err) = engine.set_options(patch) {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    }
    let mut options = engine.options().clone();
    if config.no_escape {
        options.set(RenderFlags::ESCAPE_TEXT, false);
    }
    if config.detect_loops {
        options.set(RenderFlags::CYCLE_DETECTION, true);
    }
    engine.configure(options);

    let tree: Node = match serde_json::from_str(&config.input) {
        Ok(tree) => tree,
        Err(err) => {
            eprintln!("error: invalid BEMJSON: {err}");
            std::process::exit(2);
        }
    };

    match engine.render_verbose(tree) {
        Ok(report) => {
            println!("{}", report.html);
            if config.verbose {
                debug_report::print_run(&engine, &report.metrics, config.color);
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

struct CliConfig {
    input: String,
    options: Option<Value>,
    no_escape: bool,
    detect_loops: bool,
    verbose: bool,
    color: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut input: Option<String> = None;
    let mut options: Option<Value> = None;
    let mut no_escape = false;
    let mut detect_loops = false;
    let mut verbose = false;
    let mut color = io::stderr().is_terminal();
    let mut args = std::env::args().skip(1);

    let mut set_input = |value: String| {
        if input.is_some() {
            return Err("error: input provided multiple times".to_string());
        }
        input = Some(value);
        Ok(())
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("bh {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "--no-escape" => no_escape = true,
            "--detect-loops" => detect_loops = true,
            "-v" | "--verbose" => verbose = true,
            "--options" => {
                let value = args.next().ok_or_else(|| "error: --options expects a value".to_string())?;
                options = Some(parse_options(&value)?);
            }
            "--input" | "-i" => {
                let value = args.next().ok_or_else(|| "error: --input expects a value".to_string())?;
                set_input(value)?;
            }
            "-" => set_input(read_stdin_input()?)?,
            _ if arg.starts_with("--options=") => {
                options = Some(parse_options(arg.trim_start_matches("--options="))?);
            }
            _ if arg.starts_with("--input=") => {
                set_input(arg.trim_start_matches("--input=").to_string())?;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            path => {
                let text =
                    std::fs::read_to_string(path).map_err(|err| format!("error: failed to read '{path}': {err}"))?;
                set_input(text)?;
            }
        }
    }

    let input = match input {
        Some(value) => value,
        None => read_stdin_input()?,
    };

    if input.trim().is_empty() {
        return Err(format!("error: no input provided\n\n{}", help_text()));
    }

    Ok(CliConfig { input, options, no_escape, detect_loops, verbose, color })
}

fn parse_options(value: &str) -> Result<Value, String> {
    let parsed: Value = serde_json::from_str(value).map_err(|err| format!("error: invalid --options: {err}"))?;
    if !parsed.is_object() {
        return Err("error: --options expects a JSON object".to_string());
    }
    Ok(parsed)
}

fn read_stdin_input() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|err| format!("error: failed to read stdin: {err}"))?;
    Ok(buffer)
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "bh {version}

Render BEMJSON to HTML.

Usage:
  bh [OPTIONS] <file.json>
  bh [OPTIONS] --input <bemjson>
  bh [OPTIONS] < file.json

Options:
  -i, --input <bemjson>      BEMJSON text to render. If omitted, reads the file
                             argument, or stdin when none is given (or '-').
  --options <json>           Options object, e.g. '{{\"jsAttrName\":\"data-bem\"}}'.
  --no-escape                Emit text content without escaping.
  --detect-loops             Abort runaway expansions.
  -v, --verbose              Print expansion metrics to stderr.
  --color                    Force ANSI color in the metrics report.
  --no-color                 Disable ANSI color in the metrics report.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  BH_LOG                     Log filter (e.g. 'bh=debug', 'bh=trace').

Exit codes:
  0  Success.
  1  Render error (loop detected).
  2  Invalid arguments, options or input.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}
