use std::io::Read;
use std::process::ExitCode;

use valet::{tokenize, Manager, ManagerOptions, ValetError};

const EXIT_MATCHED: u8 = 0;
const EXIT_NO_MATCH: u8 = 1;
const EXIT_LOAD_ERROR: u8 = 2;
const EXIT_RUN_ERROR: u8 = 3;

fn main() -> ExitCode {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_LOAD_ERROR);
        }
    };

    let mut mgr = Manager::new(ManagerOptions { verbose_imports: config.verbose, ..ManagerOptions::default() });
    if let Err(err) = mgr.parse_file(&config.rules) {
        eprintln!("error: {err}");
        return ExitCode::from(EXIT_LOAD_ERROR);
    }

    let text = match read_input(&config) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_LOAD_ERROR);
        }
    };
    let seq = tokenize(&text);

    let stream = if config.frames { mgr.frames(&config.pattern, &seq) } else { mgr.apply(&config.pattern, &seq) };
    let matches: Vec<_> = match stream {
        Ok(stream) => stream.collect(),
        Err(err) => {
            eprintln!("error: {err}");
            let code = match err {
                ValetError::Parse { .. } | ValetError::Io { .. } => EXIT_LOAD_ERROR,
                _ => EXIT_RUN_ERROR,
            };
            return ExitCode::from(code);
        }
    };

    for m in &matches {
        let (begin, end) = m.extent();
        if config.frames {
            println!("[{begin},{end}) {}", m.matching_text());
            for (field, values) in &m.fields {
                for v in values {
                    println!("  {field} = {}", v.matching_text());
                }
            }
        } else {
            println!("[{begin},{end}) {}", m.matching_text());
        }
    }

    if matches.is_empty() {
        ExitCode::from(EXIT_NO_MATCH)
    } else {
        ExitCode::from(EXIT_MATCHED)
    }
}

struct CliConfig {
    rules: String,
    pattern: String,
    input: Option<String>,
    file: Option<String>,
    frames: bool,
    verbose: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut input = None;
    let mut file = None;
    let mut frames = false;
    let mut verbose = false;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("valet {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--frames" => frames = true,
            "--verbose" => verbose = true,
            "--input" | "-i" => {
                let value = args.next().ok_or_else(|| "error: --input expects a value".to_string())?;
                input = Some(value);
            }
            "--file" | "-f" => {
                let value = args.next().ok_or_else(|| "error: --file expects a value".to_string())?;
                file = Some(value);
            }
            _ if arg.starts_with("--input=") => input = Some(arg.trim_start_matches("--input=").to_string()),
            _ if arg.starts_with("--file=") => file = Some(arg.trim_start_matches("--file=").to_string()),
            _ if arg.starts_with('-') => return Err(format!("error: unknown option '{arg}'")),
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        return Err("usage: valet <rules-file> <pattern> [--input TEXT | --file PATH] [--frames]".to_string());
    }
    let pattern = positional.pop().unwrap();
    let rules = positional.pop().unwrap();
    if input.is_some() && file.is_some() {
        return Err("error: --input and --file are mutually exclusive".to_string());
    }
    Ok(CliConfig { rules, pattern, input, file, frames, verbose })
}

fn read_input(config: &CliConfig) -> Result<String, String> {
    if let Some(text) = &config.input {
        return Ok(text.clone());
    }
    if let Some(path) = &config.file {
        return std::fs::read_to_string(path).map_err(|e| format!("error: cannot read '{path}': {e}"));
    }
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text).map_err(|e| format!("error: cannot read stdin: {e}"))?;
    Ok(text)
}

fn print_help() {
    println!(
        "valet - apply a rule-file extractor to text\n\
         \n\
         Usage: valet <rules-file> <pattern> [options]\n\
         \n\
         Options:\n\
           -i, --input TEXT   text to match against (default: stdin)\n\
           -f, --file PATH    file with the text to match against\n\
               --frames       treat <pattern> as a frame extractor\n\
               --verbose      trace import resolution\n\
           -h, --help         show this help\n\
           -V, --version      show version\n\
         \n\
         Exit codes: 0 matched, 1 no matches, 2 load error, 3 runtime error"
    );
}
