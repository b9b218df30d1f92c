use clap::{Parser, Subcommand, ValueEnum};
use constdb::{ConstDb, ConstDbBuilder, ConstDbInfo, Width};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Info(args) => run_info(args),
        Command::Convert(args) => run_convert(args),
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "constdb utility for creating and inspecting constant database files",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect a database file and print basic information
    Info(InfoArgs),
    /// Convert a JSON key-value file into a database file
    Convert(ConvertArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum WidthArg {
    /// Classic 4-byte offsets, files below 4 GiB
    #[value(name = "32")]
    W32,
    /// 8-byte offsets
    #[value(name = "64")]
    W64,
}

#[derive(clap::Args)]
struct InfoArgs {
    /// Path to the database file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional key to look up; every stored value is printed
    #[arg(short, long)]
    key: Option<String>,

    /// Integer width the file was written with
    #[arg(long, value_enum, default_value = "64")]
    width: WidthArg,
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// Path to the source JSON file: an object, or an array of
    /// {"key": .., "value": ..} objects or [key, value] pairs
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Path of the database file to produce
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Integer width of the produced file
    #[arg(long, value_enum, default_value = "64")]
    width: WidthArg,
}

fn run_info(args: InfoArgs) -> Result<()> {
    match args.width {
        WidthArg::W32 => info::<u32>(&args.input, args.key.as_deref()),
        WidthArg::W64 => info::<u64>(&args.input, args.key.as_deref()),
    }
}

fn info<W: Width>(input: &Path, key: Option<&str>) -> Result<()> {
    let file = File::open(input)?;
    let db = ConstDb::<W, _>::load(file).map_err(Error::other)?;
    print_info(&db.info())?;

    if let Some(key) = key {
        let values = db
            .get_all(key.as_bytes())
            .collect::<constdb::Result<Vec<_>>>()
            .map_err(Error::other)?;
        if values.is_empty() {
            println!("{key}: not found");
        }
        for value in values {
            println!("{key}: {}", String::from_utf8_lossy(&value));
        }
    }

    Ok(())
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    let entries = load_entries_from_json(&args.input)?;
    let file = File::create(&args.output)?;

    let info = match args.width {
        WidthArg::W32 => ConstDbBuilder::<u32, _>::build(&file, entries),
        WidthArg::W64 => ConstDbBuilder::<u64, _>::build(&file, entries),
    }
    .map_err(Error::other)?;
    print_info(&info)
}

fn print_info(info: &ConstDbInfo) -> Result<()> {
    let json = serde_json::to_string_pretty(info)
        .map_err(|e| Error::other(format!("Failed to format JSON: {e}")))?;
    println!("{json}");
    Ok(())
}

fn load_entries_from_json(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let value: Value = serde_json::from_reader(reader)
        .map_err(|e| invalid_json(format!("Failed to parse JSON input: {e}")))?;
    extract_entries(value)
}

fn extract_entries(value: Value) -> Result<Vec<(String, Vec<u8>)>> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| (key, value_bytes(value)))
            .collect()),
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(mut obj) => {
                        let key = obj.remove("key").ok_or_else(|| {
                            invalid_json(format!("entry {index} missing 'key' field"))
                        })?;
                        let value = obj.remove("value").ok_or_else(|| {
                            invalid_json(format!("entry {index} missing 'value' field"))
                        })?;
                        entries.push((expect_string(key, index)?, value_bytes(value)));
                    }
                    Value::Array(mut pair) => {
                        if pair.len() != 2 {
                            return Err(invalid_json(format!(
                                "entry {index} expected array of length 2"
                            )));
                        }
                        let value = pair.pop().unwrap();
                        let key = pair.pop().unwrap();
                        entries.push((expect_string(key, index)?, value_bytes(value)));
                    }
                    other => {
                        return Err(invalid_json(format!(
                            "unsupported entry format at index {index}: {other}"
                        )));
                    }
                }
            }
            Ok(entries)
        }
        other => Err(invalid_json(format!(
            "unsupported JSON top-level type: {other}"
        ))),
    }
}

/// String values are stored as their raw bytes; anything else is stored as
/// its compact JSON text.
fn value_bytes(value: Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

fn expect_string(value: Value, index: usize) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(invalid_json(format!(
            "entry {index} expects string key, found {other}"
        ))),
    }
}

fn invalid_json(message: String) -> Error {
    Error::new(ErrorKind::InvalidData, message)
}
