use clap::{Parser, Subcommand};
use std::fs;
use std::process::ExitCode;

use mwasm::gas::{Gas, GasMeter, Unmetered};
use mwasm::parser;
use mwasm::parser::module::ExternalKind;
use mwasm::parser::types::ValueType;
use mwasm::runtime::{Registry, Value};

#[derive(Parser)]
#[command(name = "mwasm")]
#[command(about = "Gas-metered WebAssembly runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instantiate a module and invoke an exported function
    Run {
        /// Path to the WebAssembly module
        file: String,

        /// Name of the exported function to invoke
        #[arg(long)]
        invoke: String,

        /// Gas budget; omit to run unmetered
        #[arg(long)]
        gas: Option<i64>,

        /// Scalar arguments for the function (after --)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Print a section summary of a module
    Dump {
        /// Path to the WebAssembly module
        file: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            invoke,
            gas,
            args,
        } => run_module(&file, &invoke, gas, args),
        Commands::Dump { file } => dump_module(&file),
    }
}

fn run_module(file: &str, invoke: &str, gas: Option<i64>, raw_args: Vec<String>) -> ExitCode {
    let bytes = match fs::read(file) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error reading {}: {}", file, e);
            return ExitCode::FAILURE;
        }
    };

    let meter: Box<dyn GasMeter> = match gas {
        Some(limit) => Box::new(Gas::new(limit)),
        None => Box::new(Unmetered),
    };

    let registry = Registry::new();
    let mut vm = match registry.instantiate(bytes, meter) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("Error instantiating {}: {} ({})", file, e, e.kind());
            return ExitCode::FAILURE;
        }
    };

    let args = {
        let export = match vm.instance().export(invoke) {
            Some(export) if export.kind == ExternalKind::Function => *export,
            _ => {
                eprintln!("Error: module does not export function {}", invoke);
                return ExitCode::FAILURE;
            }
        };
        let func_type = match vm.instance().functions.get(export.index as usize) {
            Some(func) => func.func_type().clone(),
            None => {
                eprintln!("Error: export {} references a missing function", invoke);
                return ExitCode::FAILURE;
            }
        };
        if raw_args.len() != func_type.parameters.len() {
            eprintln!(
                "Error: {} takes {} arguments, got {}",
                invoke,
                func_type.parameters.len(),
                raw_args.len()
            );
            return ExitCode::FAILURE;
        }
        let mut args = Vec::with_capacity(raw_args.len());
        for (raw, value_type) in raw_args.iter().zip(&func_type.parameters) {
            match parse_arg(*value_type, raw) {
                Ok(value) => args.push(value),
                Err(e) => {
                    eprintln!("Error parsing argument {:?}: {}", raw, e);
                    return ExitCode::FAILURE;
                }
            }
        }
        args
    };

    match vm.invoke(invoke, &args) {
        Ok(results) => {
            for value in results {
                println!("{}", value);
            }
            ExitCode::SUCCESS
        }
        Err(trap) => {
            eprintln!("Trap: {} ({})", trap, trap.kind());
            ExitCode::FAILURE
        }
    }
}

fn parse_arg(value_type: ValueType, raw: &str) -> Result<Value, String> {
    match value_type {
        ValueType::I32 => raw
            .parse::<i32>()
            .or_else(|_| raw.parse::<u32>().map(|v| v as i32))
            .map(Value::I32)
            .map_err(|e| e.to_string()),
        ValueType::I64 => raw
            .parse::<i64>()
            .or_else(|_| raw.parse::<u64>().map(|v| v as i64))
            .map(Value::I64)
            .map_err(|e| e.to_string()),
        ValueType::F32 => raw.parse::<f32>().map(Value::F32).map_err(|e| e.to_string()),
        ValueType::F64 => raw.parse::<f64>().map(Value::F64).map_err(|e| e.to_string()),
    }
}

fn dump_module(file: &str) -> ExitCode {
    let bytes = match fs::read(file) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error reading {}: {}", file, e);
            return ExitCode::FAILURE;
        }
    };

    let module = match parser::decode(bytes, &mut Unmetered) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error parsing {}: {} ({})", file, e, e.kind());
            return ExitCode::FAILURE;
        }
    };

    println!("magic:    0x{:08x}", module.magic);
    println!("version:  {}", module.version);
    println!("types:    {}", module.types.len());
    for (i, t) in module.types.iter().enumerate() {
        println!("  type[{}] {}", i, t);
    }
    println!("imports:  {}", module.imports.len());
    for import in &module.imports {
        println!("  {}", import);
    }
    println!("funcs:    {}", module.functions.len());
    println!("tables:   {}", module.tables.len());
    println!("memories: {}", module.memories.len());
    println!("globals:  {}", module.globals.len());
    println!("exports:  {}", module.exports.len());
    let mut exports: Vec<_> = module.exports.iter().collect();
    exports.sort_by_key(|(name, _)| name.as_str());
    for (name, export) in exports {
        println!("  {}[{}] <{}>", export.kind, export.index, name);
    }
    if let Some(start) = module.start {
        println!("start:    {}", start);
    }
    println!("elements: {}", module.elements.len());
    println!("code:     {}", module.code.len());
    println!("data:     {}", module.data.len());

    ExitCode::SUCCESS
}
