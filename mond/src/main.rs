use std::{fs, process};

use clap::Parser;
use log::info;

use bytecode::{load_image, BytecodeDecoder, Constant, ProtoRegistry, Prototype};
use vm::{check_args, RuntimeError, Value, Vm};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input images to execute in order
    #[arg(required = true, help = "The .mbc images to execute")]
    files: Vec<String>,

    /// Print prototypes and bytecode instead of executing
    #[arg(long, help = "Dump prototypes + bytecode for inputs")]
    dump_bytecode: bool,

    /// Fixed result count to request from the entry call (0 keeps all)
    #[arg(long, default_value_t = 0, help = "Requested result count")]
    results: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    for filename in &cli.files {
        let file = match fs::File::open(filename) {
            Ok(file) => file,
            Err(err) => {
                eprintln!("Error opening '{}': {}", filename, err);
                process::exit(1);
            }
        };
        let registry = match load_image(file) {
            Ok(registry) => registry,
            Err(err) => {
                eprintln!("Error loading '{}': {}", filename, err);
                process::exit(1);
            }
        };
        info!("loaded {} with {} prototype(s)", filename, registry.len());

        if cli.dump_bytecode {
            println!("== {} ==", filename);
            dump_registry(&registry);
        } else if let Err(err) = execute_image(registry, cli.results) {
            eprintln!("Error executing '{}': {}", filename, err);
            process::exit(1);
        }
    }
}

/// Run an image's entry prototype (id 0) and print whatever it returns.
fn execute_image(registry: ProtoRegistry, results: usize) -> Result<(), RuntimeError> {
    let mut vm = Vm::new();
    vm.load_protos(registry);
    vm.register_native("print", native_print)?;
    vm.register_native("tostring", native_tostring)?;
    vm.push_closure(0);

    let produced = vm.call(0, results)?;
    let base = vm.stack_len() - produced;
    for i in base..vm.stack_len() {
        if let Some(value) = vm.get(i) {
            println!("{value}");
        }
    }
    Ok(())
}

fn native_print(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    let rendered: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    println!("{}", rendered.join("\t"));
    Ok(vec![])
}

fn native_tostring(args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    check_args(args, 1)?;
    Ok(vec![Value::Str(args[0].to_string().into())])
}

fn dump_registry(registry: &ProtoRegistry) {
    for proto in registry.iter() {
        dump_proto(proto);
    }
}

fn dump_proto(proto: &Prototype) {
    println!(
        "fn{} (params {}, hooks {}, upvalues {})",
        proto.id,
        proto.params,
        proto.hook_max,
        proto.upvalues.len()
    );
    for (i, constant) in proto.constants.iter().enumerate() {
        match constant {
            Constant::Number(n) => println!("  const #{i} = {n}"),
            Constant::Str(s) => println!("  const #{i} = {s:?}"),
        }
    }
    for (i, desc) in proto.upvalues.iter().enumerate() {
        println!(
            "  upval u{i} = fn{} s{} (hook {})",
            desc.owner, desc.slot, desc.hook
        );
    }
    let mut decoder = BytecodeDecoder::new(&proto.code);
    while !decoder.is_at_end() {
        let at = decoder.offset();
        match decoder.decode_next() {
            Some(instr) => println!("  {at:4}  {instr}"),
            None => break,
        }
    }
    println!();
}
