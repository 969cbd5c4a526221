//! Quartz CLI Tool
//!
//! A standalone command-line tool for running and inspecting
//! QuartzScript with the same engine the platform embeds.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Instant;

use quartz::script::stack::Attribute;
use quartz::script::ATTR_NAME;
use quartz::{FunctionLibrary, MemoryStack, StackConfig};

#[derive(Debug, Clone)]
struct CliConfig {
    max_ops: u64,
    max_depth: usize,
    verbose: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_ops: quartz::config::DEFAULT_MAX_OPS,
            max_depth: quartz::config::DEFAULT_MAX_DEPTH,
            verbose: false,
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut config = CliConfig::default();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-f" | "--file" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --file requires a filename");
                    std::process::exit(1);
                }
                let filename = &args[i + 1];
                match fs::read_to_string(filename) {
                    Ok(script) => execute_script(&script, &config),
                    Err(e) => {
                        eprintln!("Error reading file {}: {}", filename, e);
                        std::process::exit(1);
                    }
                }
                i += 2;
            }
            "-e" | "--eval" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --eval requires a script");
                    std::process::exit(1);
                }
                execute_script(&args[i + 1], &config);
                i += 2;
            }
            "-i" | "--interactive" => {
                start_repl(&config);
                i += 1;
            }
            "-v" | "--verbose" => {
                config.verbose = true;
                i += 1;
            }
            "--max-ops" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --max-ops requires a count");
                    std::process::exit(1);
                }
                match args[i + 1].parse::<u64>() {
                    Ok(count) => config.max_ops = count,
                    Err(_) => {
                        eprintln!("Error: Invalid op count: {}", args[i + 1]);
                        std::process::exit(1);
                    }
                }
                i += 2;
            }
            "--max-depth" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --max-depth requires a count");
                    std::process::exit(1);
                }
                match args[i + 1].parse::<usize>() {
                    Ok(depth) => config.max_depth = depth,
                    Err(_) => {
                        eprintln!("Error: Invalid depth: {}", args[i + 1]);
                        std::process::exit(1);
                    }
                }
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Error: Unknown option: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
    }
}

fn new_stack(config: &CliConfig) -> MemoryStack {
    let mut stack_config = StackConfig::default();
    stack_config.max_ops = config.max_ops;
    stack_config.max_depth = config.max_depth;
    let mut stack = MemoryStack::new(
        None,
        None,
        &stack_config,
        Arc::new(FunctionLibrary::with_core()),
    );
    let _ = stack.set_attribute(ATTR_NAME, Some(Attribute::Str("quartz-cli".to_string())));
    stack
}

fn execute_script(script: &str, config: &CliConfig) {
    let mut stack = new_stack(config);

    if config.verbose {
        println!("Max ops: {}", config.max_ops);
        println!("Max depth: {}", config.max_depth);
        println!("--- Execution ---");
    }

    let start = Instant::now();
    let result = stack.exec_all(script).and_then(|()| stack.check_balanced());
    let elapsed = start.elapsed();

    if config.verbose {
        println!("Execution time: {:?}", elapsed);
        println!("Operations: {}", stack.current_ops());
    }

    match result {
        Ok(()) => {
            print!("{}", stack.dump(stack.depth()));
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn start_repl(config: &CliConfig) {
    println!("Quartz CLI - Interactive Mode");
    println!("Type 'exit' or 'quit' to exit, 'help' for commands");

    let mut stack = new_stack(config);
    let stdin = io::stdin();

    loop {
        print!("quartz> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {
                let line = input.trim_end_matches(['\n', '\r']);

                match line.trim() {
                    "exit" | "quit" => break,
                    "help" => {
                        print_repl_help();
                        continue;
                    }
                    "reset" => {
                        stack = new_stack(config);
                        println!("Stack reset");
                        continue;
                    }
                    "" => continue,
                    _ => match stack.exec_line(line) {
                        Ok(()) => {
                            print!("{}", stack.dump(stack.depth()));
                        }
                        Err(e) => {
                            eprintln!("Error: {}", e);
                        }
                    },
                }
            }
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }

    println!("Goodbye!");
}

fn print_repl_help() {
    println!("REPL Commands:");
    println!("  help                 Show this help");
    println!("  exit, quit           Exit the REPL");
    println!("  reset                Discard the stack and start fresh");
    println!("  <script>             Execute a line of QuartzScript");
    println!();
    println!("The stack persists between lines; multi-line constructs");
    println!("(<% %>, <' '>, /* */) may span several inputs.");
}

fn print_usage() {
    let program = env::args()
        .next()
        .unwrap_or_else(|| "quartz_cli".to_string());
    println!("Quartz CLI Tool");
    println!("Usage: {} [options]", program);
    println!();
    println!("Options:");
    println!("  -f, --file <file>       Execute a script from a file");
    println!("  -e, --eval <script>     Execute a script from the command line");
    println!("  -i, --interactive       Start interactive REPL mode");
    println!("  -v, --verbose           Verbose output");
    println!("  --max-ops <count>       Operation budget (default: {})", quartz::config::DEFAULT_MAX_OPS);
    println!("  --max-depth <count>     Stack depth limit (default: {})", quartz::config::DEFAULT_MAX_DEPTH);
    println!("  -h, --help              Show this help message");
    println!();
    println!("Examples:");
    println!("  {} -e \"1 2 +\"", program);
    println!("  {} -f script.qs -v", program);
    println!("  {} -i", program);
}
