//! ZPLC Compiler CLI
//!
//! Command-line interface for building projects, compiling single sources,
//! and inspecting container images.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use zplc_core::image;

#[derive(ClapParser)]
#[command(name = "zplcc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "ZPLC compiler - build IEC 61131-3 projects into runtime images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a project directory (zplc.json + sources) into a container image
    Build {
        /// Project directory containing zplc.json
        #[arg(default_value = ".")]
        project: PathBuf,

        /// Output image path (defaults to <name>.zplc in the project directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write each program's assembly listing next to the image
        #[arg(long)]
        keep_asm: bool,
    },

    /// Compile a single Structured Text file
    Compile {
        /// Input .st source file
        input: PathBuf,

        /// Output path (defaults to the input with a .zplc extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit the assembly listing instead of a container image
        #[arg(long)]
        emit_asm: bool,
    },

    /// Disassemble a container image's code segment
    Disasm {
        /// Container image (.zplc)
        input: PathBuf,
    },

    /// Show a container image's header and task table
    Inspect {
        /// Container image (.zplc)
        input: PathBuf,

        /// Also disassemble the code segment
        #[arg(long)]
        disasm: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { project, output, keep_asm } => run_build(&project, output, keep_asm),
        Commands::Compile { input, output, emit_asm } => run_compile(&input, output, emit_asm),
        Commands::Disasm { input } => run_disasm(&input),
        Commands::Inspect { input, disasm } => run_inspect(&input, disasm),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "zplcc", &mut io::stdout());
}

fn run_build(project: &Path, output: Option<PathBuf>, keep_asm: bool) {
    let descriptor_text = match fs::read_to_string(project.join("zplc.json")) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading zplc.json: {}", e);
            process::exit(1);
        }
    };
    let name = zplc_compiler::ProjectDescriptor::from_json(&descriptor_text)
        .map(|d| d.name)
        .unwrap_or_else(|_| "project".to_string());

    let result = match zplc_compiler::build_project_dir(project) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let output = output.unwrap_or_else(|| project.join(format!("{}.zplc", name)));
    if let Err(e) = image::write_file(&output, &result.image) {
        eprintln!("Error writing {}: {}", output.display(), e);
        process::exit(1);
    }

    println!(
        "Built {} -> {} ({} bytes of code, {} task(s))",
        project.display(),
        output.display(),
        result.image.code.len(),
        result.image.tasks.len()
    );
    for program in &result.programs {
        println!(
            "  {} @ 0x{:04X} ({} bytes)",
            program.name, program.entry_point, program.size
        );
        if keep_asm {
            let listing = output.with_file_name(format!("{}.asm", program.name));
            if let Err(e) = fs::write(&listing, &program.assembly) {
                eprintln!("Warning: could not write {}: {}", listing.display(), e);
            }
        }
    }
}

fn run_compile(input: &Path, output: Option<PathBuf>, emit_asm: bool) {
    let source = match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        }
    };

    if emit_asm {
        let program = match zplc_compiler::compile_source(&source) {
            Ok(program) => program,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        };
        let output = output.unwrap_or_else(|| input.with_extension("asm"));
        if let Err(e) = fs::write(&output, &program.assembly) {
            eprintln!("Error writing {}: {}", output.display(), e);
            process::exit(1);
        }
        println!("Compiled {} -> {}", input.display(), output.display());
        return;
    }

    let container = match zplc_compiler::compile_source_to_image(&source) {
        Ok(container) => container,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let output = output.unwrap_or_else(|| input.with_extension("zplc"));
    if let Err(e) = image::write_file(&output, &container) {
        eprintln!("Error writing {}: {}", output.display(), e);
        process::exit(1);
    }
    println!(
        "Compiled {} -> {} ({} bytes of code)",
        input.display(),
        output.display(),
        container.code.len()
    );
}

fn read_image(input: &Path) -> image::ContainerImage {
    match image::read_file(input) {
        Ok(container) => container,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        }
    }
}

fn run_disasm(input: &Path) {
    let container = read_image(input);
    print!("{}", zplc_core::disassemble(&container.code));
}

fn run_inspect(input: &Path, disasm: bool) {
    let container = read_image(input);
    println!("{}", input.display());
    println!("  code:  {} bytes", container.code.len());
    println!("  tasks: {}", container.tasks.len());
    for task in &container.tasks {
        println!(
            "    #{} {:?} priority {} interval {} us entry 0x{:04X} stack {}",
            task.id, task.task_type, task.priority, task.interval_us, task.entry_point, task.stack_size
        );
    }
    if disasm {
        println!();
        print!("{}", zplc_core::disassemble(&container.code));
    }
}
