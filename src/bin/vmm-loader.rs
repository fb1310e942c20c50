//! vmm-loader CLI tool
//!
//! Loads a kernel and boot sector into a software guest and reports the
//! resulting layout.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use vmm_loader::memory::layout;
use vmm_loader::{debug, ElfProgramTable, ImageSource, LoaderBuilder, SoftHypervisor, PAGE_SIZE};

#[derive(Parser)]
#[command(name = "vmm-loader", version, about = "Guest memory image loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a kernel (and optional boot sector) into a new guest
    Load {
        /// Path to the ELF kernel image
        #[arg(long)]
        kernel: PathBuf,
        /// Path to the raw boot sector image
        #[arg(long)]
        boot: Option<PathBuf>,
        /// Guest physical address of the boot sector
        #[arg(long, value_parser = parse_addr, default_value_t = layout::BOOT_ENTRY)]
        entry: u64,
        /// Guest memory size in MB
        #[arg(long, default_value_t = 64)]
        memory: u64,
    },
    /// List the loadable segments of a kernel image
    Inspect {
        /// Path to the ELF kernel image
        #[arg(long)]
        kernel: PathBuf,
    },
}

fn main() {
    debug::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> vmm_loader::Result<()> {
    match cli.command {
        Command::Load {
            kernel,
            boot,
            entry,
            memory,
        } => cmd_load(kernel, boot, entry, memory),
        Command::Inspect { kernel } => cmd_inspect(kernel),
    }
}

fn cmd_load(kernel: PathBuf, boot: Option<PathBuf>, entry: u64, memory: u64) -> vmm_loader::Result<()> {
    let mut builder = LoaderBuilder::new(kernel).boot_entry(entry).memory_mb(memory);
    if let Some(boot) = boot {
        builder = builder.boot(boot);
    }
    let plan = builder.build()?;

    let mut hv = SoftHypervisor::new();
    let report = plan.execute(&mut hv)?;

    println!("Guest {} loaded", report.guest.id());
    println!("  Memory:        {} MB", report.guest.memory_size() / (1024 * 1024));
    println!("  Guest entry:   0x{:x}", report.guest.entry());
    println!("  Kernel entry:  0x{:x}", report.kernel.entry);
    if let Some(base) = report.kernel.load_addr() {
        println!("  Kernel base:   0x{:x}", base);
    }
    for segment in &report.kernel.segments {
        println!(
            "  Segment:       0x{:08x}-0x{:08x} ({} file bytes)",
            segment.guest_paddr,
            segment.guest_paddr + segment.mem_size,
            segment.file_size
        );
    }
    if let Some(pages) = report.boot_pages {
        println!("  Boot sector:   0x{:x} ({} page)", report.guest.entry(), pages);
    }
    println!(
        "  Pages mapped:  {} ({} KB)",
        hv.mapped_pages(&report.guest),
        hv.mapped_pages(&report.guest) * PAGE_SIZE / 1024
    );
    Ok(())
}

fn cmd_inspect(kernel: PathBuf) -> vmm_loader::Result<()> {
    let mut source = ImageSource::open(&kernel)?;
    let elf = ElfProgramTable::parse(&mut source)?;

    println!("{}: {:?}, entry 0x{:x}", kernel.display(), elf.class, elf.entry);
    println!("  {:>18} {:>10} {:>10} {:>10}", "PADDR", "OFFSET", "FILESZ", "MEMSZ");
    for segment in &elf.segments {
        println!(
            "  0x{:016x} 0x{:08x} 0x{:08x} 0x{:08x}",
            segment.guest_paddr, segment.file_offset, segment.file_size, segment.mem_size
        );
    }
    Ok(())
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}
