//! crashlens command-line front end.
//!
//! Each subcommand opens the configured dump, runs one query and prints the
//! result line by line on stdout. Diagnostics go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crashlens::arch::{ArchRegistry, ThreadRegisters};
use crashlens::cache::syscache::format_uptime;
use crashlens::cache::SystemCache;
use crashlens::config::{parse_address, InspectConfig, LogFormat};
use crashlens::kernel::{for_each_module, CpuMasks};
use crashlens::memory::ImageFormat;
use crashlens::storage::{walk_chain, DecoderRegistry};
use crashlens::{logging, Target};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "crashlens", version, about = "Inspect Linux kernel crash dumps")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Memory image (kdump ELF core or raw dump).
    #[arg(long, global = true)]
    vmcore: Option<PathBuf>,

    /// ISF symbol table for the dumped kernel.
    #[arg(long, global = true)]
    symbols: Option<PathBuf>,

    /// Treat the image as raw, with file offset 0 at this address.
    #[arg(long, global = true, value_parser = parse_address)]
    raw_base: Option<u64>,

    /// KASLR offset, overriding VMCOREINFO.
    #[arg(long, global = true, value_parser = parse_address)]
    kernel_offset: Option<u64>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Kernel identity, as `uname -a`.
    Uname,
    /// The kernel build configuration.
    Config {
        /// Print only this option (without the CONFIG_ prefix).
        option: Option<String>,
    },
    /// Time since boot.
    Uptime,
    /// Online and possible CPUs.
    Cpus,
    /// Loaded modules.
    Modules {
        /// Also list each module's sections.
        #[arg(long)]
        sections: bool,
    },
    /// Walk the storage stack above a `struct bio`.
    Bio {
        #[arg(value_parser = parse_address)]
        address: u64,
    },
    /// Walk the storage stack above a `struct buffer_head`.
    Bh {
        #[arg(value_parser = parse_address)]
        address: u64,
    },
    /// Registered storage decoders.
    Decoders,
    /// Saved registers of a scheduled-out task.
    Regs {
        /// Address of the `struct task_struct`.
        #[arg(value_parser = parse_address)]
        task: u64,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<InspectConfig> {
    let mut config = match &cli.config {
        Some(path) => InspectConfig::from_file(path)?,
        None => InspectConfig::default(),
    };
    config.apply_env()?;

    if let Some(path) = &cli.vmcore {
        config.vmcore = Some(path.clone());
    }
    if let Some(path) = &cli.symbols {
        config.symbols = Some(path.clone());
    }
    if let Some(base) = cli.raw_base {
        config.format = ImageFormat::Raw { base };
    }
    if cli.kernel_offset.is_some() {
        config.kernel_offset = cli.kernel_offset;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(config.log_format);

    let target = Target::open(&config).context("cannot open the dump")?;
    info!("crashlens ready");

    match cli.command {
        Command::Uname => uname(&target),
        Command::Config { option } => kernel_config(&target, option.as_deref()),
        Command::Uptime => uptime(&target),
        Command::Cpus => cpus(&target),
        Command::Modules { sections } => modules(&target, sections),
        Command::Bio { address } => storage_stack(&target, address, "bio"),
        Command::Bh { address } => storage_stack(&target, address, "buffer_head"),
        Command::Decoders => decoders(&target),
        Command::Regs { task } => registers(&target, &config, task),
    }
}

fn uname(target: &Target) -> anyhow::Result<()> {
    let cache = SystemCache::new(target);
    let uts = cache.utsname()?;
    let line: Vec<&str> = ["sysname", "nodename", "release", "version", "machine"]
        .iter()
        .filter_map(|field| uts.get(field))
        .collect();
    println!("{}", line.join(" "));
    Ok(())
}

fn kernel_config(target: &Target, option: Option<&str>) -> anyhow::Result<()> {
    let cache = SystemCache::new(target);
    let config = cache.config()?;
    match option {
        Some(name) => println!("CONFIG_{}={}", name, config.require(name)?),
        None => print!("{}", config.text()),
    }
    Ok(())
}

fn uptime(target: &Target) -> anyhow::Result<()> {
    let cache = SystemCache::new(target);
    let kernel = cache.kernel()?;
    debug!("HZ={} jiffies={}", kernel.hz(), kernel.jiffies());
    println!("{}", format_uptime(kernel.uptime()));
    Ok(())
}

fn cpus(target: &Target) -> anyhow::Result<()> {
    let masks = CpuMasks::watch(target);
    let list = |cpus: Vec<u32>| {
        cpus.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };
    println!("online:   {}", list(masks.online_cpus()));
    println!("possible: {}", list(masks.possible_cpus()));
    println!("highest online: {}", masks.highest_online_cpu_nr()?);
    Ok(())
}

fn modules(target: &Target, sections: bool) -> anyhow::Result<()> {
    for module in for_each_module(target)? {
        let module = module?;
        println!("{:#x} {}", module.address(), module.name()?);
        if sections {
            for section in module.sections()? {
                println!("    {:#x} {}", section.address, section.name);
            }
        }
    }
    Ok(())
}

fn storage_stack(target: &Target, address: u64, type_name: &str) -> anyhow::Result<()> {
    let ctx = target.storage(DecoderRegistry::global())?;
    let object = target.reader(address, type_name)?;
    for (depth, decoder) in walk_chain(ctx, object)?.enumerate() {
        println!("#{:<2} {}", depth, decoder);
    }
    Ok(())
}

fn decoders(target: &Target) -> anyhow::Result<()> {
    let registry = DecoderRegistry::global();
    for (address, name) in registry.entries() {
        let symbol = target
            .symbols()
            .symbol_at(address.wrapping_sub(target.kernel_offset()))
            .unwrap_or("?");
        println!("{:#x} {:<12} {}", address, name, symbol);
    }
    let pending = target.notifier().pending_names();
    if !pending.is_empty() {
        println!("unresolved: {}", pending.join(", "));
    }
    Ok(())
}

fn registers(target: &Target, config: &InspectConfig, task: u64) -> anyhow::Result<()> {
    let name = match &config.architecture {
        Some(name) => name.clone(),
        None => SystemCache::new(target)
            .utsname()?
            .machine()
            .context("utsname has no machine field")?
            .to_string(),
    };
    let arch = ArchRegistry::global().get(&name)?;

    let task = target.reader(task, "task_struct")?;
    let mut regs = ThreadRegisters::default();
    arch.fetch_scheduled(&task, &mut regs)?;
    for (reg, value) in regs.iter() {
        println!("{:>5} {:#018x}", reg, value);
    }
    println!("thread_info {:#x}", arch.thread_info_address(&task)?);
    Ok(())
}
