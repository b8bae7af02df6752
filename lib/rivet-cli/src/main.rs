//! Main function of the RISC-V emulator for the CLI version: parse the
//! flags, build a machine, load the bootrom (and optionally a DTB and a
//! disk image), wire stdin to the UART and run until shutdown.

mod logger;

use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;

use rivet::blk::FileBackend;
use rivet::machine::{Machine, MachineConfig, MAX_HARTS};

/// RISC-V virtual machine.
#[derive(Parser)]
#[command(name = "rivet", version, about)]
struct Args {
    /// Memory amount, with an optional k/M/G suffix.
    #[arg(long, default_value = "256M", value_parser = parse_mem_size)]
    mem: u64,

    /// Core count.
    #[arg(long, default_value_t = 1)]
    smp: u32,

    /// Enable 64-bit RISC-V (32-bit by default).
    #[arg(long)]
    rv64: bool,

    /// Pass a device tree blob to the machine.
    #[arg(long)]
    dtb: Option<PathBuf>,

    /// Attach a hard drive with a raw image.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(long)]
    verbose: bool,

    /// Machine bootrom (SBI, BBL, etc.), loaded at the start of RAM.
    bootrom: PathBuf,
}

/// Parse a memory amount like "256M" or "2G".
fn parse_mem_size(arg: &str) -> Result<u64, String> {
    let (number, shift) = match arg.bytes().last() {
        Some(b'k') | Some(b'K') => (&arg[..arg.len() - 1], 10),
        Some(b'M') => (&arg[..arg.len() - 1], 20),
        Some(b'G') => (&arg[..arg.len() - 1], 30),
        _ => (arg, 0),
    };
    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid memory amount \"{arg}\""))?;
    number
        .checked_shl(shift)
        .ok_or_else(|| format!("memory amount \"{arg}\" is too large"))
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    if args.smp == 0 || args.smp > MAX_HARTS {
        return Err(format!("invalid core count {}", args.smp).into());
    }

    let config = MachineConfig {
        mem_size: args.mem,
        smp: args.smp,
        rv64: args.rv64,
        ..Default::default()
    };
    let mut machine = Machine::new(config)?;

    let bootrom = fs::read(&args.bootrom)
        .map_err(|e| format!("cannot open bootrom {}: {e}", args.bootrom.display()))?;
    machine.load_image(machine.mem().base(), &bootrom)?;

    if let Some(path) = &args.dtb {
        let dtb = fs::read(path).map_err(|e| format!("cannot open DTB {}: {e}", path.display()))?;
        let dtb_addr = machine.mem().end() - 0x2000;
        machine.load_image(dtb_addr, &dtb)?;
        // The boot protocol passes the DTB address in a1 of each hart.
        machine.set_dtb_addr(dtb_addr);
    }

    if let Some(path) = &args.image {
        let disk = FileBackend::open(path)
            .map_err(|e| format!("cannot open image {}: {e}", path.display()))?;
        machine.attach_drive(Box::new(disk));
    }

    // Forward host stdin to the UART receive FIFO.
    let uart_input = machine.uart_input();
    thread::spawn(move || {
        let mut byte = [0u8; 1];
        while let Ok(1) = io::stdin().read(&mut byte) {
            if uart_input.send(byte[0]).is_err() {
                break;
            }
        }
    });

    machine.run();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rivet: {err}");
            ExitCode::FAILURE
        }
    }
}
