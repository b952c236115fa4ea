mod memshow;
mod programs;

use std::io::Write as _;

use cinder_kernel::{Console, Kernel, KernelConfig, NullDevices, Registers, Resume, TrapFrame};
use clap::Parser;

use programs::{Program, Script, Trap};

#[derive(Parser)]
#[command(name = "cinder-sim")]
#[command(about = "Runs the Cinder kernel core with scripted user programs")]
struct Args {
    /// Program the initial processes run
    #[arg(short, long, value_enum, default_value = "fork")]
    program: Program,

    /// Number of processes to start
    #[arg(short = 'n', long, default_value_t = 1)]
    processes: usize,

    /// Pages each process allocates before exiting; unlimited if omitted
    #[arg(long)]
    exit_after: Option<usize>,

    /// Maximum number of program steps to run
    #[arg(short, long, default_value_t = 2000)]
    steps: usize,

    /// Program steps between timer interrupts
    #[arg(long, default_value_t = 7, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    timer_interval: usize,

    /// Timer ticks between memory maps; zero only prints the final one
    #[arg(long, default_value_t = 100)]
    show_every: u64,

    /// Process table size
    #[arg(long, default_value_t = 16)]
    process_count: usize,

    /// Virtual address space per process, in KiB
    #[arg(long, default_value_t = 3072)]
    virtual_memory_kib: usize,

    /// Timer interrupt frequency
    #[arg(long, default_value_t = 100)]
    timer_hz: u32,

    /// Most verbose kernel log level shown
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

/// Console sink writing to the host's stdout.
struct Stdout;

impl core::fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        std::io::stdout()
            .write_all(s.as_bytes())
            .map_err(|_| core::fmt::Error)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let console = Console::init();
    console.attach(Box::new(Stdout));
    log::set_max_level(args.log_level);

    let config = KernelConfig::default()
        .with_process_count(args.process_count)
        .with_virtual_memory_size(args.virtual_memory_kib * 1024)
        .with_timer_hz(args.timer_hz);
    let mut kernel = Kernel::boot(config, NullDevices)?;
    let image = programs::image();
    for _ in 0..args.processes {
        kernel.spawn(&image)?;
    }

    let script = Script {
        program: args.program,
        exit_after: args.exit_after,
    };
    let mut resume = kernel.start();
    let mut last_shown = 0;

    for step in 1..=args.steps {
        let pid = match resume {
            Resume::Run(pid) => pid,
            Resume::Idle => {
                // Halted until the next timer interrupt.
                let halted = Registers::kernel(0x4_0000, 0x8_0000);
                kernel.exception(&TrapFrame::timer(halted));
                resume = kernel.idle();
                if resume == Resume::Idle {
                    log::info!("no runnable process left");
                    break;
                }
                continue;
            }
        };

        let registers = *kernel
            .process(pid)
            .ok_or("running process vanished")?
            .registers();
        resume = if step % args.timer_interval == 0 {
            kernel.exception(&TrapFrame::timer(registers))
        } else {
            match script.step(&mut kernel, pid, registers) {
                Trap::Syscall(registers) => kernel.syscall(&registers),
                Trap::Exception(frame) => kernel.exception(&frame),
            }
        };

        if args.show_every > 0 && kernel.ticks() >= last_shown + args.show_every {
            last_shown = kernel.ticks();
            println!("after {:?}:\n{}", kernel.uptime(), memshow::render(&kernel));
        }
    }

    print!("{}", memshow::render(&kernel));
    kernel.audit()?;
    println!("reference counts consistent after {} ticks", kernel.ticks());
    Ok(())
}
