use broadcast_channel::{
    Receiver, Region, Result, Samples, Transmitter, channel, local_channel, mono_time_ns,
};
use clap::{Parser, Subcommand};

const CAPACITY: usize = 1 << 20;
const MSG_TYPE_TICK: i32 = 1;
const PAYLOAD_SIZE: usize = 392;
const TRIALS: usize = 100_000;

#[derive(Parser, Debug)]
#[command(version, about = "Benchmarks for a single-producer broadcast ring", long_about = None)]
struct Args {
    /// Operation mode, selected via subcommand.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transmits messages onto a shared-memory ring.
    Writer {
        /// Minimum period between messages in nanoseconds; 0 disables throttling.
        #[arg(short = 'p', long = "period", default_value_t = 0)]
        period: u64,

        /// Output shared-memory segment name, which must begin with '/'.
        #[arg(short = 'o', long = "output", default_value = "/bcast-bench")]
        output: String,
    },

    /// Receives messages from a shared-memory ring.
    Reader {
        /// Input shared-memory segment name, which must begin with '/'.
        #[arg(short = 'i', long = "input", default_value = "/bcast-bench")]
        input: String,
    },

    /// Runs one writer and multiple readers over an in-process ring,
    /// each pinned to its own core.
    Broadcast {
        /// Minimum period between messages in nanoseconds; 0 disables throttling.
        #[arg(short = 'p', long = "period", default_value_t = 0)]
        period: u64,

        /// Maximum number of readers.
        #[arg(short = 'm', long = "max-readers", default_value_t = 4)]
        max_readers: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!(
        "capacity: {}, payload size: {}, record size: {}, trials: {}",
        CAPACITY,
        PAYLOAD_SIZE,
        PAYLOAD_SIZE + 8,
        TRIALS,
    );

    match args.command {
        Commands::Writer { period, output } => {
            println!("period: {}, output: {:?}", period, output);
            let (tx, _) = channel(&output, CAPACITY)?;
            writer(tx, period)
        }

        Commands::Reader { input } => {
            println!("input: {:?}", input);
            let (_, rx) = channel(&input, CAPACITY)?;
            reader(rx)
        }

        Commands::Broadcast {
            period,
            max_readers,
        } => {
            let (tx, rx) = local_channel(CAPACITY)?;

            let cores = core_affinity::get_core_ids().unwrap();
            assert!(
                cores.len() > 1,
                "At least 2 CPU cores are required (found {}).",
                cores.len()
            );

            let n_readers = (cores.len().saturating_sub(2)).min(max_readers).max(1);
            println!("period: {}, n_readers: {}", period, n_readers);

            let readers: Vec<_> = (0..n_readers)
                .map(|i| {
                    let rx = rx.clone();
                    let core_id = cores[(2 + i) % cores.len()];
                    std::thread::spawn(move || {
                        core_affinity::set_for_current(core_id);
                        reader(rx)
                    })
                })
                .collect();

            let core_id = cores[1];
            let writer_handle = std::thread::spawn(move || {
                core_affinity::set_for_current(core_id);
                writer(tx, period)
            });

            for handle in readers {
                handle.join().unwrap()?;
            }
            writer_handle.join().unwrap()?;

            Ok(())
        }
    }
}

/// Busy-waits until the monotonic clock reaches `deadline_ns`.
#[inline(always)]
fn delay(deadline_ns: u64) -> u64 {
    loop {
        let ts = mono_time_ns();
        if ts >= deadline_ns {
            break ts;
        }
    }
}

#[inline(never)]
fn writer<R: Region>(tx: Transmitter<R>, period: u64) -> Result<()> {
    let mut transmit_ns = Samples::with_capacity(TRIALS);
    let mut cycle_ns = Samples::with_capacity(TRIALS);

    let mut payload = [0u8; PAYLOAD_SIZE];

    for seq in 0..TRIALS as u64 {
        let ts0 = mono_time_ns();
        payload[..8].copy_from_slice(&ts0.to_le_bytes());
        payload[8..16].copy_from_slice(&seq.to_le_bytes());
        tx.transmit(MSG_TYPE_TICK, &payload, 0, PAYLOAD_SIZE)?;
        let ts1 = mono_time_ns();
        transmit_ns.record(ts1 - ts0);

        let ts2 = delay(ts0 + period);
        cycle_ns.record(ts2 - ts0);
    }

    println!("{}", transmit_ns.summary("transmit ns"));
    println!("{}", cycle_ns.summary("cycle ns"));
    Ok(())
}

#[inline(never)]
fn reader<R: Region>(mut rx: Receiver<R>) -> Result<()> {
    let mut latency_ns = Samples::with_capacity(TRIALS);
    let mut turnaround_ns = Samples::with_capacity(TRIALS);

    let mut prev_seq: Option<u64> = None;
    loop {
        let ts0 = mono_time_ns();
        let (_, payload) = rx.recv();
        let ts2 = mono_time_ns();

        let ts1 = u64::from_le_bytes(payload[..8].try_into().unwrap());
        let seq = u64::from_le_bytes(payload[8..16].try_into().unwrap());

        latency_ns.record(ts2.saturating_sub(ts1));
        turnaround_ns.record(ts2 - ts0);

        if let Some(prev) = prev_seq {
            if seq != prev + 1 {
                println!(
                    "Skipped {} messages: prev seq {}, curr seq {}",
                    seq - prev - 1,
                    prev,
                    seq
                );
            }
        }
        prev_seq = Some(seq);

        if seq == TRIALS as u64 - 1 {
            break;
        }
    }

    println!("{}", latency_ns.summary("end-to-end ns"));
    println!("{}", turnaround_ns.summary("turnaround ns"));
    println!("laps: {}", rx.lapped_count());
    Ok(())
}
