use std::env;
use std::thread;

use broadcast_channel::{Receiver, Region, Result, Samples, Transmitter, channel, mono_time_ns};

const SEGMENT: &str = "/broadcast-channel-demo";
const CAPACITY: usize = 1 << 16;
const MSG_TYPE_TICK: i32 = 1;
const TRIALS: usize = 100_000;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} writer|reader|both", args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "writer" => {
            let (tx, _) = channel(SEGMENT, CAPACITY)?;
            writer(tx)
        }
        "reader" => {
            let (_, rx) = channel(SEGMENT, CAPACITY)?;
            reader(rx)
        }
        "both" => {
            // One channel, so the reader is attached before the first
            // message goes out.
            let (tx, rx) = channel(SEGMENT, CAPACITY)?;
            let tx_side = thread::spawn(move || writer(tx));
            let rx_side = thread::spawn(move || reader(rx));
            tx_side.join().unwrap()?;
            rx_side.join().unwrap()?;
            Ok(())
        }
        _ => {
            eprintln!("Usage: {} writer|reader|both", args[0]);
            std::process::exit(1);
        }
    }
}

/// Message payload: monotonic timestamp and sequence number, little-endian.
fn encode(payload: &mut [u8; 16], timestamp: u64, seq: u64) {
    payload[..8].copy_from_slice(&timestamp.to_le_bytes());
    payload[8..].copy_from_slice(&seq.to_le_bytes());
}

fn decode(payload: &[u8]) -> (u64, u64) {
    let timestamp = u64::from_le_bytes(payload[..8].try_into().unwrap());
    let seq = u64::from_le_bytes(payload[8..16].try_into().unwrap());
    (timestamp, seq)
}

fn writer<R: Region>(tx: Transmitter<R>) -> Result<()> {
    println!(
        "writer: segment {}, capacity {}, max message {}",
        SEGMENT,
        tx.capacity(),
        tx.max_msg_length()
    );

    let mut samples = Samples::with_capacity(TRIALS);
    let mut payload = [0u8; 16];

    for seq in 0..TRIALS as u64 {
        let ts0 = mono_time_ns();
        encode(&mut payload, ts0, seq);
        tx.transmit(MSG_TYPE_TICK, &payload, 0, payload.len())?;
        let ts1 = mono_time_ns();
        samples.record(ts1 - ts0);
    }

    println!("{}", samples.summary("transmit ns"));
    Ok(())
}

fn reader<R: Region>(mut rx: Receiver<R>) -> Result<()> {
    println!("reader: segment {}, capacity {}", SEGMENT, rx.capacity());

    let mut samples = Samples::with_capacity(TRIALS);
    let mut gaps: u64 = 0;
    let mut prev_seq: Option<u64> = None;

    loop {
        let (_, payload) = rx.recv();
        let ts1 = mono_time_ns();
        let (ts0, seq) = decode(payload);
        samples.record(ts1.saturating_sub(ts0));

        if let Some(prev) = prev_seq {
            if seq != prev + 1 {
                gaps += seq - prev - 1;
            }
        }
        prev_seq = Some(seq);

        if seq == TRIALS as u64 - 1 {
            break;
        }
    }

    println!("{}", samples.summary("end-to-end ns"));
    println!(
        "reader: {} messages lost across {} laps",
        gaps,
        rx.lapped_count()
    );
    Ok(())
}
