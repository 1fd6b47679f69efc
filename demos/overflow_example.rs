use log::info;
use papi::{preset, OverflowEvent, OverflowFlags};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const THRESHOLD: i64 = 200_000;

fn fibonacci(n: u32) -> u64 {
    match n {
        0 | 1 => 1,
        _ => fibonacci(n - 1) + fibonacci(n - 2),
    }
}

fn main() -> papi::Result<()> {
    env_logger::init();

    let lib = papi::library_init()?;
    let mut set = lib.create_eventset();
    set.add_event(preset::TOT_INS)?;
    set.add_event(preset::TOT_CYC)?;

    let overflows = Arc::new(AtomicUsize::new(0));
    let seen = overflows.clone();
    set.overflow(
        preset::TOT_INS,
        THRESHOLD,
        OverflowFlags::default(),
        Some(Box::new(move |ev: &OverflowEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            info!("Overflow at {:#x}, vector {:#x}", ev.address, ev.vector);
        })),
    )?;

    set.start()?;
    let fib = fibonacci(30);
    let values = set.stop()?;

    println!("fibonacci(30) = {}", fib);
    println!("PAPI_TOT_INS : {}", values[0]);
    println!("PAPI_TOT_CYC : {}", values[1]);
    println!(
        "Overflows    : {} (expected about {})",
        overflows.load(Ordering::SeqCst),
        values[0] / THRESHOLD
    );
    Ok(())
}
