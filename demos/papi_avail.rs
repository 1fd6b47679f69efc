use papi::{EnumModifier, EventCode};

fn main() -> papi::Result<()> {
    env_logger::init();

    let avail_only = std::env::args().skip(1).any(|a| a == "-a" || a == "--avail");
    let lib = papi::library_init()?;

    let hw = papi::hardware_info()?;
    println!("PAPI version          : {}", lib.version());
    println!("Vendor string         : {}", hw.vendor_string);
    println!("Model string          : {}", hw.model_string);
    println!("CPU max MHz           : {}", hw.cpu_max_mhz);
    println!("Sockets/cores/threads : {}/{}/{}", hw.sockets, hw.cores, hw.threads);
    println!("Total CPUs            : {}", hw.totalcpus);
    println!("Counters              : {}", lib.num_counters());
    println!();

    let modifier = if avail_only {
        EnumModifier::Available
    } else {
        EnumModifier::All
    };
    println!("{:<13} {:<10} {:<5} {:<5} {}", "Name", "Code", "Avail", "Deriv", "Description");
    let mut code = lib.enum_event(EventCode::preset(0), EnumModifier::First)?;
    let mut count = 0;
    loop {
        let info = lib.event_info(code)?;
        let available = lib.query_event(code).is_ok();
        if available || !avail_only {
            count += 1;
            println!(
                "{:<13} {:<10} {:<5} {:<5} {}",
                info.symbol,
                code,
                if available { "Yes" } else { "No" },
                if info.count > 1 { "Yes" } else { "No" },
                info.long_descr
            );
        }
        code = match lib.enum_event(code, modifier) {
            Ok(c) => c,
            Err(_) => break,
        };
    }
    println!("Of {} listed events.", count);
    Ok(())
}
