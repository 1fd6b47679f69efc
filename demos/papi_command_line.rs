use log::info;

fn workload(n: usize) -> f64 {
    (0..n).map(|i| (i as f64).sqrt()).sum()
}

fn main() -> papi::Result<()> {
    env_logger::init();

    let names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        eprintln!("Usage: papi_command_line EVENT [EVENT ...]");
        return Err(papi::Error::Invalid);
    }

    let lib = papi::library_init()?;
    let mut set = lib.create_eventset();
    let mut added = vec![];
    for name in names.iter() {
        match set.add_named_event(name) {
            Ok(()) => {
                info!("Added {}", name);
                added.push(name);
            }
            Err(e) => println!("Failed adding: {} because: {}", name, e),
        }
    }
    if added.is_empty() {
        return Err(papi::Error::NoEvent);
    }

    set.start()?;
    let sum = workload(10_000_000);
    let values = set.stop()?;
    info!("Workload result {}", sum);

    println!("This utility lets you add events from the command line interface to see if they work.");
    for (name, value) in added.iter().zip(values.iter()) {
        println!("{} : \t{}", name, value);
    }
    Ok(())
}
