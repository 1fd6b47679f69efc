use log::warn;
use papi::{EnumModifier, EventCode};

fn main() -> papi::Result<()> {
    env_logger::init();

    let filter = std::env::args().nth(1);
    let lib = papi::library_init()?;

    let mut total = 0;
    for cidx in 0..lib.num_components() {
        let cmp = lib.component_info(cidx)?;
        if let Some(reason) = cmp.disabled.as_ref() {
            warn!("Skipping component {}: {}", cmp.name, reason);
            continue;
        }
        println!("===============================================================");
        println!("Native events in component: {}", cmp.name);
        println!("{}", cmp.description);
        println!("===============================================================");

        let mut code = match lib.enum_event(EventCode::native(cidx, 0), EnumModifier::First) {
            Ok(c) => c,
            Err(_) => continue,
        };
        loop {
            let info = lib.event_info(code)?;
            if filter.as_ref().map(|f| info.symbol.contains(f.as_str())).unwrap_or(true) {
                total += 1;
                println!("| {}:::{:<40} {}", cmp.name, info.symbol, code);
                println!("|     {}", info.long_descr);
                if !info.units.is_empty() {
                    println!("|     units: {}", info.units);
                }
            }
            code = match lib.enum_event(code, EnumModifier::All) {
                Ok(c) => c,
                Err(_) => break,
            };
        }
    }
    println!("Total events reported: {}", total);
    Ok(())
}
