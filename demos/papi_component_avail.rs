fn main() -> papi::Result<()> {
    env_logger::init();

    let lib = papi::library_init()?;
    println!("Compiled-in components:");
    for cidx in 0..lib.num_components() {
        let cmp = lib.component_info(cidx)?;
        println!("Name:   {:<20} {}", cmp.name, cmp.description);
        match cmp.disabled.as_ref() {
            Some(reason) => println!("   \\-> Disabled: {}", reason),
            None => println!(
                "        counters: {}, multiplexed: {}, presets: {}",
                cmp.num_cntrs, cmp.num_mpx_cntrs, cmp.num_preset_events
            ),
        }
    }
    Ok(())
}
