//! Print the detected board profile and, where present, the GPIO chips of
//! the system.

use anyhow::Context;
use rpigpio::{BoardProfile, Config, HostInfo};

fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let host = HostInfo::probe(config.pi5_probe());
    println!("host: {} ({}-bit)", host.arch, host.pointer_width);

    let profile = BoardProfile::resolve(config.model(), || host.clone())
        .with_context(|| format!("resolving model '{}'", config.model()))?;
    println!(
        "profile: {} base={:#x} size={:#x} pins={} addressing={:?}",
        profile.name(),
        profile.register_base(),
        profile.block_size(),
        profile.pin_count(),
        profile.addressing()
    );

    for chip in rpigpio::chips()? {
        let chip = chip?;
        let info = chip.info()?;
        println!(
            "{}: {} [{}] ({} lines)",
            chip.path().display(),
            info.name(),
            info.label(),
            info.num_lines()
        );
    }

    Ok(())
}
