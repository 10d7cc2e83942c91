//! Command-line combat simulator.
//!
//! Runs a fight on the combat engine with in-memory characters, either from a
//! line-oriented prompt or with a simple automatic policy:
//!
//! ```bash
//! cargo run -p combat-sim -- --hero fighter --monster goblin
//! cargo run -p combat-sim -- --auto --seed 7 --hero mage --hero fighter --monster orc
//! ```

mod driver;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = driver::parse_config_from_args(&args)?;
    driver::run(config).await
}

fn print_help() {
    println!("combat-sim - run a fight on the combat engine");
    println!();
    println!("USAGE:");
    println!("  combat-sim [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help          Show this help message");
    println!("  --hero <CLASS>      Add a hero: fighter or mage (repeatable, default: fighter)");
    println!("  --monster <ID>      Add a monster by template id (repeatable, default: goblin)");
    println!("  --seed <N>          Roll seeded dice for a reproducible fight");
    println!("  --content <DIR>     Load content tables from *.json files instead of the built-ins");
    println!("  --auto              Let every hero act on a simple policy");
    println!();
    println!("COMMANDS (without --auto):");
    println!("  attack [TARGET]         Weapon attack");
    println!("  cast <SPELL> [TARGET]   Cast a known spell");
    println!("  ability <ID> [TARGET]   Use a known ability");
    println!("  use <ITEM> [TARGET]     Use a consumable");
    println!("  defend                  Raise your guard until your next turn");
    println!("  flee                    Try to escape");
    println!("  #status                 Show the battlefield");
    println!("  #quit                   Abandon the fight");
    println!();
    println!("Targets are matched by name prefix, e.g. `attack gob`.");
    println!();
    println!("ENVIRONMENT:");
    println!("  COMBAT_* settings are read from the environment or .env; RUST_LOG controls logging.");
}
