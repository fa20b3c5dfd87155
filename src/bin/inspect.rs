use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use epo::fiff::read_epochs;

#[derive(Parser)]
#[command(name = "inspect", about = "Print a summary of an epochs container")]
struct Args {
    /// Epochs container file (first chunk of a split store).
    input: PathBuf,

    /// Also list the drop log entries with reasons.
    #[arg(long)]
    drop_log: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let epochs = read_epochs(&args.input)?;
    println!(
        "{} epochs × {} ch × {} samples @ {} Hz",
        epochs.len(),
        epochs.info.n_chan(),
        epochs.n_times(),
        epochs.info.sfreq
    );
    println!(
        "window [{:.3}, {:.3}] s, decim {}, raw rate {} Hz",
        epochs.tmin(),
        epochs.tmax(),
        epochs.decim(),
        epochs.raw_sfreq()
    );
    match epochs.baseline() {
        Some((a, b)) => println!("baseline [{a}, {b}] s"),
        None => println!("baseline none"),
    }
    for (name, code) in epochs.event_id.iter() {
        let n = epochs.events().iter().filter(|e| e.code == code).count();
        println!("  {name}: code {code}, {n} epochs");
    }
    let log = epochs.drop_log();
    println!(
        "drop log: {} candidates, {} kept ({:.1}% dropped)",
        log.len(),
        log.n_kept(),
        log.drop_fraction("") * 100.0
    );
    if args.drop_log {
        for (i, entry) in log.entries().iter().enumerate() {
            if !entry.is_empty() {
                println!("  {i}: {}", entry.join(", "));
            }
        }
    }
    Ok(())
}
