use clap::Parser;
use std::panic::{self, PanicHookInfo};

use beacon_agent::app::{self, Options};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    // Diagnostics go to stderr; stdout carries the display lines.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();

    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    match app::run(options, &mut out, &mut err).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
