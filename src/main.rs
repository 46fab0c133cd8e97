//! # dema-rc
//!
//! Use a game controller as an RC transmitter for ArduPilot.
//!
//! Reads the controller through evdev and sends its channels over UDP to
//! ArduPilot's RC input, either in the `ardupilot-udp-simple` format or in
//! the header-less `ardupilot-sitl` format.

use anyhow::{Context, Result};
use tracing::{info, Level};

use dema_rc::app::{App, Settings};
use dema_rc::cli::{self, Command};
use dema_rc::config::Config;

/// Default log level for the given verbosity.
fn log_level(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Main entry point for dema-rc
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse the command line
///    - Set up logging with tracing subscriber
///    - Load the configuration file and merge it with the command line
///    - Start the reactor, stop source, controller and telemetry socket
///
/// 2. **Main Loop**
///    - Apply controller events to the channel vector as they arrive
///    - Send the channel vector on every telemetry tick
///
/// 3. **Graceful Shutdown**
///    - SIGINT or SIGTERM stops the loop after the current batch
///    - Close the socket, the controller and the stop source
///
/// # Errors
///
/// Returns error if:
/// - Arguments or configuration are invalid
/// - No usable controller is found
/// - The destination cannot be parsed or the socket cannot be created
///
/// # Examples
///
/// ```bash
/// dema-rc -o ardupilot-sitl /dev/input/event3 127.0.0.1:5501
/// ```
fn main() -> Result<()> {
    let program = std::env::args().next().unwrap_or_else(|| "dema-rc".to_string());

    let args = match cli::parse(std::env::args().skip(1))? {
        Command::Help => {
            println!("{}", cli::usage(&program));
            return Ok(());
        }
        Command::Version => {
            println!("dema-rc {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Run(args) => args,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_level(args.verbose).into()),
        )
        .init();

    info!("dema-rc v{} starting...", env!("CARGO_PKG_VERSION"));

    let settings = {
        let config = Config::load_or_default(args.config.as_deref()).context("Could not load configuration")?;
        Settings::resolve(&args, &config)?
    };

    let mut app = App::start(&settings)?;
    let result = app.run();
    app.shutdown();

    info!("Exiting");
    result?;

    Ok(())
}
