//! Command-line parsing.
//!
//! ```text
//! dema-rc [OPTIONS] [input_device] [dest]
//! ```

use std::path::PathBuf;

use crate::error::{DemaRcError, Result};
use crate::telemetry::WireFormat;

/// Options given on the command line. Unset fields fall back to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    /// `-v`: debug logging.
    pub verbose: bool,
    /// `-o FORMAT`
    pub output_format: Option<WireFormat>,
    /// `-c PATH`
    pub config: Option<PathBuf>,
    /// First positional argument.
    pub input_device: Option<PathBuf>,
    /// Second positional argument, `host[:port]`.
    pub destination: Option<String>,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the bridge.
    Run(Args),
    /// Print usage and exit.
    Help,
    /// Print the version and exit.
    Version,
}

/// Usage text for `--help`.
#[must_use]
pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [OPTIONS] [input_device] [dest]

Forward controller input as ArduPilot RC-over-UDP packets.

Arguments:
  input_device            evdev node to read, e.g. /dev/input/event3
                          (default: first compatible controller)
  dest                    host[:port] to send to (default: 127.0.0.1:777)

Options:
  -o, --output-format FMT ardupilot-udp-simple (default) or ardupilot-sitl
  -c, --config PATH       configuration file (default: {config})
  -v, --verbose           enable debug logging
  -h, --help              print this help and exit
      --version           print version and exit",
        config = crate::config::DEFAULT_CONFIG_PATH,
    )
}

/// Parses arguments, not including the program name.
///
/// # Errors
///
/// Returns `Args` for unknown options, missing option values, unknown
/// output formats and extra positional arguments.
///
/// # Examples
///
/// ```
/// use dema_rc::cli::{parse, Command};
///
/// let cmd = parse(["-v", "/dev/input/event3"].map(String::from))?;
/// match cmd {
///     Command::Run(args) => assert!(args.verbose),
///     _ => unreachable!(),
/// }
/// # Ok::<(), dema_rc::error::DemaRcError>(())
/// ```
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Command> {
    let mut parsed = Args::default();
    let mut positionals = Vec::new();
    let mut iter = args.into_iter();
    let mut options_done = false;

    while let Some(arg) = iter.next() {
        if options_done || !arg.starts_with('-') || arg == "-" {
            positionals.push(arg);
            continue;
        }

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            inline
                .clone()
                .or_else(|| iter.next())
                .ok_or_else(|| DemaRcError::Args(format!("option '{}' requires a value", name)))
        };

        match flag.as_str() {
            "--" => options_done = true,
            "-h" | "--help" => return Ok(Command::Help),
            "--version" => return Ok(Command::Version),
            "-v" | "--verbose" => parsed.verbose = true,
            "-o" | "--output-format" => parsed.output_format = Some(value(&flag)?.parse()?),
            "-c" | "--config" => parsed.config = Some(PathBuf::from(value(&flag)?)),
            _ => return Err(DemaRcError::Args(format!("unknown option '{}'", arg))),
        }
    }

    let mut positionals = positionals.into_iter();
    parsed.input_device = positionals.next().map(PathBuf::from);
    parsed.destination = positionals.next();
    if let Some(extra) = positionals.next() {
        return Err(DemaRcError::Args(format!("unexpected argument '{}'", extra)));
    }

    Ok(Command::Run(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> Result<Args> {
        match parse(args.iter().map(|s| s.to_string()))? {
            Command::Run(args) => Ok(args),
            other => panic!("Expected Run, got: {:?}", other),
        }
    }

    #[test]
    fn test_no_arguments() {
        assert_eq!(run(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_positionals() {
        let args = run(&["/dev/input/event3", "10.0.0.1:777"]).unwrap();
        assert_eq!(args.input_device, Some(PathBuf::from("/dev/input/event3")));
        assert_eq!(args.destination.as_deref(), Some("10.0.0.1:777"));
    }

    #[test]
    fn test_extra_positional_is_error() {
        let result = run(&["a", "b", "c"]);
        assert!(matches!(result, Err(DemaRcError::Args(_))));
    }

    #[test]
    fn test_output_format() {
        assert_eq!(run(&["-o", "ardupilot-sitl"]).unwrap().output_format, Some(WireFormat::Sitl));
        assert_eq!(
            run(&["--output-format=ardupilot-udp-simple"]).unwrap().output_format,
            Some(WireFormat::Simple)
        );
        assert!(matches!(run(&["-o", "mavlink"]), Err(DemaRcError::Args(_))));
    }

    #[test]
    fn test_missing_option_value() {
        assert!(matches!(run(&["-o"]), Err(DemaRcError::Args(_))));
        assert!(matches!(run(&["--config"]), Err(DemaRcError::Args(_))));
    }

    #[test]
    fn test_config_and_verbose() {
        let args = run(&["-v", "-c", "/tmp/dema.toml", "/dev/input/event0"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/dema.toml")));
        assert_eq!(args.input_device, Some(PathBuf::from("/dev/input/event0")));
    }

    #[test]
    fn test_help_and_version() {
        let parse_strs = |args: &[&str]| parse(args.iter().map(|s| s.to_string())).unwrap();
        assert_eq!(parse_strs(&["--help"]), Command::Help);
        assert_eq!(parse_strs(&["-h", "--bogus"]), Command::Help);
        assert_eq!(parse_strs(&["--version"]), Command::Version);
    }

    #[test]
    fn test_unknown_option() {
        assert!(matches!(run(&["-x"]), Err(DemaRcError::Args(_))));
        assert!(matches!(run(&["--grab"]), Err(DemaRcError::Args(_))));
    }

    #[test]
    fn test_double_dash_ends_options() {
        let args = run(&["--", "-weird-device-name"]).unwrap();
        assert_eq!(args.input_device, Some(PathBuf::from("-weird-device-name")));
    }

    #[test]
    fn test_usage_mentions_options() {
        let text = usage("dema-rc");
        assert!(text.starts_with("Usage: dema-rc"));
        assert!(text.contains("--output-format"));
        assert!(text.contains(crate::config::DEFAULT_CONFIG_PATH));
    }
}
