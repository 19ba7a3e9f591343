use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jsamp::configuration::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about = "Controls a running JSamp profiler", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stop sampling and wait until the report has been written
    Detach {
        #[arg(long, default_value = "localhost")]
        host: String,

        /// The port that JSamp listens on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Detach { host, port } => {
            log::debug!("Requesting stop from {}:{}", host, port);
            jsamp::trigger_stop((host.as_str(), port))
                .with_context(|| format!("could not stop the profiler at {}:{}", host, port))?;
            log::debug!("Report written");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_defaults() {
        let args = Args::try_parse_from(["jsamp-control", "detach"]).unwrap();
        let Command::Detach { host, port } = args.command;
        assert_eq!(host, "localhost");
        assert_eq!(port, 2857);
    }

    #[test]
    fn test_detach_port() {
        let args = Args::try_parse_from(["jsamp-control", "detach", "-p", "9999"]).unwrap();
        let Command::Detach { port, .. } = args.command;
        assert_eq!(port, 9999);
    }

    #[test]
    fn test_unknown_command() {
        assert!(Args::try_parse_from(["jsamp-control", "attach"]).is_err());
    }

    #[test]
    fn test_detach_without_profiler_fails() {
        // Grab a free port and release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let port = port.to_string();
        let args = Args::try_parse_from([
            "jsamp-control",
            "detach",
            "--host",
            "127.0.0.1",
            "-p",
            port.as_str(),
        ])
        .unwrap();
        assert!(run(args).is_err());
    }
}
