//! Command-line front end for the hyperpath client.
//!
//! `hyperpath fetch <URL>` fetches a URL one or more times with the network
//! path pinned down by flags. `hyperpath verify` runs the timeout scenarios
//! against a local mock server. Use `--help` to see the options.

use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use hyperpath::client::{Client, ClientConfig, Reporter, RequestOutcome, Sequence};
use hyperpath::duration;
use hyperpath::verify::Scenarios;
use tracing::Level;
use tracing_subscriber::{
    filter::Targets, layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _,
};

fn duration_arg(arg: clap::Arg) -> clap::Arg {
    arg.value_parser(duration::parse)
}

fn cli() -> Command {
    Command::new("hyperpath")
        .version(env!("CARGO_PKG_VERSION"))
        .about("HTTP fetches with explicit control over dialing, DNS, reuse and timeouts")
        .subcommand_required(true)
        .arg(
            arg!(-v --verbose "Log connection details (repeat for more)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(
            Command::new("fetch")
                .about("Fetch a URL, optionally several times")
                .args([
                    clap::Arg::new("url").help("Target URL").required(true),
                    arg!(-n --count <N> "Number of fetches")
                        .default_value("1")
                        .value_parser(value_parser!(u32).range(1..)),
                    duration_arg(arg!(--pause <DURATION> "Pause between fetches"))
                        .default_value("1s"),
                    duration_arg(arg!(--"connect-timeout" <DURATION> "Connection timeout, 0 for none"))
                        .default_value("30s"),
                    duration_arg(arg!(--timeout <DURATION> "Overall timeout of each fetch, 0 for none"))
                        .default_value("15s"),
                    duration_arg(arg!(--"keep-alive" <DURATION> "TCP keep-alive interval"))
                        .default_value("30s"),
                    arg!(-'4' --ipv4 "Only dial IPv4 addresses").action(ArgAction::SetTrue),
                    arg!(--http1 "Never negotiate HTTP/2").action(ArgAction::SetTrue),
                    arg!(--"no-reuse" "Use a new connection for every fetch")
                        .action(ArgAction::SetTrue),
                    arg!(--"fresh-dns" "Look up the host for every fetch")
                        .action(ArgAction::SetTrue),
                    arg!(--capture "Print the response body").action(ArgAction::SetTrue),
                ]),
        )
        .subcommand(
            Command::new("verify")
                .about("Check that the overall timeout applies to each fetch independently")
                .args([
                    duration_arg(arg!(--timeout <DURATION> "Overall timeout of the client"))
                        .default_value("2s"),
                    duration_arg(arg!(--slow <DURATION> "Delay expected to time out"))
                        .default_value("3s"),
                    duration_arg(arg!(--short <DURATION> "Delay expected to finish in time"))
                        .default_value("1s"),
                ]),
        )
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = Targets::new()
        .with_target("hyperpath", level)
        .with_default(Level::WARN);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}

fn duration_flag(args: &ArgMatches, name: &str) -> Duration {
    args.get_one::<Duration>(name).copied().unwrap_or_default()
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let args = cli().get_matches();
    init_tracing(args.get_count("verbose"));

    #[cfg(feature = "tls")]
    let _ = rustls::crypto::ring::default_provider().install_default();

    match args.subcommand() {
        Some(("fetch", args)) => fetch(args).await,
        Some(("verify", args)) => verify(args).await,
        _ => unreachable!("a subcommand is required"),
    }
}

/// Prints each outcome the way an operator reads it.
struct StdoutReporter {
    capture: bool,
}

impl Reporter for StdoutReporter {
    fn starting(&mut self, index: usize, _url: &str) {
        if index > 0 {
            println!();
        }
    }

    fn report(&mut self, index: usize, outcome: RequestOutcome) {
        println!("Attempt {}:", index + 1);
        match &outcome.error {
            None => {
                println!("Status: {}", outcome.status_text());
                if let Some(code) = outcome.status_code() {
                    println!("Status Code: {code}");
                }
                println!(
                    "Read {} bytes in {}",
                    outcome.bytes_read,
                    duration::Display(outcome.elapsed)
                );
            }
            Some(error) => println!("Error fetching URL ({}): {error}", error.kind()),
        }
        if let Some(connection) = &outcome.connection {
            println!(
                "Connection: {connection}{}",
                if outcome.reused { " [reused]" } else { "" }
            );
        }
        if self.capture {
            if let Some(body) = &outcome.body {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(body);
                let _ = writeln!(stdout);
            }
        }
    }
}

async fn fetch(args: &ArgMatches) -> color_eyre::Result<ExitCode> {
    let url = args
        .get_one::<String>("url")
        .ok_or_else(|| color_eyre::eyre::eyre!("missing url"))?;

    let mut config = ClientConfig {
        overall_timeout: duration_flag(args, "timeout"),
        capture_body: args.get_flag("capture"),
        ..Default::default()
    };
    config.transport.connect_timeout = duration_flag(args, "connect-timeout");
    config.transport.keep_alive = duration_flag(args, "keep-alive");
    config.transport.force_ipv4 = args.get_flag("ipv4");
    config.transport.allow_http2 = !args.get_flag("http1");
    config.transport.reuse_connections = !args.get_flag("no-reuse");
    config.transport.bypass_resolver_cache = args.get_flag("fresh-dns");

    let sequence = Sequence::new(
        args.get_one::<u32>("count").map_or(1, |&count| count as usize),
        duration_flag(args, "pause"),
    );

    println!(
        "Fetching URL: {url} (HTTP/2 enabled: {})\n",
        config.transport.allow_http2
    );
    let reporter = StdoutReporter {
        capture: config.capture_body,
    };
    let client = Client::new(config);
    let summary = sequence.run(&client, url, reporter).await;

    println!(
        "\n{} attempts, {} succeeded, {} failed",
        summary.attempts, summary.succeeded, summary.failed
    );
    Ok(if summary.all_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn verify(args: &ArgMatches) -> color_eyre::Result<ExitCode> {
    let scenarios = Scenarios {
        overall_timeout: duration_flag(args, "timeout"),
        slow_delay: duration_flag(args, "slow"),
        short_delay: duration_flag(args, "short"),
        ..Default::default()
    };

    let results = scenarios.run_local().await?;
    for result in &results {
        println!("{result}");
    }

    Ok(if results.iter().all(|result| result.passed()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn parse_fetch_flags() {
        let args = cli()
            .try_get_matches_from([
                "hyperpath",
                "fetch",
                "http://example.com/",
                "--count",
                "3",
                "--timeout",
                "2s",
                "--ipv4",
                "--no-reuse",
            ])
            .unwrap();
        let (name, args) = args.subcommand().unwrap();
        assert_eq!(name, "fetch");
        assert_eq!(args.get_one::<u32>("count"), Some(&3));
        assert_eq!(duration_flag(args, "timeout"), Duration::from_secs(2));
        assert_eq!(duration_flag(args, "connect-timeout"), Duration::from_secs(30));
        assert!(args.get_flag("ipv4"));
        assert!(args.get_flag("no-reuse"));
        assert!(!args.get_flag("fresh-dns"));
    }

    #[test]
    fn reject_zero_count() {
        let err = cli()
            .try_get_matches_from(["hyperpath", "fetch", "http://example.com/", "-n", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_timeouts_parse() {
        let args = cli()
            .try_get_matches_from([
                "hyperpath",
                "fetch",
                "http://example.com/",
                "--timeout",
                "0s",
                "--connect-timeout",
                "0",
            ])
            .unwrap();
        let (_, args) = args.subcommand().unwrap();
        assert_eq!(duration_flag(args, "timeout"), Duration::ZERO);
        assert_eq!(duration_flag(args, "connect-timeout"), Duration::ZERO);
    }

    #[test]
    fn reject_bad_duration() {
        let err = cli()
            .try_get_matches_from(["hyperpath", "verify", "--timeout", "2"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
