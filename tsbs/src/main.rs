//! Entrypoint of the tsbs binary

use dotenvy::dotenv;
use tsbs_clap_blocks::{logging::LoggingConfig, tokio::TokioRuntimeConfig};

mod commands {
    pub(crate) mod common;
    pub(crate) mod generate_queries;
    pub(crate) mod load;
    pub(crate) mod run_queries;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "tsbs",
    version,
    about = "Time series benchmark suite: bulk load points and replay query corpora",
    long_about = r#"Time series benchmark suite: bulk load points and replay query corpora

Examples:
    # Load a data file into Prometheus with 4 workers
    tsbs load --file data.txt --url http://localhost:9090 --workers 4

    # Generate 1000 single-groupby queries over 100 hosts with a fixed seed
    tsbs generate-queries --query-type single-groupby-1-1-1 --scale 100 --seed 123 > queries.jsonl

    # Replay the corpus against two endpoints with debug logging
    tsbs run-queries -vv --file queries.jsonl --urls http://a:9090,http://b:9090 --workers 4

    # Full debug logging specified with LOG_FILTER
    LOG_FILTER=debug tsbs load --file data.txt
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioRuntimeConfig,

    #[clap(flatten)]
    logging_config: LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Bulk load points into the storage system under test
    Load(commands::load::Config),

    /// Generate a corpus of devops queries
    GenerateQueries(commands::generate_queries::Config),

    /// Replay a query corpus and report latency statistics
    RunQueries(commands::run_queries::Config),
}

fn main() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    install_crash_handler(); // attempt to render a useful stacktrace to stderr

    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    if let Err(e) = config.logging_config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    let tokio_runtime = config.runtime_config.builder()?.build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Load(config)) => {
                if let Err(e) = commands::load::command(config).await {
                    eprintln!("Load command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::GenerateQueries(config)) => {
                if let Err(e) = commands::generate_queries::command(config).await {
                    eprintln!("Generate queries command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::RunQueries(config)) => {
                if let Err(e) = commands::run_queries::command(config).await {
                    eprintln!("Run queries command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing env file is not an error, defaults apply
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

#[cfg(unix)]
fn install_crash_handler() {
    unsafe {
        set_signal_handler(libc::SIGSEGV, signal_handler); // handle segfaults
        set_signal_handler(libc::SIGILL, signal_handler); // handle stack overflow and unsupported CPUs
        set_signal_handler(libc::SIGBUS, signal_handler); // handle invalid memory access
    }
}

#[cfg(unix)]
unsafe extern "C" fn signal_handler(sig: i32) {
    use backtrace::Backtrace;
    use std::process::abort;
    let name = std::thread::current()
        .name()
        .map(|n| format!(" for thread \"{n}\""))
        .unwrap_or_default();
    eprintln!("Signal {sig}, Stack trace{name}\n{:?}", Backtrace::new());
    abort();
}

#[cfg(unix)]
unsafe fn set_signal_handler(signal: libc::c_int, handler: unsafe extern "C" fn(libc::c_int)) {
    use libc::{sigaction, sigfillset, sighandler_t};
    unsafe {
        let mut sigset = std::mem::zeroed();

        // block all signals while the handler runs
        if sigfillset(&mut sigset) != -1 {
            let mut action: sigaction = std::mem::zeroed();
            action.sa_mask = sigset;
            action.sa_sigaction = handler as sighandler_t;

            sigaction(signal, &action, std::ptr::null_mut());
        }
    }
}
