//! kernelbox CLI - run a snippet or a file in a fresh kernel sandbox
//!
//! ```text
//! kernelbox [--otlp URL] [--keep] [--metrics] (-c CODE | FILE | -)
//! ```
//!
//! Settings come from `KERNELBOX_*` environment variables.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::warn;

use kernelbox::metrics::gather_metrics;
use kernelbox::telemetry::{init_tracing, shutdown_tracing};
use kernelbox::{AsyncKernelBox, BoxConfig};

/// Image outputs are written to the staging directory under this name
const IMAGE_FILE: &str = "output.png";

#[derive(Parser, Debug)]
#[command(name = "kernelbox", about = "Run Python code in a fresh Jupyter kernel sandbox")]
struct Cli {
    /// Code to execute
    #[arg(short = 'c', long = "code", conflicts_with = "file")]
    code: Option<String>,

    /// Source file to execute; `-` reads stdin
    #[arg(required_unless_present = "code")]
    file: Option<PathBuf>,

    /// OTLP collector endpoint for trace export
    #[arg(long)]
    otlp: Option<String>,

    /// Leave the container running and print its session identity
    #[arg(long)]
    keep: bool,

    /// Dump Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,
}

impl Cli {
    /// Read the code to run from whichever source was given
    async fn source(&self) -> std::io::Result<String> {
        match (&self.code, self.file.as_deref()) {
            (Some(code), _) => Ok(code.clone()),
            (None, Some(path)) if path == Path::new("-") => {
                let mut code = String::new();
                std::io::stdin().read_to_string(&mut code)?;
                Ok(code)
            }
            (None, Some(path)) => tokio::fs::read_to_string(path).await,
            (None, None) => Ok(String::new()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing("kernelbox", cli.otlp.as_deref()) {
        eprintln!("failed to initialize tracing: {e}");
    }

    let code = match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    };

    if cli.metrics {
        eprintln!("{}", gather_metrics());
    }
    shutdown_tracing();
    code
}

/// Returns whether the code ran without raising
async fn run(cli: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = BoxConfig::from_env()?;

    // 1. Read the code before spending time on a container
    let code = cli.source().await?;

    // 2. Container, gateway, kernel. A container may exist even when
    //    the gateway never became ready.
    let mut sandbox = AsyncKernelBox::docker(config);
    if let Err(e) = sandbox.start().await {
        if cli.keep {
            println!("{}", serde_json::to_string(&sandbox.identity())?);
        } else if let Err(stop_err) = sandbox.stop().await {
            warn!(error = %stop_err, "failed to remove container after start failure");
        }
        return Err(e.into());
    }

    // 3. Execute; stop the container even if the run failed
    let outcome = sandbox.run(&code).await;
    if cli.keep {
        println!("{}", serde_json::to_string(&sandbox.identity())?);
    } else {
        sandbox.stop().await?;
    }

    // 4. Report
    let outcome = outcome?;
    match outcome.image_bytes() {
        Some(png) => println!("{}", sandbox.upload(IMAGE_FILE, png).await?),
        None if outcome.is_error() => eprintln!("{outcome}"),
        None => println!("{outcome}"),
    }
    Ok(!outcome.is_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_code() {
        let cli = Cli::try_parse_from(["kernelbox", "-c", "print(1)", "--keep"]).unwrap();
        assert_eq!(cli.code.as_deref(), Some("print(1)"));
        assert!(cli.keep);
        assert!(!cli.metrics);
    }

    #[test]
    fn test_file_and_stdin() {
        let cli = Cli::try_parse_from(["kernelbox", "--otlp", "http://localhost:4317", "job.py"])
            .unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("job.py")));
        assert_eq!(cli.otlp.as_deref(), Some("http://localhost:4317"));

        let cli = Cli::try_parse_from(["kernelbox", "-"]).unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("-")));
    }

    #[test]
    fn test_source_required() {
        assert!(Cli::try_parse_from(["kernelbox"]).is_err());
        assert!(Cli::try_parse_from(["kernelbox", "-c", "1", "job.py"]).is_err());
    }

    #[test]
    fn test_command_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
