use overflow_queue_cli::{run_cli, CliError};

#[tokio::main]
async fn main() {
    // Run CLI and handle errors
    if let Err(e) = run_cli().await {
        // Exit with appropriate code based on error type
        let exit_code = match e {
            CliError::Configuration(_) => 1,
            CliError::Queue(_) => 2,
            CliError::CommandFailed { .. } => 3,
            CliError::InvalidArgument { .. } => 4,
            CliError::Io(_) => 5,
        };

        eprintln!("Error: {:#}", anyhow::Error::new(e));
        std::process::exit(exit_code);
    }
}
