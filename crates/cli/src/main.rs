//! fieldnotes CLI entry point.

use clap::Parser;
use fieldnotes_cli::{run_doctor_command, run_generate_command, run_update_command, Args, Command};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let exit_code = match &args.command {
        Command::Generate(generate_args) => run_generate_command(generate_args).await,
        Command::Update(update_args) => run_update_command(update_args).await,
        Command::Doctor(doctor_args) => run_doctor_command(doctor_args).code(),
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
