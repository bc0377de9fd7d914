use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = crossover::cli::Cli::parse();
    if let Err(e) = crossover::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
