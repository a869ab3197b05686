use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = hotdsp_lib::Cli::parse();
    hotdsp_lib::run(cli).await
}
