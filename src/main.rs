#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = attestia_rust::run().await {
        eprintln!("attestia-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
