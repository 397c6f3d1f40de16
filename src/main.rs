#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    depthcap::app::run().await
}
