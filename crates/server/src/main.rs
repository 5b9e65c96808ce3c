#[tokio::main]
async fn main() -> anyhow::Result<()> {
    linkup_server::run().await
}
