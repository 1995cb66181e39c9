use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    chainlog_gateway::run().await?;
    Ok(())
}
