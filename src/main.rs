#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fieldcheck_lib::run().await
}
