use rask_telemetry::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
