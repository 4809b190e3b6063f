use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(rollcall_app::run());
    // a pending stdin read holds a blocking thread until the next line arrives
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
