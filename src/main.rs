use rask_log_relay::app;

fn main() -> anyhow::Result<()> {
    app::relay_main()
}
