pub fn init() {
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .unwrap_or_default();
}
