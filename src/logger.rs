use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// 默认 info 级别，可用 RUST_LOG 覆盖，例如 RUST_LOG=tgab_fetch=debug
pub fn init() {
    let registry = tracing_subscriber::registry();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_owned()))
        .with_thread_ids(true)
        .with_target(false);
    registry.with(filter).with(fmt).init();
}
