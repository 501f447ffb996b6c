use liteline_core::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: [&str; 2] = ["liteline_core", "liteline_cli"];

fn crate_filter(level: &str) -> EnvFilter {
    let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    EnvFilter::new(format!("warn,{}", directives.join(",")))
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(level) if level == "debug" || level == "trace" => crate_filter(&level),
        Ok(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| crate_filter(&config.level)),
        Err(_) => crate_filter(&config.level),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}
