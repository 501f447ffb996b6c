use liteline_core::config::AppConfig;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

/// Loads, validates and summarises the configuration at `file`.
pub fn check_config(file: &str, json: bool) -> CliResult<()> {
    print_info(&format!("Loading configuration from {file}..."));

    let config = AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;

    print_info("Validating configuration...");
    if let Err(e) = config.validate() {
        print_error(&e);
        return Err(CliError::Config(e));
    }

    print_success("Configuration is valid!");

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let peer_groups = config.peer_groups().map_err(CliError::Config)?;

    println!("Configuration Summary:");
    println!("  Logging: {} ({})", config.logging.level, config.logging.format);
    println!(
        "  Connection: timeout {}ms, reconnect {}ms, handshake {}ms",
        config.connection.default_timeout_ms,
        config.connection.reconnect_delay_ms,
        config.connection.handshake_timeout_ms
    );
    println!(
        "  Balancer: timeout {}ms, max errors {}, max attempts {}, retry delay {}ms",
        config.balancer.default_timeout_ms,
        config.balancer.max_errors_before_throw,
        config.balancer.max_attempts_until_ready,
        config.balancer.retry_delay_ms
    );
    println!(
        "  Priority: suppress after {} errors within {}ms, unsuppress after {} ready probes{}",
        config.priority.max_errors_until_suppressed,
        config.priority.err_counter_ttl_ms,
        config.priority.min_available_to_unsuppress,
        if config.priority.require_continuous_availability { " (continuous)" } else { "" }
    );

    for (index, (group, peers)) in config.groups.iter().zip(&peer_groups).enumerate() {
        let label = group.name.as_deref().unwrap_or("unnamed");
        println!("\n[Group {index}: {label}] ({} peers)", peers.len());
        for peer in peers {
            match peer.reconnect_timeout {
                Some(delay) => println!("  {peer} (reconnect {}ms)", delay.as_millis()),
                None => println!("  {peer}"),
            }
        }
    }

    Ok(())
}
