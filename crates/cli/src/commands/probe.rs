use std::{future::Future, time::Duration};

use liteline_core::{
    config::AppConfig,
    schema::{GetMasterchainInfo, GetTime},
    EngineGroupBuilder, LiteEngine, LiteEngineExt, PriorityGroupEngine, QueryArgs,
};
use tracing::{info, warn};

use super::utils::{print_info, print_success, CliResult};

pub struct ProbeOptions {
    /// 0 runs until interrupted.
    pub queries: u64,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

fn build_engine(config: &AppConfig) -> CliResult<PriorityGroupEngine> {
    let engine = EngineGroupBuilder::from_config(config)?
        .debug_sink(std::sync::Arc::new(|message: &str| print_info(message)))
        .build()?;
    Ok(engine)
}

/// Issues `getMasterchainInfo` in a loop and reports each outcome.
pub async fn probe(config: &AppConfig, options: ProbeOptions) -> CliResult<()> {
    let engine = build_engine(config)?;
    let tally = run_queries(&engine, &options, tokio::signal::ctrl_c()).await;
    engine.close();

    print_success(&format!("{} succeeded, {} failed", tally.succeeded, tally.failed));
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    succeeded: u64,
    failed: u64,
}

/// Runs the query loop until the count is reached or `interrupted` resolves.
async fn run_queries<E, I>(engine: &E, options: &ProbeOptions, interrupted: I) -> Tally
where
    E: LiteEngine + ?Sized,
    I: Future,
{
    let args = QueryArgs::default().with_timeout(Duration::from_millis(options.timeout_ms));
    let interval = Duration::from_millis(options.interval_ms);
    let mut tally = Tally::default();
    let mut i = 0u64;

    // one listener for the whole run, so an interrupt during a call is not lost
    tokio::pin!(interrupted);

    loop {
        if options.queries != 0 && i >= options.queries {
            break;
        }

        tokio::select! {
            _ = &mut interrupted => break,
            () = tokio::time::sleep(interval) => {}
        }

        info!(query = i, "query running");
        let result = tokio::select! {
            _ = &mut interrupted => {
                info!(query = i, "interrupted while waiting for an answer");
                break;
            }
            result = engine.call(GetMasterchainInfo, (), args) => result,
        };
        match result {
            Ok(info) => {
                tally.succeeded += 1;
                info!(query = i, seqno = info.last.seqno, workchain = info.last.workchain, "query succeeded");
            }
            Err(e) => {
                tally.failed += 1;
                warn!(query = i, error = %e, "query failed");
            }
        }
        i += 1;
    }
    tally
}

/// Prints the remote unix time.
pub async fn remote_time(config: &AppConfig, timeout_ms: u64) -> CliResult<()> {
    let engine = build_engine(config)?;
    let args = QueryArgs::default().with_timeout(Duration::from_millis(timeout_ms));

    let result = engine.call(GetTime, (), args).await;
    engine.close();

    let now = result?;
    println!("{now}");
    Ok(())
}
