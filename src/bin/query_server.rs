use std::sync::Arc;
use anyhow::{Context, Result};
use thrtimer::config::ServerConfig;
use thrtimer::servers::query::QueryState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/query_server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: query_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    return Err(anyhow::anyhow!("--conf requires a FILE argument"));
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    let bind_addr = config.bind_addr();
    let state = Arc::new(QueryState::new(config)?);
    let _housekeeping = state.start_housekeeping();

    tracing::info!(
        "[query] [started] Query Server Started. max_statement_time_ms={}",
        state.config.max_statement_time_ms
    );

    tokio::select! {
        res = QueryState::run(Arc::clone(&state), &bind_addr) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[query] [shutdown] interrupt received");
        }
    }

    state.timers.shutdown();
    Ok(())
}
