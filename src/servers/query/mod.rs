pub mod packet;
pub mod session;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::timer::{TimerHandle, TimerService};
use packet::{build_status, parse_command, Command, RESP_OK, RESP_PONG, RESP_TIMEOUT};
use session::Session;

pub struct QueryState {
    pub config: ServerConfig,
    pub timers: TimerService,
    /// Statements killed by their time limit
    pub max_statement_time_exceeded: Arc<AtomicU64>,
    /// Open client connections
    pub connections: Arc<AtomicUsize>,
    next_session: AtomicU32,
}

impl QueryState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let timers = TimerService::init(&config.timer).context("Cannot start timer service")?;
        Ok(Self {
            config,
            timers,
            max_statement_time_exceeded: Arc::new(AtomicU64::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
            next_session: AtomicU32::new(1),
        })
    }

    /// State for tests: loopback config with the given statement limit and
    /// no housekeeping timer.
    pub fn test_only(max_statement_time_ms: u64) -> Self {
        let config = ServerConfig {
            bind_ip: "127.0.0.1".to_string(),
            port: 0,
            max_statement_time_ms,
            status_interval_secs: 0,
            timer: crate::config::TimerConfig {
                capacity: 16,
                ..Default::default()
            },
        };
        Self::new(config).expect("timer service for tests")
    }

    /// Arm the periodic status log. `None` when disabled or not armable.
    pub fn start_housekeeping(&self) -> Option<TimerHandle> {
        let interval_secs = self.config.status_interval_secs;
        if interval_secs == 0 {
            return None;
        }

        let connections = Arc::clone(&self.connections);
        let exceeded = Arc::clone(&self.max_statement_time_exceeded);
        let timer = self.timers.create_timer(move || {
            tracing::info!(
                "[query] [status] connections={} max_statement_time_exceeded={}",
                connections.load(Ordering::Relaxed),
                exceeded.load(Ordering::Relaxed)
            );
        });

        let micros = interval_secs.saturating_mul(1_000_000);
        timer.set_period(micros);
        if let Err(e) = timer.arm(micros) {
            tracing::warn!("[query] [housekeeping_disabled] error={}", e);
            return None;
        }
        Some(timer)
    }

    pub async fn run(state: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        tracing::info!("[query] [ready] addr={}", bind_addr);
        loop {
            let (stream, peer) = listener.accept().await?;
            let s = Arc::clone(&state);
            tokio::spawn(async move {
                QueryState::handle_new_connection(s, stream, peer).await;
            });
        }
    }

    pub async fn handle_new_connection(state: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = state.next_session.fetch_add(1, Ordering::Relaxed);
        state.connections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[query] [connect] session={} peer={}", id, peer);

        if let Err(e) = handle_client(&state, stream, id).await {
            tracing::debug!("[query] [client_error] session={} error={}", id, e);
        }

        state.connections.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!("[query] [disconnect] session={}", id);
    }
}

async fn handle_client(state: &QueryState, stream: TcpStream, id: u32) -> Result<()> {
    let mut session = Session::new(
        id,
        &state.timers,
        state.config.max_statement_time_ms,
        Arc::clone(&state.max_statement_time_exceeded),
    );

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match parse_command(&line) {
            Ok(cmd) => match execute(state, &mut session, cmd).await {
                Some(resp) => resp,
                None => break,
            },
            Err(resp) => resp.to_string(),
        };
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Run one command. `None` ends the connection.
async fn execute(state: &QueryState, session: &mut Session, cmd: Command) -> Option<String> {
    let response = match cmd {
        Command::Ping => RESP_PONG.to_string(),
        Command::Sleep(ms) => {
            if session.run_statement(ms).await {
                RESP_OK.to_string()
            } else {
                RESP_TIMEOUT.to_string()
            }
        }
        Command::SetMaxStatementTime(ms) => {
            session.max_statement_time_ms = ms;
            RESP_OK.to_string()
        }
        Command::Status => {
            let stats = state.timers.stats();
            build_status(
                state.max_statement_time_exceeded.load(Ordering::Relaxed),
                stats.armed,
                stats.fired,
            )
        }
        Command::Quit => return None,
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_housekeeping_disabled_by_default_in_tests() {
        let state = QueryState::test_only(0);
        assert!(state.start_housekeeping().is_none());
        assert_eq!(state.timers.stats().armed, 0);
    }

    #[test]
    fn test_housekeeping_is_periodic() {
        let mut state = QueryState::test_only(0);
        state.config.status_interval_secs = 30;
        let timer = state.start_housekeeping().unwrap();
        assert_eq!(timer.period(), 30_000_000);
        assert!(!timer.is_expired());
    }

    #[tokio::test]
    async fn test_execute_quit_ends_connection() {
        let state = QueryState::test_only(0);
        let mut session = Session::new(
            1,
            &state.timers,
            0,
            Arc::clone(&state.max_statement_time_exceeded),
        );
        assert_eq!(
            execute(&state, &mut session, Command::Ping).await.as_deref(),
            Some(RESP_PONG)
        );
        assert!(execute(&state, &mut session, Command::Quit).await.is_none());
    }
}
