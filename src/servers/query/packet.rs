//! Line protocol of the statement-timeout server.
//!
//! One command per line, one response line per command.

/// A parsed client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    /// Run a statement for the given number of milliseconds
    Sleep(u64),
    /// Change this session's statement limit (ms, 0 = unlimited)
    SetMaxStatementTime(u64),
    Status,
    Quit,
}

pub const RESP_OK: &str = "OK";
pub const RESP_PONG: &str = "OK PONG";
pub const RESP_TIMEOUT: &str = "ERR max_statement_time exceeded";
pub const RESP_UNKNOWN: &str = "ERR unknown command";
pub const RESP_BAD_ARG: &str = "ERR bad argument";

/// Parse one request line. Keywords are case-insensitive.
///
/// Returns `Err` with the response to send when the line is not a valid
/// command.
pub fn parse_command(line: &str) -> Result<Command, &'static str> {
    let line = line.trim();
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (line, ""),
    };

    match keyword.to_ascii_uppercase().as_str() {
        "PING" => Ok(Command::Ping),
        "STATUS" => Ok(Command::Status),
        "QUIT" => Ok(Command::Quit),
        "SLEEP" => rest.parse().map(Command::Sleep).map_err(|_| RESP_BAD_ARG),
        "SET" => {
            let (name, value) = rest.split_once('=').ok_or(RESP_BAD_ARG)?;
            if !name.trim().eq_ignore_ascii_case("max_statement_time") {
                return Err(RESP_UNKNOWN);
            }
            value
                .trim()
                .parse()
                .map(Command::SetMaxStatementTime)
                .map_err(|_| RESP_BAD_ARG)
        }
        _ => Err(RESP_UNKNOWN),
    }
}

/// `STATUS` response body.
pub fn build_status(exceeded: u64, armed: usize, fired: u64) -> String {
    format!("OK exceeded={} armed={} fired={}", exceeded, armed, fired)
}
