//! Output formatting utilities for the CLI
//!
//! Tables for persisted tunnels, a short address summary and colored status
//! messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use kf_core::{RemoteAddress, Tunnel};

/// Format persisted tunnels as an ASCII table
///
/// The detailed view adds protocol, source description and process columns.
pub fn format_tunnels(tunnels: &[Tunnel], detailed: bool) -> String {
    if tunnels.is_empty() {
        return "No forwarded ports stored".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "REMOTE")]
        remote: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PRIVACY")]
        privacy: String,
    }

    #[derive(Tabled)]
    struct TunnelRowDetailed {
        #[tabled(rename = "REMOTE")]
        remote: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PRIVACY")]
        privacy: String,
        #[tabled(rename = "PROTOCOL")]
        protocol: String,
        #[tabled(rename = "SOURCE")]
        source: String,
        #[tabled(rename = "PROCESS")]
        process: String,
    }

    if detailed {
        let rows: Vec<TunnelRowDetailed> = tunnels
            .iter()
            .map(|t| TunnelRowDetailed {
                remote: t.key(),
                local: t.local_address.clone(),
                name: or_dash(t.name.as_deref()),
                privacy: t.privacy.to_string(),
                protocol: t.protocol.to_string(),
                source: t.source.description.clone(),
                process: match (&t.running_process, t.pid) {
                    (Some(process), Some(pid)) => format!("{} ({})", truncate(process, 40), pid),
                    (Some(process), None) => truncate(process, 40),
                    _ => "-".to_string(),
                },
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<TunnelRow> = tunnels
            .iter()
            .map(|t| TunnelRow {
                remote: t.key(),
                local: t.local_address.clone(),
                name: or_dash(t.name.as_deref()),
                privacy: t.privacy.to_string(),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format a parsed address as `key = value` lines
pub fn format_address(address: &RemoteAddress) -> String {
    format!(
        "host: {}\nport: {}\nkey:  {}",
        address.host,
        address.port,
        address.key()
    )
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
