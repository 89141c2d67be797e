use crate::config::parse_interval_ms;
use crate::model::subscription::Subscription;

/// Commands accepted by the console consumer, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `<SYMBOL> <interval>`
    SelectTarget { symbol: String, interval: String },
    /// `<interval>` alone keeps the current symbol.
    SwitchTimeframe(String),
    /// `<SYMBOL>` alone keeps the current interval.
    SwitchSymbol(String),
    ShowWindow,
    Status,
    Quit,
}

impl ConsoleCommand {
    /// `(symbol, interval)` a switch command asks for. A lone symbol or
    /// interval takes the other half from `current`.
    pub fn target(&self, current: Option<&Subscription>) -> Option<(String, String)> {
        match self {
            Self::SelectTarget { symbol, interval } => Some((symbol.clone(), interval.clone())),
            Self::SwitchTimeframe(interval) => {
                current.map(|sub| (sub.symbol.clone(), interval.clone()))
            }
            Self::SwitchSymbol(symbol) => current.map(|sub| (symbol.clone(), sub.interval.clone())),
            _ => None,
        }
    }
}

pub fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next();
    if parts.next().is_some() {
        return None;
    }

    match (first.to_ascii_lowercase().as_str(), second) {
        ("q" | "quit" | "exit", None) => return Some(ConsoleCommand::Quit),
        ("s" | "show", None) => return Some(ConsoleCommand::ShowWindow),
        ("status", None) => return Some(ConsoleCommand::Status),
        _ => {}
    }

    match second {
        Some(interval) => {
            if parse_interval_ms(interval).is_err() || !is_symbol_token(first) {
                return None;
            }
            Some(ConsoleCommand::SelectTarget {
                symbol: first.to_ascii_uppercase(),
                interval: interval.to_string(),
            })
        }
        None if parse_interval_ms(first).is_ok() => {
            Some(ConsoleCommand::SwitchTimeframe(first.to_string()))
        }
        None if is_symbol_token(first) => Some(ConsoleCommand::SwitchSymbol(first.to_ascii_uppercase())),
        None => None,
    }
}

fn is_symbol_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}
