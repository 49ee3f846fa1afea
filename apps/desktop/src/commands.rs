//! Line commands typed at the terminal.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Draft(String),
    Submit,
    /// One-based row number as displayed.
    Toggle(usize),
    Delete(usize),
    List,
    Help,
    Quit,
}

pub const HELP: &str = "commands: add <title> | draft <text> | submit | toggle <n> | delete <n> | list | quit";

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "add" => Ok(Command::Add(rest.to_string())),
        "draft" => Ok(Command::Draft(rest.to_string())),
        "submit" => Ok(Command::Submit),
        "toggle" => parse_row(rest).map(Command::Toggle),
        "delete" | "rm" => parse_row(rest).map(Command::Delete),
        "list" | "ls" => Ok(Command::List),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_row(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("expected a row number, got '{raw}'")),
    }
}
