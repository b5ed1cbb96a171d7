//! Terminal output helpers.

use std::io::Write;

use colored::*;
use terminal_size::{terminal_size, Height, Width};

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat(width.0 as usize)
}

pub fn print_leo_header(model: &str, provider: &str) {
    let line = rule();
    println!("{}", line.black().bold());

    let name = "Leo".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  🦁 {} {}", name, version);

    println!("{}", format!("  {}  •  {}", model, provider).cyan());
    println!("  {}", "Type 'exit' to quit, /help for commands".black().bold());

    println!("{}", line.black().bold());
}

pub fn print_prompt() {
    print!("{} ", "›".cyan().bold());
    let _ = std::io::stdout().flush();
}

pub fn print_reply(content: &str) {
    println!("\n{}\n", content);
}

pub fn print_heartbeat(task: &str, reply: &str) {
    println!("\n  {} {}\n{}\n", "⏰".yellow(), task.yellow().bold(), reply);
}

/// One aligned `key  value` row, as used by `leo status`.
pub fn print_field(key: &str, value: &str) {
    println!("  {:<16} {}", key.bold(), value);
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_goodbye() {
    println!("  {}", "Goodbye!".green());
}
