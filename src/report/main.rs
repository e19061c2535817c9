//! Standalone inspector for the bot's ledger file.
//!
//! Reads the JSON state file strictly, reports what the bot would load,
//! and exits with failure if the file is unreadable or malformed.

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;

use customer_otp_bot::config::DEFAULT_MAX_REQUESTS;
use customer_otp_bot::ledger::Ledger;

/// Ledger file inspector.
#[derive(Parser, Debug)]
#[command(name = "ledger_report")]
#[command(about = "Summarizes the OTP bot's ledger file")]
#[command(version)]
struct Args {
    /// Path to the ledger JSON file.
    #[arg(short, long, default_value = "state.json")]
    file: String,

    /// Per-user limit used to flag exhausted quotas.
    #[arg(short, long, env = "MAX_REQUESTS_PER_USER", default_value_t = DEFAULT_MAX_REQUESTS)]
    limit: u32,

    /// List every user, code, and cooldown.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    println!("Inspecting: {}\n", args.file);

    let ledger = match Ledger::parse_strict(&args.file) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("✗ {e}");
            eprintln!("  The bot would start from an empty ledger.");
            return ExitCode::FAILURE;
        }
    };

    report(&ledger, args.limit, args.verbose);
    ExitCode::SUCCESS
}

fn report(ledger: &Ledger, limit: u32, verbose: bool) {
    let now = Utc::now().timestamp();

    let exhausted = ledger.usage.values().filter(|r| r.count >= limit).count();
    let total: u64 = ledger.usage.values().map(|r| u64::from(r.count)).sum();
    let gated = ledger
        .cooldowns
        .values()
        .filter(|c| c.next_allowed_at > now)
        .count();

    if verbose {
        println!("Usage:");
        for (user, record) in &ledger.usage {
            let marker = if record.count >= limit { "✗" } else { " " };
            println!("  {marker} {user}: {}/{limit}", record.count);
        }

        println!("\nLast codes:");
        for (email, record) in &ledger.last_codes {
            println!(
                "    {email}: {} at {}",
                record.code,
                record.observed_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        println!("\nCooldowns:");
        for (user, cooldown) in &ledger.cooldowns {
            println!("    {user}: {}", cooldown_line(cooldown.next_allowed_at, now));
        }
        println!();
    }

    println!("✓ Ledger is readable");
    println!("  Users:           {} ({exhausted} at limit {limit})", ledger.usage.len());
    println!("  Requests counted: {total}");
    println!("  Cached codes:    {}", ledger.last_codes.len());
    println!("  Active cooldowns: {gated}/{}", ledger.cooldowns.len());
}

/// Describes a cooldown relative to `now`. Stored values are untrusted.
fn cooldown_line(next_allowed_at: i64, now: i64) -> String {
    let left = next_allowed_at.saturating_sub(now);
    if left > 0 {
        format!("{left}s left")
    } else {
        "expired".to_owned()
    }
}
