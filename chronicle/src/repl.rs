//! The interactive loop.
//!
//! A simple line-oriented protocol:
//! - Lines starting with `#` are commands
//! - Everything else is sent to the narrator as a player action

use chronicle_core::{
    CharacterRecord, Ended, Orchestrator, SessionConfig, SessionId, SessionStatus, SessionView, ThreadFilter, UiHint,
};
use std::io::{self, BufRead, Write};
use tracing::warn;

const HELP: &[(&str, &str)] = &[
    ("#status", "Show the session state"),
    ("#pause", "Pause the session"),
    ("#resume", "Resume with a recap"),
    ("#end", "Finish the session and roll the outcome"),
    ("#claim", "Apply the rewards of a finished session"),
    ("#abort", "Abandon the session"),
    ("#date <days>", "Shift the in-world date by a number of days"),
    ("#recruit <name>", "Accept a recruitment offer"),
    ("#threads", "List active story threads"),
    ("#history", "List finished sessions and adventures"),
    ("#quit", "Exit (the session stays where it is)"),
];

fn print_help() {
    println!("[HELP]");
    for (command, description) in HELP {
        println!("  {command:<16} - {description}");
    }
    println!("  (anything else is sent as a player action)");
}

pub async fn run(orchestrator: &Orchestrator, character: CharacterRecord, config: SessionConfig) -> anyhow::Result<()> {
    println!("=== Chronicle ===");
    println!(
        "Character: {} (level {} {}) [{}]",
        character.name, character.level, character.class, character.id
    );
    println!("HP: {}/{}", character.hit_points.current, character.hit_points.maximum);
    println!("Date: {}", character.calendar);
    println!();

    let session_id = match orchestrator.records().open_session_for(character.id).await? {
        Some(open) => {
            println!("[SESSION] Continuing {} session {}", open.status, open.id);
            if open.status == SessionStatus::Paused {
                println!("  (type #resume to continue)");
            }
            open.id
        }
        None => {
            let started = orchestrator.start(character.id, config).await?;
            println!("[NARRATOR]");
            println!("{}", started.narration);
            print_hints(&started.hints);
            println!();
            started.session.id
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            if name == "quit" || name == "exit" {
                println!("Goodbye!");
                break;
            }
            if let Err(e) = command_line(orchestrator, character.id, session_id, name, arg).await {
                println!("[ERROR] {e}");
            }
            stdout.flush().ok();
            continue;
        }

        print!("[THINKING]");
        stdout.flush().ok();
        let result = orchestrator.act(session_id, line).await;
        print!("\r          \r");
        stdout.flush().ok();

        match result {
            Ok(turn) => {
                println!("[NARRATOR]");
                for para in turn.narration.split("\n\n") {
                    println!("{para}");
                }
                print_hints(&turn.hints);
                println!();
            }
            Err(e) => {
                warn!(error = %e, "turn failed");
                println!("[ERROR] {e}");
            }
        }
    }

    Ok(())
}

async fn command_line(
    orchestrator: &Orchestrator,
    character_id: chronicle_core::CharacterId,
    session_id: SessionId,
    name: &str,
    arg: &str,
) -> anyhow::Result<()> {
    match name {
        "status" => print_status(&orchestrator.status(session_id).await?),
        "pause" => {
            orchestrator.pause(session_id).await?;
            println!("[PAUSED] Type #resume to continue.");
        }
        "resume" => {
            let resumed = orchestrator.resume(session_id).await?;
            println!("[RECAP]");
            println!("{}", resumed.recap);
        }
        "end" => print_ended(&orchestrator.end(session_id).await?),
        "claim" => {
            let claimed = orchestrator.claim(session_id).await?;
            let applied = &claimed.applied;
            println!("[CLAIMED]");
            println!(
                "  +{} XP, +{} gp, -{} gp, -{} HP",
                applied.experience, applied.gold_gained, applied.gold_lost, applied.hp_lost
            );
            if let Some(level) = applied.level_up {
                println!("  {} reached level {level}!", claimed.character.name);
            }
            for companion in &claimed.companions {
                println!("  {}: +{} XP", companion.name, companion.experience);
            }
        }
        "abort" => {
            orchestrator.abort(session_id).await?;
            println!("[ABORTED] No rewards were granted.");
        }
        "date" => {
            let days: i64 = arg.parse().map_err(|_| anyhow::anyhow!("usage: #date <days>"))?;
            let date = orchestrator.adjust_date(session_id, days).await?;
            println!("[DATE] {date}");
        }
        "recruit" => {
            if arg.is_empty() {
                anyhow::bail!("usage: #recruit <name>");
            }
            let companion = orchestrator.accept_recruit(session_id, arg).await?;
            println!("[RECRUITED] {} (level {} {})", companion.name, companion.level, companion.class);
        }
        "threads" => {
            let threads = orchestrator
                .threads()
                .list_active(character_id, &ThreadFilter::new())
                .await?;
            println!("[THREADS]");
            if threads.is_empty() {
                println!("  (none)");
            }
            for thread in threads {
                println!("  [{} | {}] {}", thread.thread_type, thread.relevance.name(), thread.title);
                println!("    {}", thread.description);
            }
        }
        "history" => {
            println!("[HISTORY]");
            for entry in orchestrator.history(character_id).await? {
                println!(
                    "  {} {} ({} risk): {}, {} XP, {} gp{}",
                    entry.ended_on,
                    entry.activity,
                    entry.risk,
                    if entry.success { "success" } else { "failure" },
                    entry.experience,
                    entry.gold,
                    if entry.claimed { "" } else { " (unclaimed)" }
                );
            }
        }
        "help" => print_help(),
        _ => println!("[ERROR] Unknown command. Type #help for help."),
    }
    Ok(())
}

fn print_status(view: &SessionView) {
    println!("[STATUS]");
    println!("  Session: {} ({})", view.id, view.status);
    println!("  Activity: {} at {} risk", view.activity, view.risk);
    println!("  Date: {} ({} hours in)", view.calendar, view.game_hours);
    println!("  Turns: {}", view.turns);
    if view.combat.active {
        let order: Vec<String> = view
            .combat
            .combatants
            .iter()
            .map(|c| format!("{} ({})", c.name, c.initiative))
            .collect();
        println!("  In combat: {}", order.join(", "));
    }
    for (target, conditions) in &view.conditions {
        println!("  {target}: {}", conditions.join(", "));
    }
    if let Some(merchant) = &view.merchant.open {
        println!("  Trading with: {merchant}");
    }
    for offer in &view.recruit_offers {
        println!("  Offer: {} wants to join (#recruit {})", offer.name, offer.name);
    }
}

fn print_ended(ended: &Ended) {
    let rewards = &ended.rewards;
    let outcome = &rewards.outcome;
    println!(
        "[ENDED] {} (rolled {:.2} against {:.0}%)",
        if outcome.success { "Success" } else { "Failure" },
        outcome.roll,
        outcome.odds.final_chance * 100.0
    );
    if outcome.success {
        println!("  {} XP, {} gp", rewards.experience, rewards.gold);
    } else {
        println!("  {} HP lost, {} gp lost", rewards.hp_loss, rewards.gold_loss);
        if rewards.equipment_damaged {
            println!("  Equipment damaged");
        }
        if let Some(debuff) = &rewards.debuff {
            println!("  {} for {} hours", debuff.condition, debuff.hours);
        }
    }
    for item in &rewards.loot {
        println!("  Loot: {} x{}", item.item, item.quantity);
    }
    for thread in &ended.threads {
        println!("  New thread: {}", thread.title);
    }
    println!("  Type #claim to apply these.");
}

fn print_hints(hints: &[UiHint]) {
    for hint in hints {
        match hint {
            UiHint::CombatStarted { combatants } => println!("[COMBAT] {}", combatants.join(", ")),
            UiHint::CombatEnded => println!("[COMBAT] Over"),
            UiHint::ConditionAdded { target, condition } => println!("[CONDITION] {target} is {condition}"),
            UiHint::ConditionRemoved { target, condition } => {
                println!("[CONDITION] {target} is no longer {condition}")
            }
            UiHint::LootFound { item, quantity } => println!("[LOOT] {item} x{quantity} (on claim)"),
            UiHint::ItemReceived { item, quantity } => println!("[ITEM] {item} x{quantity}"),
            UiHint::MerchantOpened { merchant } => println!("[SHOP] {merchant}"),
            UiHint::MerchantReferred { merchant } => println!("[SHOP] Referred to {merchant}"),
            UiHint::RecruitmentOffered { name } => println!("[RECRUIT] {name} offers to join (#recruit {name})"),
            UiHint::ConditionsExpired { conditions } => println!("[EXPIRED] {}", conditions.join(", ")),
        }
    }
}
