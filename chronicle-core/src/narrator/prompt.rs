//! Prompt assembly for opening, action and recap turns.

use super::{Prompt, PromptMessage};
use crate::character::{CharacterRecord, Companion};
use crate::session::{Session, Speaker, Turn};

/// Everything a narrator prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub character: &'a CharacterRecord,
    pub second: Option<&'a CharacterRecord>,
    pub companions: &'a [Companion],
    pub session: &'a Session,
    /// Pre-rendered story thread lines, possibly empty.
    pub threads: &'a str,
    pub transcript_tail: usize,
}

pub fn system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();

    prompt.push_str(include_str!("prompts/narrator.txt"));
    prompt.push_str("\n\n");
    prompt.push_str(include_str!("prompts/markers.txt"));

    prompt.push_str("\n\n## Player Character\n");
    push_character(&mut prompt, ctx.character);
    if let Some(second) = ctx.second {
        prompt.push_str("\n## Second Character\n");
        push_character(&mut prompt, second);
    }

    if !ctx.companions.is_empty() {
        prompt.push_str("\n## Companions\n");
        for companion in ctx.companions {
            prompt.push_str(&format!(
                "- {} (level {} {}, HP {}/{})",
                companion.name,
                companion.level,
                companion.class,
                companion.hit_points.current,
                companion.hit_points.maximum
            ));
            if !companion.conditions.is_empty() {
                prompt.push_str(&format!(" [{}]", companion.conditions.join(", ")));
            }
            prompt.push('\n');
        }
    }

    let session = ctx.session;
    let date = session.calendar;
    prompt.push_str("\n## Current Situation\n");
    prompt.push_str(&format!(
        "Date: {} ({}, {})\n",
        date,
        date.season().name(),
        date.time_of_day()
    ));
    if let Some(festival) = date.festival() {
        prompt.push_str(&format!("Today is the festival of {}.\n", festival.name()));
    }
    if let Some(location) = &session.config.location {
        prompt.push_str(&format!("Location: {location}\n"));
    }
    prompt.push_str(&format!(
        "Activity: {} at {} risk{}\n",
        session.config.activity,
        session.config.risk,
        if session.config.quest_advancing {
            ", advancing the main quest"
        } else {
            ""
        }
    ));

    if session.combat.active {
        let order: Vec<String> = session
            .combat
            .combatants
            .iter()
            .map(|c| format!("{} ({})", c.name, c.initiative))
            .collect();
        prompt.push_str(&format!("In combat. Initiative order: {}\n", order.join(", ")));
    }
    if let Some(merchant) = &session.merchant.open {
        prompt.push_str(&format!("Trading with: {merchant}\n"));
    }

    let others: Vec<String> = session
        .conditions
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(&ctx.character.name))
        .map(|(name, list)| format!("{name}: {}", list.join(", ")))
        .collect();
    if !others.is_empty() {
        prompt.push_str(&format!("Other conditions: {}\n", others.join("; ")));
    }

    if !ctx.threads.is_empty() {
        prompt.push_str("\n## Active Story Threads\n");
        prompt.push_str("Weave these into the story where they fit naturally.\n");
        prompt.push_str(ctx.threads);
        prompt.push('\n');
    }

    if !session.config.used_npc_names.is_empty() {
        prompt.push_str("\n## Names Already Used\n");
        prompt.push_str("Do not give new NPCs any of these names: ");
        prompt.push_str(&session.config.used_npc_names.join(", "));
        prompt.push('\n');
    }

    let tail = session.tail(ctx.transcript_tail);
    if !tail.is_empty() {
        prompt.push_str("\n## Recent Events\n");
        push_turns(&mut prompt, tail);
    }

    prompt
}

fn push_character(prompt: &mut String, pc: &CharacterRecord) {
    prompt.push_str(&format!("**Name:** {}\n", pc.name));
    prompt.push_str(&format!("**Level:** {} {}\n", pc.level, pc.class));
    prompt.push_str(&format!(
        "**HP:** {}/{}\n",
        pc.hit_points.current, pc.hit_points.maximum
    ));
    prompt.push_str(&format!("**Gold:** {}\n", pc.purse.gold_value()));
    if pc.conditions.is_empty() {
        prompt.push_str("**Conditions:** none\n");
    } else {
        prompt.push_str(&format!("**Conditions:** {}\n", pc.condition_names().join(", ")));
    }
    if pc.equipment_damaged {
        prompt.push_str("Their equipment is damaged and needs repair.\n");
    }
}

fn push_turns(prompt: &mut String, turns: &[Turn]) {
    for turn in turns {
        let speaker = match turn.speaker {
            Speaker::Player => "Player",
            Speaker::Narrator => "Narrator",
        };
        prompt.push_str(&format!("{speaker}: {}\n", turn.text));
    }
}

/// First narration of a new session.
pub fn opening(ctx: &PromptContext<'_>) -> Prompt {
    let mut request = String::from("Open the session. Set the scene");
    if let Some(location) = &ctx.session.config.location {
        request.push_str(&format!(" in {location}"));
    }
    request.push_str(&format!(
        " and present a hook for a {} activity.",
        ctx.session.config.activity
    ));
    Prompt::new(system_prompt(ctx)).with_message(PromptMessage::user(request))
}

/// Narration in response to a player action.
pub fn action(ctx: &PromptContext<'_>, action: &str) -> Prompt {
    Prompt::new(system_prompt(ctx)).with_message(PromptMessage::user(action))
}

/// A short "previously on" summary when a paused session resumes.
pub fn recap(ctx: &PromptContext<'_>, recap_turns: usize) -> Prompt {
    let mut request = String::from(
        "The player is returning after a break. In two or three sentences, recap what happened most recently, then restate where things stand. Do not emit any directives.\n\n",
    );
    push_turns(&mut request, ctx.session.tail(recap_turns));
    Prompt::new(system_prompt(ctx)).with_message(PromptMessage::user(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeRatio;
    use crate::session::SessionConfig;
    use chrono::Utc;

    fn session_for(pc: &CharacterRecord) -> Session {
        Session::new(
            pc.id,
            SessionConfig::new()
                .with_location("Phandalin")
                .with_used_npc_names(vec!["Toblen".into(), "Sildar".into()]),
            TimeRatio::OneToOne,
            pc.calendar,
            Utc::now(),
        )
    }

    #[test]
    fn test_system_prompt_sections() {
        let mut pc = CharacterRecord::new("Aria", "rogue", 3, 18);
        pc.add_condition("poisoned", "test", None);
        let session = session_for(&pc);
        let ctx = PromptContext {
            character: &pc,
            second: None,
            companions: &[],
            session: &session,
            threads: "- [intel | high] Rumours: something stirs",
            transcript_tail: 12,
        };

        let prompt = system_prompt(&ctx);
        assert!(prompt.contains("[CONDITION_ADD: Target="));
        assert!(prompt.contains("**Name:** Aria"));
        assert!(prompt.contains("**Conditions:** poisoned"));
        assert!(prompt.contains("Date: 1 Ches 1492 DR, 10:00 (spring"));
        assert!(prompt.contains("Location: Phandalin"));
        assert!(prompt.contains("## Active Story Threads"));
        assert!(prompt.contains("Toblen, Sildar"));
        assert!(!prompt.contains("## Recent Events"));
    }

    #[test]
    fn test_action_prompt_carries_tail() {
        let pc = CharacterRecord::new("Aria", "rogue", 3, 18);
        let mut session = session_for(&pc);
        let now = Utc::now();
        for i in 0..4 {
            session.push_turn(Speaker::Player, format!("move {i}"), Vec::new(), now);
        }
        let ctx = PromptContext {
            character: &pc,
            second: None,
            companions: &[],
            session: &session,
            threads: "",
            transcript_tail: 2,
        };

        let prompt = action(&ctx, "search the room");
        assert_eq!(prompt.last_user(), Some("search the room"));
        assert!(prompt.system.contains("Player: move 3"));
        assert!(!prompt.system.contains("move 1"));
        assert!(!prompt.system.contains("## Active Story Threads"));
    }
}
