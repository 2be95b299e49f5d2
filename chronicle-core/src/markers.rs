//! Marker protocol: structured directives embedded in narrator prose.
//!
//! The narrator is instructed to emit bracketed tags such as
//!
//! ```text
//! [CONDITION_ADD: Target="Player" Condition="Poisoned"]
//! [NPC_JOIN: Name="Mira Thorne" Class="Cleric" Level="3"]
//! ```
//!
//! Keywords and keys are case-insensitive, keys may appear in any order and
//! values may contain spaces (but not `"` or `]`). Parsing never fails: a
//! directive missing a required key is dropped on its own and logged, the
//! rest of the block still yields events.

use lazy_static::lazy_static;
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use tracing::debug;

lazy_static! {
    static ref TAG_RE: Regex =
        Regex::new(r"\[\s*([A-Za-z_]+)\s*(?::([^\]]*))?\]").expect("valid tag regex");
    static ref FIELD_RE: Regex =
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*"([^"]*)""#).expect("valid field regex");
}

/// The directive kinds the narrator may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    CombatStart,
    CombatEnd,
    ConditionAdd,
    ConditionRemove,
    LootDrop,
    ItemAdd,
    MerchantOpen,
    MerchantRefer,
    NpcJoin,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 9] = [
        MarkerKind::CombatStart,
        MarkerKind::CombatEnd,
        MarkerKind::ConditionAdd,
        MarkerKind::ConditionRemove,
        MarkerKind::LootDrop,
        MarkerKind::ItemAdd,
        MarkerKind::MerchantOpen,
        MarkerKind::MerchantRefer,
        MarkerKind::NpcJoin,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            MarkerKind::CombatStart => "COMBAT_START",
            MarkerKind::CombatEnd => "COMBAT_END",
            MarkerKind::ConditionAdd => "CONDITION_ADD",
            MarkerKind::ConditionRemove => "CONDITION_REMOVE",
            MarkerKind::LootDrop => "LOOT_DROP",
            MarkerKind::ItemAdd => "ITEM_ADD",
            MarkerKind::MerchantOpen => "MERCHANT_OPEN",
            MarkerKind::MerchantRefer => "MERCHANT_REFER",
            MarkerKind::NpcJoin => "NPC_JOIN",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<MarkerKind> {
        MarkerKind::ALL
            .iter()
            .copied()
            .find(|k| k.keyword().eq_ignore_ascii_case(keyword.trim()))
    }

    /// Lower-cased keys a directive of this kind must carry.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            MarkerKind::CombatStart => &["participants"],
            MarkerKind::CombatEnd => &[],
            MarkerKind::ConditionAdd | MarkerKind::ConditionRemove => &["target", "condition"],
            MarkerKind::LootDrop | MarkerKind::ItemAdd => &["item"],
            MarkerKind::MerchantOpen | MarkerKind::MerchantRefer => &["merchant"],
            MarkerKind::NpcJoin => &["name"],
        }
    }

    /// Keys whose values are shown to the player and keep their casing.
    fn is_display_key(&self, key: &str) -> bool {
        match self {
            MarkerKind::CombatStart => key == "participants",
            MarkerKind::NpcJoin => matches!(key, "name" | "description"),
            _ => false,
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One combatant from a `COMBAT_START` participant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombatantEntry {
    pub name: String,
    pub initiative: i32,
}

/// A typed fact extracted from one narrator turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEvent {
    pub kind: MarkerKind,
    /// Lower-cased keys to normalized values.
    pub fields: BTreeMap<String, String>,
    /// The directive exactly as it appeared.
    pub raw: String,
    /// Byte range of `raw` in the source text.
    pub span: Range<usize>,
}

impl MarkerEvent {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `Quantity` field, defaulting to 1 when absent or unparsable.
    pub fn quantity(&self) -> u32 {
        self.get("quantity")
            .and_then(|q| q.parse::<u32>().ok())
            .filter(|q| *q > 0)
            .unwrap_or(1)
    }

    /// Parsed `Participants` list, highest initiative first.
    pub fn participants(&self) -> Vec<CombatantEntry> {
        self.get("participants")
            .map(parse_participants)
            .unwrap_or_default()
    }
}

/// Result of running the parser over one narrator reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedNarration {
    pub events: Vec<MarkerEvent>,
    /// Narration with directive spans removed, for player display.
    pub display_text: String,
    /// Recognized directives that were dropped as malformed.
    pub dropped: usize,
}

/// Lower-case and collapse whitespace.
pub fn normalize(value: &str) -> String {
    collapse_whitespace(value).to_lowercase()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `"Aria:17, Goblin Boss:12"`. Entries without a valid initiative
/// are skipped.
pub fn parse_participants(list: &str) -> Vec<CombatantEntry> {
    let mut entries: Vec<CombatantEntry> = list
        .split([',', ';'])
        .filter_map(|entry| {
            let (name, init) = entry.rsplit_once(':')?;
            let name = collapse_whitespace(name);
            let initiative = init.trim().parse::<i32>().ok()?;
            (!name.is_empty()).then_some(CombatantEntry { name, initiative })
        })
        .collect();
    entries.sort_by(|a, b| b.initiative.cmp(&a.initiative));
    entries
}

/// Extract every directive from `text`.
pub fn parse(text: &str) -> ParsedNarration {
    let mut events = Vec::new();
    let mut spans = Vec::new();
    let mut dropped = 0;

    for caps in TAG_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(kind) = caps.get(1).and_then(|k| MarkerKind::from_keyword(k.as_str())) else {
            // Ordinary bracketed prose.
            continue;
        };
        spans.push(whole.range());

        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let mut fields = BTreeMap::new();
        for field in FIELD_RE.captures_iter(body) {
            let (Some(key), Some(value)) = (field.get(1), field.get(2)) else {
                continue;
            };
            let key = key.as_str().to_lowercase();
            let value = if kind.is_display_key(&key) {
                collapse_whitespace(value.as_str())
            } else {
                normalize(value.as_str())
            };
            fields.entry(key).or_insert(value);
        }

        let missing = kind
            .required_keys()
            .iter()
            .find(|key| fields.get(**key).map_or(true, |v| v.is_empty()));
        if let Some(key) = missing {
            debug!(directive = whole.as_str(), missing = *key, "dropping malformed directive");
            dropped += 1;
            continue;
        }

        let event = MarkerEvent {
            kind,
            fields,
            raw: whole.as_str().to_string(),
            span: whole.range(),
        };

        if kind == MarkerKind::CombatStart && event.participants().is_empty() {
            debug!(directive = whole.as_str(), "dropping combat start with no usable participants");
            dropped += 1;
            continue;
        }

        events.push(event);
    }

    ParsedNarration {
        events,
        display_text: strip_spans(text, &spans),
        dropped,
    }
}

fn strip_spans(text: &str, spans: &[Range<usize>]) -> String {
    if spans.is_empty() {
        return text.trim().to_string();
    }

    let mut lines: Vec<String> = Vec::new();
    let mut dropped_since_push = false;
    let mut start = 0;
    for raw in text.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\n', '\r']);
        let end = start + line.len();
        let touching = spans.iter().filter(|s| s.start < end.max(start + 1) && s.end > start);

        let mut kept = String::with_capacity(line.len());
        let mut cursor = start;
        let mut touched = false;
        for span in touching {
            touched = true;
            let from = span.start.clamp(start, end);
            kept.push_str(&text[cursor..from.max(cursor)]);
            cursor = cursor.max(span.end.clamp(start, end));
        }
        kept.push_str(&text[cursor..end]);
        start += raw.len();

        // Only lines a directive touched are reflowed.
        let line = if touched {
            let reflowed = kept.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
            if reflowed.trim().is_empty() {
                dropped_since_push = true;
                continue;
            }
            reflowed.trim().to_string()
        } else {
            kept
        };

        let previous_blank = lines.last().is_some_and(|l| l.trim().is_empty());
        if line.trim().is_empty() && previous_blank && dropped_since_push {
            continue;
        }
        dropped_since_push = false;
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_fields_and_mixed_case() {
        let text = "The dart stings. [CONDITION_ADD: Condition=\"Poisoned\" TARGET=\"Player\"]\n\
                    Aria staggers. [condition_add: target=\"Aria\"  cOnDiTiOn=\"  Deeply   Frightened \"]";
        let parsed = parse(text);

        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.events[0].get("target"), Some("player"));
        assert_eq!(parsed.events[0].get("condition"), Some("poisoned"));
        assert_eq!(parsed.events[1].get("target"), Some("aria"));
        assert_eq!(parsed.events[1].get("condition"), Some("deeply frightened"));
        assert!(parsed.events[0].span.start < parsed.events[1].span.start);
        assert_eq!(parsed.display_text, "The dart stings.\nAria staggers.");
    }

    #[test]
    fn test_malformed_directive_dropped_alone() {
        let text = "[CONDITION_ADD: Target=\"Player\"] then [CONDITION_ADD: Target=\"Player\" Condition=\"Blinded\"]";
        let parsed = parse(text);

        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].get("condition"), Some("blinded"));
        assert_eq!(parsed.dropped, 1);
        assert_eq!(parsed.display_text, "then");
    }

    #[test]
    fn test_untouched_lines_keep_their_spacing() {
        let text = "The hall is quiet.  Too quiet.\n\n[COMBAT_END]\n\n    A song drifts in. [ITEM_ADD: Item=\"Lute\"]  Softly.";
        let parsed = parse(text);

        assert_eq!(parsed.events.len(), 2);
        assert_eq!(
            parsed.display_text,
            "The hall is quiet.  Too quiet.\n\nA song drifts in. Softly."
        );
    }

    #[test]
    fn test_unknown_keys_and_tags() {
        let text = "[LOOT_DROP: Item=\"Silver   Dagger\" Glitter=\"yes\" Quantity=\"2\"] [Note: keep this]";
        let parsed = parse(text);

        assert_eq!(parsed.events.len(), 1);
        let loot = &parsed.events[0];
        assert_eq!(loot.kind, MarkerKind::LootDrop);
        assert_eq!(loot.get("item"), Some("silver dagger"));
        assert_eq!(loot.quantity(), 2);
        assert_eq!(parsed.display_text, "[Note: keep this]");
    }

    #[test]
    fn test_npc_join_keeps_display_name() {
        let parsed = parse("[NPC_JOIN: Name=\"Mira   Thorne\" Class=\"Cleric\" Level=\"3\"]");
        let join = &parsed.events[0];
        assert_eq!(join.get("name"), Some("Mira Thorne"));
        assert_eq!(join.get("class"), Some("cleric"));
    }

    #[test]
    fn test_combat_start_participants() {
        let parsed = parse(
            "[COMBAT_START: Participants=\"Goblin:12, Player:17, Wolf:x\"] Steel rings out. [COMBAT_END]",
        );
        assert_eq!(parsed.events.len(), 2);
        let order = parsed.events[0].participants();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].name, "Player");
        assert_eq!(order[1].initiative, 12);
        assert_eq!(parsed.events[1].kind, MarkerKind::CombatEnd);
        assert_eq!(parsed.display_text, "Steel rings out.");

        let empty = parse("[COMBAT_START: Participants=\"nobody\"]");
        assert!(empty.events.is_empty());
        assert_eq!(empty.dropped, 1);
    }

    #[test]
    fn test_never_panics_on_garbage() {
        for text in ["", "[", "]]][[", "[ITEM_ADD: Item=\"unterminated]", "[=\"\"]", "[ITEM_ADD:]"] {
            let parsed = parse(text);
            assert!(parsed.events.is_empty());
        }
    }

    #[test]
    fn test_quantity_defaults() {
        let parsed = parse("[ITEM_ADD: Item=\"Rope\" Quantity=\"zero\"] [ITEM_ADD: Item=\"Torch\" Quantity=\"0\"]");
        assert_eq!(parsed.events[0].quantity(), 1);
        assert_eq!(parsed.events[1].quantity(), 1);
    }
}
