//! Introduction classifier.
//!
//! Ordered rule set over action type tokens and action text (case-insensitive):
//! 1. no action            -> not introduced
//! 2. a "progressed" marker -> not introduced
//! 3. an introduction-stage marker -> introduced
//! 4. anything else        -> not introduced
//!
//! Progressed markers are checked before introduction markers, so a referral
//! ("Referred to the Committee on ...") only counts as introduced when nothing
//! later-stage appears in the same action.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::bill::Action;

/// Action types that mean the bill has left the introduction window.
const PROGRESSED_TYPES: &[&str] = &[
    "floor",
    "president",
    "becamelaw",
    "veto",
    "resolvingdifferences",
    "calendars",
    "discharge",
];

const INTRO_TYPES: &[&str] = &["introreferral", "introduced"];

static RE_PROGRESSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(passed|enacted|became (public )?law|signed by (the )?president|presented to (the )?president|vetoed|veto|failed|rejected|defeated|agreed to|reported|cloture|conference|placed on)\b",
    )
    .expect("valid progressed regex")
});

static RE_INTRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(introduced|referred to|read twice)\b").expect("valid intro regex")
});

/// House and Senate action codes recorded for introduction and first referral.
pub const HOUSE_INTRO_CODES: &[&str] = &["Intro-H", "1000", "H11100"];
pub const SENATE_INTRO_CODES: &[&str] = &["10000", "14000"];

/// Lowercase, alphanumerics only: "IntroReferral" / "Intro-Referral" -> "introreferral".
fn type_token(action_type: &str) -> String {
    action_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Does this action still place the bill in the introduction stage?
pub fn is_introduced(latest_action: Option<&Action>) -> bool {
    let Some(action) = latest_action else {
        return false;
    };
    let token = type_token(&action.action_type);

    if PROGRESSED_TYPES.contains(&token.as_str())
        || RE_PROGRESSED.is_match(&action.text)
        || RE_PROGRESSED.is_match(&action.action_type)
    {
        return false;
    }

    INTRO_TYPES.contains(&token.as_str()) || RE_INTRO.is_match(&action.text)
}

fn has_intro_code(action: &Action) -> bool {
    action.code.as_deref().is_some_and(|code| {
        let code = code.trim();
        HOUSE_INTRO_CODES
            .iter()
            .chain(SENATE_INTRO_CODES)
            .any(|c| c.eq_ignore_ascii_case(code))
    })
}

/// Picks the action that records the bill's original introduction.
///
/// Preference, each tier taking the earliest by date:
/// 1. `IntroReferral` with a known introduction code
/// 2. any `IntroReferral`
/// 3. type literally "introduced"
/// 4. keyword "introduced" anywhere in type or text
pub fn find_introduction_action(actions: &[Action]) -> Option<&Action> {
    let earliest = |pred: &dyn Fn(&Action) -> bool| {
        actions
            .iter()
            .filter(|a| pred(a))
            .min_by_key(|a| a.date)
    };

    earliest(&|a| type_token(&a.action_type) == "introreferral" && has_intro_code(a))
        .or_else(|| earliest(&|a| type_token(&a.action_type) == "introreferral"))
        .or_else(|| earliest(&|a| a.action_type.trim().eq_ignore_ascii_case("introduced")))
        .or_else(|| {
            earliest(&|a| {
                a.action_type.to_ascii_lowercase().contains("introduced")
                    || a.text.to_ascii_lowercase().contains("introduced")
            })
        })
}
