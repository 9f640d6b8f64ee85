//! # Bill identity
//!
//! Canonical identity (`BillKey`) and the value objects a discovery cycle passes
//! around. Upstream type strings ("hr", "H.R.", "sjres") are normalized through a
//! fixed table of the eight federal chamber types; anything else is kept verbatim
//! as [`ChamberType::Other`] and flagged as non-standard.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::KeyError;

/// One of the eight federal bill/resolution codes, or a verbatim unknown code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChamberType {
    HR,
    S,
    HRES,
    SRES,
    HJRES,
    SJRES,
    HCONRES,
    SCONRES,
    Other(String),
}

impl ChamberType {
    pub const STANDARD: [ChamberType; 8] = [
        ChamberType::HR,
        ChamberType::HRES,
        ChamberType::HJRES,
        ChamberType::HCONRES,
        ChamberType::S,
        ChamberType::SRES,
        ChamberType::SJRES,
        ChamberType::SCONRES,
    ];

    /// Case-insensitive, tolerant of dots and spaces ("H.J.Res." == "hjres").
    pub fn parse(raw: &str) -> Self {
        let folded: String = raw
            .chars()
            .filter(|c| !matches!(c, '.' | ' ' | '\t'))
            .collect::<String>()
            .to_ascii_uppercase();
        match folded.as_str() {
            "HR" => Self::HR,
            "S" => Self::S,
            "HRES" => Self::HRES,
            "SRES" => Self::SRES,
            "HJRES" => Self::HJRES,
            "SJRES" => Self::SJRES,
            "HCONRES" => Self::HCONRES,
            "SCONRES" => Self::SCONRES,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::HR => "HR",
            Self::S => "S",
            Self::HRES => "HRES",
            Self::SRES => "SRES",
            Self::HJRES => "HJRES",
            Self::SJRES => "SJRES",
            Self::HCONRES => "HCONRES",
            Self::SCONRES => "SCONRES",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn is_standard(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn is_house(&self) -> bool {
        matches!(self, Self::HR | Self::HRES | Self::HJRES | Self::HCONRES)
    }

    pub fn is_senate(&self) -> bool {
        matches!(self, Self::S | Self::SRES | Self::SJRES | Self::SCONRES)
    }

    /// Citation prefix, e.g. `H.R.` or `S.Con.Res.`.
    pub fn display_prefix(&self) -> &str {
        match self {
            Self::HR => "H.R.",
            Self::S => "S.",
            Self::HRES => "H.Res.",
            Self::SRES => "S.Res.",
            Self::HJRES => "H.J.Res.",
            Self::SJRES => "S.J.Res.",
            Self::HCONRES => "H.Con.Res.",
            Self::SCONRES => "S.Con.Res.",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Path segment used by congress.gov bill pages.
    pub fn url_segment(&self) -> String {
        match self {
            Self::HR => "house-bill".into(),
            Self::S => "senate-bill".into(),
            Self::HRES => "house-resolution".into(),
            Self::SRES => "senate-resolution".into(),
            Self::HJRES => "house-joint-resolution".into(),
            Self::SJRES => "senate-joint-resolution".into(),
            Self::HCONRES => "house-concurrent-resolution".into(),
            Self::SCONRES => "senate-concurrent-resolution".into(),
            Self::Other(s) => s.to_ascii_lowercase(),
        }
    }

    /// Path segment used by the v3 API (`/bill/119/hjres/7`).
    pub fn api_segment(&self) -> String {
        self.code().to_ascii_lowercase()
    }

    /// Hand-off ordering: house types first, then senate types, then unknown codes.
    pub fn sort_rank(&self) -> u8 {
        Self::STANDARD
            .iter()
            .position(|c| c == self)
            .map(|p| p as u8)
            .unwrap_or(u8::MAX)
    }
}

impl From<String> for ChamberType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ChamberType> for String {
    fn from(c: ChamberType) -> Self {
        c.code().to_string()
    }
}

impl fmt::Display for ChamberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identity of a bill. Two records describe the same bill iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillKey {
    congress: u32,
    chamber_type: ChamberType,
    number: u32,
}

impl BillKey {
    pub fn new(congress: u32, chamber_type: ChamberType, number: u32) -> Result<Self, KeyError> {
        if congress == 0 {
            return Err(KeyError::Congress);
        }
        if number == 0 {
            return Err(KeyError::Number);
        }
        Ok(Self {
            congress,
            chamber_type,
            number,
        })
    }

    /// Builds a key from raw upstream strings (`"hr"`, `"42"`).
    pub fn parse(congress: u32, raw_type: &str, raw_number: &str) -> Result<Self, KeyError> {
        if raw_type.trim().is_empty() {
            return Err(KeyError::MissingType);
        }
        let number = raw_number
            .trim()
            .parse::<u32>()
            .map_err(|_| KeyError::BadNumber(raw_number.to_string()))?;
        Self::new(congress, ChamberType::parse(raw_type), number)
    }

    pub fn congress(&self) -> u32 {
        self.congress
    }

    pub fn chamber_type(&self) -> &ChamberType {
        &self.chamber_type
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Citation form: `H.R. 42`.
    pub fn display_number(&self) -> String {
        format!("{} {}", self.chamber_type.display_prefix(), self.number)
    }

    pub fn url(&self) -> String {
        format!(
            "https://www.congress.gov/bill/{}-congress/{}/{}",
            ordinal(self.congress),
            self.chamber_type.url_segment(),
            self.number
        )
    }
}

impl fmt::Display for BillKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.chamber_type, self.number, self.congress)
    }
}

/// `119` -> `119th`, `121` -> `121st`.
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// Congress in session during `year` (the 1st Congress sat in 1789-1790).
pub fn congress_for_year(year: i32) -> u32 {
    if year < 1789 {
        return 1;
    }
    ((year - 1789) / 2 + 1) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Party {
    D,
    R,
    I,
    Unknown,
}

impl Party {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "d" | "dem" | "democrat" | "democratic" => Self::D,
            "r" | "rep" | "republican" => Self::R,
            "i" | "id" | "independent" | "independent democrat" => Self::I,
            _ => Self::Unknown,
        }
    }

    pub fn letter(&self) -> &'static str {
        match self {
            Self::D => "D",
            Self::R => "R",
            Self::I => "I",
            Self::Unknown => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorInfo {
    pub first_name: String,
    pub last_name: String,
    /// "Rep." / "Sen."
    pub title_prefix: String,
    pub state: Option<String>,
    pub party: Option<Party>,
}

impl SponsorInfo {
    /// `Rep. Jane Doe (D-CA)`; party/state suffix only when known.
    pub fn display(&self) -> String {
        let name = [
            self.title_prefix.as_str(),
            self.first_name.as_str(),
            self.last_name.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        let party = self.party.filter(|p| *p != Party::Unknown);
        match (party, self.state.as_deref()) {
            (Some(p), Some(st)) => format!("{name} ({}-{st})", p.letter()),
            (Some(p), None) => format!("{name} ({})", p.letter()),
            _ => name,
        }
    }
}

/// One entry of a bill's action history; also used for the latest action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Upstream action type, e.g. `IntroReferral`, `Floor`. May be empty when the
    /// source only reports text (listing endpoints do).
    pub action_type: String,
    pub code: Option<String>,
    pub text: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillRecord {
    pub key: BillKey,
    pub title: String,
    pub sponsor: Option<SponsorInfo>,
    pub summary: Option<String>,
    pub introduced_date: Option<NaiveDate>,
    pub latest_action: Option<Action>,
}

impl BillRecord {
    pub fn sponsor_display(&self) -> String {
        self.sponsor
            .as_ref()
            .map(SponsorInfo::display)
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn sponsor_party(&self) -> Party {
        self.sponsor
            .as_ref()
            .and_then(|s| s.party)
            .unwrap_or(Party::Unknown)
    }
}
