use std::fmt;

use serde::{Serialize, Serializer};

/// Reading level after legacy labels have been folded into the canonical
/// taxonomy. Labels that match nothing are carried through as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadingLevel {
    LowEmerging,
    HighEmerging,
    Transitioning,
    Developing,
    AtGradeLevel,
    NotAssessed,
    Other(String),
}

/// Pedagogical progression order, also used to sort the distribution.
pub const CANONICAL_ORDER: [ReadingLevel; 6] = [
    ReadingLevel::LowEmerging,
    ReadingLevel::HighEmerging,
    ReadingLevel::Transitioning,
    ReadingLevel::Developing,
    ReadingLevel::AtGradeLevel,
    ReadingLevel::NotAssessed,
];

const UNKNOWN_ORDER: usize = 999;
const DEFAULT_COLOR: &str = "#CCCCCC";

impl ReadingLevel {
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(value) = raw.map(str::trim) else {
            return ReadingLevel::NotAssessed;
        };

        match value {
            "" | "false" => ReadingLevel::NotAssessed,
            "Low Emerging" | "Early" => ReadingLevel::LowEmerging,
            "High Emerging" | "Emergent" => ReadingLevel::HighEmerging,
            "Transitioning" => ReadingLevel::Transitioning,
            "Developing" | "Fluent" => ReadingLevel::Developing,
            "At Grade Level" => ReadingLevel::AtGradeLevel,
            "Not Assessed" => ReadingLevel::NotAssessed,
            other => ReadingLevel::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReadingLevel::LowEmerging => "Low Emerging",
            ReadingLevel::HighEmerging => "High Emerging",
            ReadingLevel::Transitioning => "Transitioning",
            ReadingLevel::Developing => "Developing",
            ReadingLevel::AtGradeLevel => "At Grade Level",
            ReadingLevel::NotAssessed => "Not Assessed",
            ReadingLevel::Other(label) => label,
        }
    }

    pub fn order_index(&self) -> usize {
        CANONICAL_ORDER
            .iter()
            .position(|level| level == self)
            .unwrap_or(UNKNOWN_ORDER)
    }

    pub fn color(&self) -> &'static str {
        match self {
            ReadingLevel::LowEmerging => "#FF6B6B",
            ReadingLevel::HighEmerging => "#FFA94D",
            ReadingLevel::Transitioning => "#FFD43B",
            ReadingLevel::Developing => "#4DABF7",
            ReadingLevel::AtGradeLevel => "#51CF66",
            ReadingLevel::NotAssessed => "#ADB5BD",
            ReadingLevel::Other(_) => DEFAULT_COLOR,
        }
    }

    /// Skill areas suggested when an assessment gives nothing more specific.
    pub fn default_improvement_categories(&self) -> Vec<String> {
        let categories: &[&str] = match self {
            ReadingLevel::LowEmerging => &["Alphabet Knowledge", "Phonological Awareness"],
            ReadingLevel::HighEmerging => &["Phonological Awareness", "Decoding"],
            ReadingLevel::Transitioning => &["Decoding", "Word Recognition"],
            ReadingLevel::Developing => &["Word Recognition", "Reading Comprehension"],
            ReadingLevel::AtGradeLevel => &[],
            ReadingLevel::NotAssessed | ReadingLevel::Other(_) => &["Pre-Assessment Needed"],
        };
        categories.iter().map(|c| c.to_string()).collect()
    }

    pub fn is_not_assessed(&self) -> bool {
        matches!(self, ReadingLevel::NotAssessed)
    }
}

impl fmt::Display for ReadingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReadingLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
