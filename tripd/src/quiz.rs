//! The binary trip-style questionnaire
//!
//! Six this-or-that questions shown to every member. Each option may carry
//! one of the eleven preference attributes; a submitted choice list is zipped
//! against the questions to produce the member's preference flags.

use serde::{Deserialize, Serialize};

use tripmatch::{Attribute, AttributeFlags};

/// One side of a binary question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizChoice {
    Left,
    Right,
}

/// One selectable option, optionally tagged with an attribute
#[derive(Debug, Clone, Copy)]
pub struct QuizOption {
    pub label: &'static str,
    pub attribute: Option<Attribute>,
}

/// One binary question
#[derive(Debug, Clone, Copy)]
pub struct QuizQuestion {
    pub id: &'static str,
    pub prompt: &'static str,
    pub left: QuizOption,
    pub right: QuizOption,
}

/// The fixed questionnaire, in presentation order
pub const QUIZ_QUESTIONS: [QuizQuestion; 6] = [
    QuizQuestion {
        id: "climate",
        prompt: "Do you like...",
        left: QuizOption {
            label: "Cold",
            attribute: Some(Attribute::Cold),
        },
        right: QuizOption {
            label: "Hot",
            attribute: Some(Attribute::Hot),
        },
    },
    QuizQuestion {
        id: "scenery",
        prompt: "Do you prefer...",
        left: QuizOption {
            label: "Beach",
            attribute: Some(Attribute::Beach),
        },
        right: QuizOption {
            label: "Mountains",
            attribute: Some(Attribute::Mountain),
        },
    },
    QuizQuestion {
        id: "pace",
        prompt: "Do you like...",
        left: QuizOption {
            label: "Adventure",
            attribute: Some(Attribute::Adventure),
        },
        right: QuizOption {
            label: "Relax",
            attribute: Some(Attribute::Relax),
        },
    },
    QuizQuestion {
        id: "cityscape",
        prompt: "Do you prefer...",
        left: QuizOption {
            label: "Historic",
            attribute: Some(Attribute::Historic),
        },
        right: QuizOption {
            label: "Modern",
            attribute: Some(Attribute::ModernCity),
        },
    },
    QuizQuestion {
        id: "evenings",
        prompt: "After dark you want...",
        left: QuizOption {
            label: "Party",
            attribute: Some(Attribute::Nightlife),
        },
        right: QuizOption {
            label: "Sleep",
            attribute: Some(Attribute::QuietEvenings),
        },
    },
    QuizQuestion {
        id: "food",
        prompt: "You plan your days around...",
        left: QuizOption {
            label: "Good food",
            attribute: Some(Attribute::GoodFood),
        },
        right: QuizOption {
            label: "Sightseeing",
            attribute: None,
        },
    },
];

/// Convert a member's submitted choices into preference flags
///
/// Choices are zipped with the questions in order; extra choices are ignored
/// and missing ones simply select nothing.
pub fn preferences_from_choices(choices: &[QuizChoice]) -> AttributeFlags {
    let mut flags = AttributeFlags::default();
    for (question, choice) in QUIZ_QUESTIONS.iter().zip(choices) {
        let option = match choice {
            QuizChoice::Left => &question.left,
            QuizChoice::Right => &question.right,
        };
        if let Some(attr) = option.attribute {
            flags.set(attr, true);
        }
    }
    flags
}
