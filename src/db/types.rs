use serde::{Deserialize, Serialize};
use sqlx::Type;

/// The three ordered phases of a course. `Exam` carries no videos; it exists
/// so progress rows and capture annotations can point at the exam phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "sectionkind", rename_all = "lowercase")]
pub(crate) enum SectionKind {
    Theory,
    Practice,
    Exam,
}

impl SectionKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SectionKind::Theory => "theory",
            SectionKind::Practice => "practice",
            SectionKind::Exam => "exam",
        }
    }

    pub(crate) fn next(self) -> Option<SectionKind> {
        match self {
            SectionKind::Theory => Some(SectionKind::Practice),
            SectionKind::Practice => Some(SectionKind::Exam),
            SectionKind::Exam => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SectionKind;

    #[test]
    fn sections_advance_in_curriculum_order() {
        assert_eq!(SectionKind::Theory.next(), Some(SectionKind::Practice));
        assert_eq!(SectionKind::Practice.next(), Some(SectionKind::Exam));
        assert_eq!(SectionKind::Exam.next(), None);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&SectionKind::Practice).unwrap();
        assert_eq!(json, "\"practice\"");
    }
}
