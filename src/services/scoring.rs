//! Exam scoring. Pure: the question bank goes in with its correct answers,
//! a verdict comes out, and nothing here touches storage or the wire.

use std::collections::HashMap;

use crate::db::models::{QuestionDef, SubmittedAnswer};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExamScore {
    pub(crate) correct_count: i32,
    pub(crate) total_questions: i32,
    pub(crate) score_percent: f64,
    pub(crate) passed: bool,
}

/// Missing answers and answers to unknown questions count as incorrect,
/// never as an error. A duplicate answer for the same question counts once,
/// first occurrence wins.
pub(crate) fn score_exam(
    questions: &[QuestionDef],
    answers: &[SubmittedAnswer],
    pass_score_percent: f64,
) -> ExamScore {
    let mut submitted: HashMap<&str, &str> = HashMap::with_capacity(answers.len());
    for answer in answers {
        submitted.entry(answer.question_id.as_str()).or_insert(answer.answer.as_str());
    }

    let correct_count = questions
        .iter()
        .filter(|question| {
            submitted.get(question.id.as_str()) == Some(&question.correct_option_id.as_str())
        })
        .count() as i32;

    let total_questions = questions.len() as i32;
    let score_percent = if total_questions == 0 {
        0.0
    } else {
        100.0 * f64::from(correct_count) / f64::from(total_questions)
    };

    ExamScore {
        correct_count,
        total_questions,
        score_percent,
        passed: total_questions > 0 && score_percent >= pass_score_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;

    fn answers_for(questions: &[QuestionDef], correct: usize) -> Vec<SubmittedAnswer> {
        questions
            .iter()
            .enumerate()
            .map(|(i, q)| SubmittedAnswer {
                question_id: q.id.clone(),
                answer: if i < correct { q.correct_option_id.clone() } else { "wrong".to_string() },
            })
            .collect()
    }

    #[test]
    fn seven_of_ten_passes_at_seventy() {
        let questions = fixtures::question_bank(10);
        let score = score_exam(&questions, &answers_for(&questions, 7), 70.0);

        assert_eq!(score.correct_count, 7);
        assert_eq!(score.total_questions, 10);
        assert_eq!(score.score_percent, 70.0);
        assert!(score.passed);
    }

    #[test]
    fn six_of_ten_fails_at_seventy() {
        let questions = fixtures::question_bank(10);
        let score = score_exam(&questions, &answers_for(&questions, 6), 70.0);

        assert_eq!(score.score_percent, 60.0);
        assert!(!score.passed);
    }

    #[test]
    fn missing_answers_count_as_incorrect() {
        let questions = fixtures::question_bank(4);
        let partial = answers_for(&questions[..2], 2);
        let score = score_exam(&questions, &partial, 50.0);

        assert_eq!(score.correct_count, 2);
        assert_eq!(score.score_percent, 50.0);
        assert!(score.passed);
    }

    #[test]
    fn duplicate_answers_count_once_first_wins() {
        let questions = fixtures::question_bank(2);
        let mut answers = answers_for(&questions, 0);
        answers.push(SubmittedAnswer {
            question_id: questions[0].id.clone(),
            answer: questions[0].correct_option_id.clone(),
        });

        let score = score_exam(&questions, &answers, 50.0);
        assert_eq!(score.correct_count, 0);
    }

    #[test]
    fn unknown_question_ids_are_ignored() {
        let questions = fixtures::question_bank(2);
        let answers = vec![SubmittedAnswer {
            question_id: "ghost".to_string(),
            answer: "anything".to_string(),
        }];

        let score = score_exam(&questions, &answers, 70.0);
        assert_eq!(score.correct_count, 0);
        assert!(!score.passed);
    }

    #[test]
    fn empty_bank_never_passes() {
        let score = score_exam(&[], &[], 70.0);
        assert_eq!(score.total_questions, 0);
        assert_eq!(score.score_percent, 0.0);
        assert!(!score.passed);
    }
}
