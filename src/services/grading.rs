// src/services/grading.rs

//! Scores submitted answers against a quiz's answer key.
//!
//! * single-choice: exact, case-sensitive match against an option flagged correct.
//! * multiple-choice: case-insensitive set equality with the correct options.
//! * fill-blank: case-insensitive, positional equality with the correct options in order.
//!
//! Nothing here touches the database.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        attempt::{GradedAnswer, SubmittedAnswer},
        quiz::{Question, QuestionType},
    },
};

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Grades every question of the quiz, in quiz order.
///
/// Questions with no submission are unattempted. A submission for a question
/// that is not part of the quiz is rejected, as is answering one question twice.
pub fn grade_submission(
    questions: &[Question],
    submissions: &[SubmittedAnswer],
) -> Result<Vec<GradedAnswer>, AppError> {
    let mut by_question: HashMap<Uuid, &SubmittedAnswer> = HashMap::with_capacity(submissions.len());

    for submission in submissions {
        if !questions.iter().any(|q| q.id == submission.question_id) {
            return Err(question_not_found(submission.question_id));
        }
        if by_question.insert(submission.question_id, submission).is_some() {
            return Err(AppError::BadRequest(format!(
                "Question {} was answered more than once",
                submission.question_id
            )));
        }
    }

    questions
        .iter()
        .map(|question| match by_question.get(&question.id) {
            Some(submission) => grade_answer(question, submission),
            None => Ok(unanswered(question)),
        })
        .collect()
}

/// Grades a single submission against its question.
pub fn grade_answer(question: &Question, submission: &SubmittedAnswer) -> Result<GradedAnswer, AppError> {
    if submission.question_id != question.id {
        return Err(question_not_found(submission.question_id));
    }

    let graded = match question.question_type {
        QuestionType::SingleChoice => {
            if submission.selected_options.as_ref().is_some_and(|s| !s.is_empty()) {
                return Err(wrong_field(question, "selected_option"));
            }
            let choice = submission
                .selected_option
                .clone()
                .filter(|s| !s.is_empty());
            let is_correct = choice.as_deref().is_some_and(|c| {
                question
                    .options
                    .iter()
                    .any(|o| o.is_correct && o.text == c)
            });
            GradedAnswer {
                question_id: question.id,
                unattempted: choice.is_none(),
                selected_option: choice,
                selected_options: None,
                is_correct,
                marked_for_review: submission.marked_for_review,
            }
        }
        QuestionType::MultipleChoice => {
            if submission.selected_option.as_ref().is_some_and(|s| !s.is_empty()) {
                return Err(wrong_field(question, "selected_options"));
            }
            let selected = submission.selected_options.clone().unwrap_or_default();
            let submitted: BTreeSet<String> = selected
                .iter()
                .map(|s| normalize(s))
                .filter(|s| !s.is_empty())
                .collect();
            let expected: BTreeSet<String> = question
                .options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| normalize(&o.text))
                .collect();
            GradedAnswer {
                question_id: question.id,
                unattempted: submitted.is_empty(),
                is_correct: !submitted.is_empty() && submitted == expected,
                selected_option: None,
                selected_options: Some(selected),
                marked_for_review: submission.marked_for_review,
            }
        }
        QuestionType::FillBlank => {
            if submission.selected_option.as_ref().is_some_and(|s| !s.is_empty()) {
                return Err(wrong_field(question, "selected_options"));
            }
            let selected = submission.selected_options.clone().unwrap_or_default();
            let submitted: Vec<String> = selected.iter().map(|s| normalize(s)).collect();
            let expected: Vec<String> = question
                .options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| normalize(&o.text))
                .collect();
            let unattempted = submitted.iter().all(String::is_empty);
            GradedAnswer {
                question_id: question.id,
                unattempted,
                is_correct: !unattempted && submitted == expected,
                selected_option: None,
                selected_options: Some(selected),
                marked_for_review: submission.marked_for_review,
            }
        }
    };

    Ok(graded)
}

fn unanswered(question: &Question) -> GradedAnswer {
    let selected_options = match question.question_type {
        QuestionType::SingleChoice => None,
        QuestionType::MultipleChoice | QuestionType::FillBlank => Some(Vec::new()),
    };
    GradedAnswer {
        question_id: question.id,
        selected_option: None,
        selected_options,
        is_correct: false,
        marked_for_review: false,
        unattempted: true,
    }
}

fn question_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Question {} not found in this quiz", id))
}

fn wrong_field(question: &Question, expected: &str) -> AppError {
    AppError::BadRequest(format!(
        "Question {} expects its answer in '{}'",
        question.id, expected
    ))
}
