// tests/grading_tests.rs
//
// Deterministic scoring per question kind, fail-closed behavior, and the
// grade scale.

use exam_backend::error::AppError;
use exam_backend::models::question::{AnswerKey, AnswerPayload, QuestionKind};
use exam_backend::services::grading::{letter_grade, score_objective};

#[test]
fn mcq_scores_exact_match() {
    let key = AnswerKey::SingleChoice {
        correct: "B".to_string(),
    };

    let right = AnswerPayload::SingleChoice {
        selected: "B".to_string(),
    };
    assert_eq!(
        score_objective(QuestionKind::Mcq, &key, &right, 10.0).unwrap(),
        Some((true, 10.0))
    );

    let wrong = AnswerPayload::SingleChoice {
        selected: "C".to_string(),
    };
    assert_eq!(
        score_objective(QuestionKind::Mcq, &key, &wrong, 10.0).unwrap(),
        Some((false, 0.0))
    );
}

#[test]
fn msq_is_order_insensitive_set_equality() {
    let key = AnswerKey::MultiChoice {
        correct: vec!["A".to_string(), "C".to_string()],
    };

    let reordered = AnswerPayload::MultiChoice {
        selected: vec!["C".to_string(), "A".to_string()],
    };
    assert_eq!(
        score_objective(QuestionKind::Msq, &key, &reordered, 5.0).unwrap(),
        Some((true, 5.0))
    );

    let partial = AnswerPayload::MultiChoice {
        selected: vec!["A".to_string()],
    };
    assert_eq!(
        score_objective(QuestionKind::Msq, &key, &partial, 5.0).unwrap(),
        Some((false, 0.0))
    );

    let extra = AnswerPayload::MultiChoice {
        selected: vec!["A".to_string(), "C".to_string(), "D".to_string()],
    };
    assert_eq!(
        score_objective(QuestionKind::Msq, &key, &extra, 5.0).unwrap(),
        Some((false, 0.0))
    );
}

#[test]
fn fill_blank_ignores_case_and_surrounding_whitespace() {
    let key = AnswerKey::FillBlank {
        accepted: vec!["Dijkstra".to_string(), "dijkstra's algorithm".to_string()],
    };

    let answer = AnswerPayload::Text {
        content: "  DIJKSTRA ".to_string(),
    };
    assert_eq!(
        score_objective(QuestionKind::FillBlank, &key, &answer, 2.0).unwrap(),
        Some((true, 2.0))
    );

    let wrong = AnswerPayload::Text {
        content: "bellman-ford".to_string(),
    };
    assert_eq!(
        score_objective(QuestionKind::FillBlank, &key, &wrong, 2.0).unwrap(),
        Some((false, 0.0))
    );
}

#[test]
fn numeric_respects_tolerance() {
    let key = AnswerKey::Numeric {
        value: 3.14,
        tolerance: 0.01,
    };

    let close = AnswerPayload::Numeric { value: 3.149 };
    assert_eq!(
        score_objective(QuestionKind::Numeric, &key, &close, 4.0).unwrap(),
        Some((true, 4.0))
    );

    let off = AnswerPayload::Numeric { value: 3.2 };
    assert_eq!(
        score_objective(QuestionKind::Numeric, &key, &off, 4.0).unwrap(),
        Some((false, 0.0))
    );

    // Default tolerance is exact match.
    let exact_key = AnswerKey::Numeric {
        value: 42.0,
        tolerance: 0.0,
    };
    let exact = AnswerPayload::Numeric { value: 42.0 };
    assert_eq!(
        score_objective(QuestionKind::Numeric, &exact_key, &exact, 1.0).unwrap(),
        Some((true, 1.0))
    );
}

#[test]
fn true_false_scores_boolean_equality() {
    let key = AnswerKey::TrueFalse { correct: false };
    let answer = AnswerPayload::TrueFalse { value: false };
    assert_eq!(
        score_objective(QuestionKind::TrueFalse, &key, &answer, 1.0).unwrap(),
        Some((true, 1.0))
    );
}

#[test]
fn manual_kinds_are_left_for_human_grading() {
    let key = AnswerKey::Manual;
    let essay = AnswerPayload::Text {
        content: "Quicksort partitions around a pivot...".to_string(),
    };

    for kind in [
        QuestionKind::DescriptiveShort,
        QuestionKind::DescriptiveLong,
        QuestionKind::Coding,
    ] {
        assert_eq!(score_objective(kind, &key, &essay, 10.0).unwrap(), None);
    }

    let files = AnswerPayload::FileRefs {
        paths: vec!["uploads/solution.pdf".to_string()],
    };
    assert_eq!(
        score_objective(QuestionKind::FileUpload, &key, &files, 10.0).unwrap(),
        None
    );
}

#[test]
fn mismatched_key_and_answer_shapes_fail_closed() {
    // An MCQ whose stored answer is a multi-select payload must not score
    // silently as zero; it is an unsupported combination.
    let key = AnswerKey::SingleChoice {
        correct: "A".to_string(),
    };
    let payload = AnswerPayload::MultiChoice {
        selected: vec!["A".to_string()],
    };

    let err = score_objective(QuestionKind::Mcq, &key, &payload, 10.0).unwrap_err();
    assert!(matches!(err, AppError::UnsupportedQuestionType(_)));
}

#[test]
fn letter_grades_follow_the_scale() {
    assert_eq!(letter_grade(100.0), "A");
    assert_eq!(letter_grade(90.0), "A");
    assert_eq!(letter_grade(89.9), "B");
    assert_eq!(letter_grade(75.0), "B");
    assert_eq!(letter_grade(60.0), "C");
    assert_eq!(letter_grade(45.0), "D");
    assert_eq!(letter_grade(44.9), "F");
    assert_eq!(letter_grade(0.0), "F");
}
