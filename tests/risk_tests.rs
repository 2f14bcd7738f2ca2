// tests/risk_tests.rs
//
// Risk aggregation math: weighted sums, caps, bands, threshold crossings.

use chrono::Utc;
use exam_backend::config::RiskWeights;
use exam_backend::models::proctoring::{ProctoringSession, RiskLevel, ViolationType};
use uuid::Uuid;

fn new_session() -> ProctoringSession {
    ProctoringSession {
        id: Uuid::new_v4(),
        attempt_id: Uuid::new_v4(),
        started_at: Utc::now(),
        ended_at: None,
        is_active: true,
        total_violations: 0,
        risk_score: 0.0,
        risk_level: RiskLevel::Low,
        tab_switches: 0,
        copy_paste_attempts: 0,
        right_clicks: 0,
        fullscreen_exits: 0,
        face_violations: 0,
        manual_review_required: false,
        reviewed: false,
        final_decision: None,
        updated_at: None,
    }
}

#[test]
fn weighted_sum_with_severity_multiplier() {
    let weights = RiskWeights::default();
    let mut session = new_session();

    // tab_switch weight 5, low multiplier 1.0
    let change = session.apply_violation(ViolationType::TabSwitch, RiskLevel::Low, &weights);
    assert_eq!(change.score, 5.0);

    // tab_switch weight 5, critical multiplier 3.0
    let change = session.apply_violation(ViolationType::TabSwitch, RiskLevel::Critical, &weights);
    assert_eq!(change.score, 20.0);
}

#[test]
fn risk_score_is_monotonically_non_decreasing_and_capped() {
    let weights = RiskWeights::default();
    let mut session = new_session();

    let mut previous = 0.0;
    for _ in 0..20 {
        let change =
            session.apply_violation(ViolationType::ExternalDevice, RiskLevel::Critical, &weights);
        assert!(change.score >= previous, "score decreased");
        assert!(change.score <= 100.0, "score exceeded cap");
        previous = change.score;
    }
    assert_eq!(session.risk_score, 100.0);
    assert_eq!(session.risk_level, RiskLevel::Critical);
}

#[test]
fn risk_bands() {
    assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(24.9), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(25.0), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(49.9), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(50.0), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(74.9), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(75.0), RiskLevel::Critical);
    assert_eq!(RiskLevel::from_score(100.0), RiskLevel::Critical);
}

#[test]
fn threshold_is_crossed_exactly_once() {
    let weights = RiskWeights::default();
    let mut session = new_session();
    let threshold = 75.0;
    let mut crossings = 0;

    // external_device critical = 60 per event; score goes 60, 100, 100, ...
    for _ in 0..5 {
        let change =
            session.apply_violation(ViolationType::ExternalDevice, RiskLevel::Critical, &weights);
        if change.crossed(threshold) {
            crossings += 1;
        }
    }

    assert_eq!(crossings, 1, "alert must fire once per crossing, not per event");
}

#[test]
fn category_counters_stay_in_lockstep_with_totals() {
    let weights = RiskWeights::default();
    let mut session = new_session();

    for _ in 0..6 {
        session.apply_violation(ViolationType::TabSwitch, RiskLevel::Low, &weights);
    }
    session.apply_violation(ViolationType::CopyPaste, RiskLevel::Medium, &weights);
    session.apply_violation(ViolationType::MultipleFaces, RiskLevel::High, &weights);
    session.apply_violation(ViolationType::NoFaceDetected, RiskLevel::High, &weights);

    assert_eq!(session.tab_switches, 6);
    assert_eq!(session.copy_paste_attempts, 1);
    assert_eq!(session.face_violations, 2);
    assert_eq!(session.total_violations, 9);
}

#[test]
fn six_tab_switches_trip_the_flag_ceiling_after_the_fifth() {
    // Scenario: weight 5 each, flag at >= 5 tab switches.
    let weights = RiskWeights::default();
    let max_tab_switches = 5;
    let mut session = new_session();
    let mut flagged = false;
    let mut flagged_at_event = None;

    for event in 1..=6 {
        session.apply_violation(ViolationType::TabSwitch, RiskLevel::Low, &weights);
        let newly_flagged = !flagged && session.tab_switches >= max_tab_switches;
        if newly_flagged {
            flagged = true;
            flagged_at_event = Some(event);
        }
    }

    assert_eq!(flagged_at_event, Some(5), "flag must trip on the 5th event, once");
    assert_eq!(session.risk_score, 30.0);
    assert_eq!(session.risk_level, RiskLevel::Medium);
}

#[test]
fn level_transitions_are_reported_in_the_change() {
    let weights = RiskWeights::default();
    let mut session = new_session();

    // copy_paste high: 8 * 2 = 16 per event
    let change = session.apply_violation(ViolationType::CopyPaste, RiskLevel::High, &weights);
    assert_eq!(change.previous_level, RiskLevel::Low);
    assert_eq!(change.level, RiskLevel::Low);

    let change = session.apply_violation(ViolationType::CopyPaste, RiskLevel::High, &weights);
    assert_eq!(change.previous_level, RiskLevel::Low);
    assert_eq!(change.level, RiskLevel::Medium);
}
