//! Exhaustive classifier properties
//!
//! Every PHQ-9 (4^9) and GAD-7 (4^7) answer vector is small enough to
//! enumerate, so these check the rules over the whole input space.

use crisis_engine::scoring::{ideation_severity, score_threshold_severity, PHQ9_IDEATION_INDEX};
use crisis_engine::{classify, AssessmentKind, CrisisSeverity, EngineError};

/// Decode `index` as a base-4 answer vector of length `len`.
fn answers(mut index: u32, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for slot in out.iter_mut() {
        *slot = (index % 4) as u8;
        index /= 4;
    }
    out
}

fn for_all(kind: AssessmentKind, mut check: impl FnMut(&[u8])) {
    let len = kind.item_count();
    for index in 0..4u32.pow(len as u32) {
        check(&answers(index, len));
    }
}

#[test]
fn total_is_sum_and_bounded() {
    for kind in [AssessmentKind::Phq9, AssessmentKind::Gad7] {
        for_all(kind, |a| {
            let c = classify(kind, a).unwrap();
            let sum: u32 = a.iter().map(|&v| v as u32).sum();
            assert_eq!(c.score.total, sum);
            assert!(c.score.total <= kind.max_score());
        });
    }
}

#[test]
fn phq9_severity_is_max_of_score_and_ideation() {
    for_all(AssessmentKind::Phq9, |a| {
        let c = classify(AssessmentKind::Phq9, a).unwrap();
        let ideation = a[PHQ9_IDEATION_INDEX];
        let expected = score_threshold_severity(AssessmentKind::Phq9, c.score.total)
            .max(ideation_severity(Some(ideation)));
        assert_eq!(c.severity, expected, "answers {a:?}");

        if ideation >= 2 {
            assert_eq!(c.severity, CrisisSeverity::Critical, "answers {a:?}");
        }
        if ideation >= 1 {
            assert!(c.requires_intervention(), "answers {a:?}");
            assert!(c.ideation_flagged);
        }
        assert_eq!(c.ideation_flagged, ideation >= 1);
    });
}

#[test]
fn gad7_never_critical_and_never_flags_ideation() {
    for_all(AssessmentKind::Gad7, |a| {
        let c = classify(AssessmentKind::Gad7, a).unwrap();
        assert!(c.severity <= CrisisSeverity::Severe, "answers {a:?}");
        assert!(!c.ideation_flagged);
        assert_eq!(c.severity, c.score_severity);
    });
}

#[test]
fn severity_is_monotonic_in_each_answer() {
    for kind in [AssessmentKind::Phq9, AssessmentKind::Gad7] {
        for_all(kind, |a| {
            let base = classify(kind, a).unwrap().severity;
            for i in 0..a.len() {
                if a[i] < 3 {
                    let mut raised = a.to_vec();
                    raised[i] += 1;
                    let higher = classify(kind, &raised).unwrap().severity;
                    assert!(higher >= base, "{a:?} -> {raised:?}");
                }
            }
        });
    }
}

#[test]
fn malformed_answers_are_rejected() {
    let cases: [(AssessmentKind, Vec<u8>); 4] = [
        (AssessmentKind::Phq9, vec![0; 8]),
        (AssessmentKind::Phq9, vec![0; 10]),
        (AssessmentKind::Gad7, vec![1, 1, 1, 1, 1, 1, 4]),
        (AssessmentKind::Gad7, vec![]),
    ];
    for (kind, a) in cases {
        assert!(
            matches!(classify(kind, &a), Err(EngineError::InvalidInput { .. })),
            "{kind} {a:?}"
        );
    }
}
