//! Stage lifecycle: Candidate -> Production -> Archived, nothing else.

use mpg_promotion::ModelStage;

#[test]
fn only_lifecycle_edges_are_allowed() {
    use ModelStage::*;
    let all = [Candidate, Production, Archived];
    for from in all {
        for to in all {
            let allowed = matches!((from, to), (Candidate, Production) | (Production, Archived));
            assert_eq!(
                from.can_transition_to(to),
                allowed,
                "{from} -> {to} expected allowed={allowed}"
            );
        }
    }
}

#[test]
fn stage_strings_parse_case_insensitively() {
    assert_eq!("production".parse::<ModelStage>().unwrap(), ModelStage::Production);
    assert_eq!(" ARCHIVED ".parse::<ModelStage>().unwrap(), ModelStage::Archived);
    assert!("Staging".parse::<ModelStage>().is_err());
    assert_eq!(ModelStage::Candidate.to_string(), "CANDIDATE");
}
