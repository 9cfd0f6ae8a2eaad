use crate::models::{Candidate, NOTA_ID};

/// Strips any NOTA entries the upstream source produced and appends exactly
/// one sentinel as the last entry. The first upstream NOTA id is kept so
/// selections made against it stay valid.
pub fn seal_with_nota(candidates: Vec<Candidate>, constituency: &str) -> Vec<Candidate> {
    let mut nota_id = None;

    let mut sealed: Vec<Candidate> = candidates
        .into_iter()
        .filter(|candidate| {
            if candidate.is_nota() {
                nota_id.get_or_insert_with(|| candidate.id.clone());
                return false;
            }
            true
        })
        .collect();

    let nota_id = nota_id.unwrap_or_else(|| NOTA_ID.to_string());
    sealed.push(Candidate::none_of_the_above(&nota_id, constituency));

    sealed
}

pub fn matches(haystack: &str, query: &str) -> bool {
    haystack.to_lowercase().contains(&query.to_lowercase())
}

pub fn filter_constituencies<'a>(constituencies: &'a [String], query: &str) -> Vec<&'a str> {
    let query = query.trim();

    constituencies
        .iter()
        .filter(|c| matches(c, query))
        .map(String::as_str)
        .collect()
}

/// Display subset of `candidates` matching `query` on name or party.
/// The NOTA sentinel is always kept, in last position.
pub fn filter_candidates<'a>(candidates: &'a [Candidate], query: &str) -> Vec<&'a Candidate> {
    let query = query.trim();

    let mut visible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| !c.is_nota())
        .filter(|c| matches(&c.name, query) || matches(&c.party, query))
        .collect();

    visible.extend(candidates.iter().filter(|c| c.is_nota()));

    visible
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::bank::CatalogBank;

    fn candidate(id: &str, name: &str, party: &str) -> Candidate {
        Candidate {
            id: id.into(),
            name: name.into(),
            party: party.into(),
            symbol: None,
            party_logo: None,
            photo_url: String::new(),
            constituency: "Mumbai North".into(),
        }
    }

    #[test]
    fn test_seal_appends_sentinel() {
        let sealed = seal_with_nota(vec![candidate("c1", "Rajesh Kumar", "BJP")], "Mumbai North");

        assert_eq!(sealed.len(), 2);
        assert!(sealed[1].is_nota());
        assert_eq!(sealed[1].id, NOTA_ID);
    }

    #[test]
    fn test_seal_moves_upstream_nota_last() {
        let sealed = seal_with_nota(
            vec![
                candidate("c6", "NOTA", "None of the Above"),
                candidate("c1", "Rajesh Kumar", "BJP"),
                candidate("c7", "nota", "None of the above"),
            ],
            "Mumbai North",
        );

        assert_eq!(sealed.iter().filter(|c| c.is_nota()).count(), 1);
        assert_eq!(sealed.last().map(|c| c.id.as_str()), Some("c6"));
    }

    #[test]
    fn test_seal_empty_upstream() {
        let sealed = seal_with_nota(Vec::new(), "Juhu");

        assert_eq!(sealed.len(), 1);
        assert!(sealed[0].is_nota());
    }

    #[test]
    fn test_constituency_filter() {
        let list = vec![
            "Mumbai North".to_string(),
            "Mumbai South".to_string(),
            "Delhi East".to_string(),
        ];

        assert_eq!(filter_constituencies(&list, "mumbai"), ["Mumbai North", "Mumbai South"]);
        assert_eq!(filter_constituencies(&list, "  EAST "), ["Delhi East"]);
        assert_eq!(filter_constituencies(&list, "").len(), 3);
        assert!(filter_constituencies(&list, "pune").is_empty());
    }

    #[test]
    fn test_candidate_filter_keeps_nota() {
        let list = seal_with_nota(
            vec![
                candidate("c1", "Rajesh Kumar", "Bharatiya Janata Party"),
                candidate("c2", "Priya Singh", "Indian National Congress"),
            ],
            "Mumbai North",
        );

        let visible = filter_candidates(&list, "congress");
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].id, "c2");
        assert!(visible[1].is_nota());

        let visible = filter_candidates(&list, "zzz");
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_nota());
    }

    #[test]
    fn test_candidate_filter_does_not_touch_source() {
        let list = seal_with_nota(vec![candidate("c1", "Rajesh Kumar", "BJP")], "Mumbai North");
        let before = list.clone();

        let _ = filter_candidates(&list, "priya");

        assert_eq!(list, before);
    }

    #[test]
    fn test_every_builtin_list_ends_with_one_nota() {
        let bank = CatalogBank::builtin();

        for election in &bank.elections {
            for constituency in &election.constituencies {
                let list = bank.candidates_for(&election.id, constituency).unwrap();
                let context = format!("{}/{constituency}", election.id);

                assert_eq!(list.iter().filter(|c| c.is_nota()).count(), 1, "{context}");
                assert!(list.last().is_some_and(Candidate::is_nota), "{context}");
                assert!(list.iter().all(|c| &c.constituency == constituency), "{context}");
            }
        }
    }

    fn upstream() -> impl Strategy<Value = Vec<Candidate>> {
        prop::collection::vec((any::<bool>(), 0..3usize), 0..8).prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (nota, spelling))| {
                    let id = format!("c{i}");
                    match (nota, spelling) {
                        (false, _) => candidate(&id, &format!("Candidate {i}"), "IND"),
                        (true, 0) => candidate(&id, "NOTA", "None of the Above"),
                        (true, 1) => candidate(&id, "nota", "none of the above"),
                        (true, _) => candidate(&id, "Nota", "Independent"),
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn test_seal_leaves_exactly_one_nota_last(list in upstream()) {
            let regular: Vec<String> = list
                .iter()
                .filter(|c| !c.is_nota())
                .map(|c| c.id.clone())
                .collect();

            let sealed = seal_with_nota(list, "Juhu");

            prop_assert_eq!(sealed.iter().filter(|c| c.is_nota()).count(), 1);
            prop_assert!(sealed.last().is_some_and(Candidate::is_nota));
            let kept: Vec<String> = sealed[..sealed.len() - 1]
                .iter()
                .map(|c| c.id.clone())
                .collect();
            prop_assert_eq!(kept, regular);
        }
    }
}
