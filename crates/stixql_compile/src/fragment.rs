use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stixql_core::DocId;

/// Compiled output for one document.
///
/// `dep_match` matches pre-existing dependencies; `dep_insert` inserts the
/// relations depending on those matches; `indep_ql` is self-contained insert
/// text; `core_ql` is the minimal match clause identifying the document by
/// identity and type. `dep_list` is the set of foreign identities referenced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub dep_match: String,
    pub dep_insert: String,
    pub indep_ql: String,
    pub core_ql: String,
    pub dep_list: BTreeSet<DocId>,
    /// Match clauses re-binding scalar-pass variables that `dep_insert`
    /// references (granular markings). Only used by the phase-2 query of a
    /// cycle split; in the combined query those variables are bound by the
    /// insert section itself.
    pub dep_attr_matches: String,
    /// False when `dep_insert` references sub-object variables that cannot
    /// be re-matched in a second phase; a cycle through such a fragment is a
    /// hard cyclical failure.
    pub phase_splittable: bool,
}

impl Fragment {
    /// Full single-transaction query:
    /// `match <dep_match> insert <indep_ql><dep_insert>`. The `match` keyword
    /// is omitted when nothing is matched; `None` means nothing to insert,
    /// a valid outcome rather than an error.
    pub fn combined_query(&self) -> Option<String> {
        let insert = format!("{}{}", self.indep_ql, self.dep_insert);
        if insert.trim().is_empty() {
            return None;
        }
        if self.dep_match.trim().is_empty() {
            Some(format!("insert {insert}"))
        } else {
            Some(format!("match {} insert {insert}", self.dep_match))
        }
    }

    /// Phase-1 query of a cycle split: identity plus scalar attributes, no
    /// cross-references.
    pub fn phase_one_query(&self) -> Option<String> {
        if self.indep_ql.trim().is_empty() {
            return None;
        }
        Some(format!("insert {}", self.indep_ql))
    }

    /// Phase-2 query of a cycle split: match the now-existing identities
    /// (own core included) and insert the cross-references.
    pub fn phase_two_query(&self) -> Option<String> {
        if self.dep_insert.trim().is_empty() {
            return None;
        }
        Some(format!(
            "match {}{}{} insert {}",
            self.core_ql, self.dep_attr_matches, self.dep_match, self.dep_insert
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_query_omits_match_when_empty() {
        let fragment = Fragment {
            indep_ql: "$x isa malware; ".to_string(),
            phase_splittable: true,
            ..Fragment::default()
        };
        assert_eq!(
            fragment.combined_query().unwrap(),
            "insert $x isa malware; "
        );
    }

    #[test]
    fn empty_insert_means_nothing_to_do() {
        let fragment = Fragment {
            dep_match: "$m isa marking-definition; ".to_string(),
            ..Fragment::default()
        };
        assert_eq!(fragment.combined_query(), None);
    }

    #[test]
    fn phase_queries_split_the_fragment() {
        let fragment = Fragment {
            core_ql: "$x isa identity, has stix-id \"identity--a\"; ".to_string(),
            dep_match: "$r isa identity, has stix-id \"identity--b\"; ".to_string(),
            dep_insert: "(created: $x, creator: $r) isa created-by; ".to_string(),
            indep_ql: "$x isa identity; ".to_string(),
            phase_splittable: true,
            ..Fragment::default()
        };
        assert_eq!(fragment.phase_one_query().unwrap(), "insert $x isa identity; ");
        let p2 = fragment.phase_two_query().unwrap();
        assert!(p2.starts_with("match $x isa identity"));
        assert!(p2.ends_with("insert (created: $x, creator: $r) isa created-by; "));
    }
}
