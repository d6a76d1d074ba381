//! Static cross-library ordering for multi-library sessions (spec §4.6
//! "pairs with known ordering constraints... expose that order via a static
//! dependency list").
//!
//! Only one edge is documented by spec.md itself — `fastapi` depends on
//! `pydantic` state, so a session touching both must migrate `pydantic`
//! first. Ordering across any other library pair is explicitly
//! underspecified (spec §9 open question (c)); this module does not guess
//! at edges the spec never names.

/// `(library, must run before)` edges.
const KNOWN_EDGES: &[(&str, &str)] = &[("pydantic", "fastapi")];

/// Orders `libraries` so that every known `(before, after)` edge is
/// respected; libraries with no declared edge keep their relative input
/// order (a stable sort), per spec §9 open question (c).
#[must_use]
pub fn order_libraries(libraries: &[&str]) -> Vec<String> {
    let mut ordered: Vec<String> = libraries.iter().map(|s| (*s).to_string()).collect();
    ordered.sort_by(|a, b| {
        if must_precede(a, b) {
            std::cmp::Ordering::Less
        } else if must_precede(b, a) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
    ordered
}

fn must_precede(a: &str, b: &str) -> bool {
    KNOWN_EDGES.iter().any(|(before, after)| before == &a && after == &b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pydantic_is_ordered_before_fastapi() {
        assert_eq!(order_libraries(&["fastapi", "pydantic"]), vec!["pydantic", "fastapi"]);
    }

    #[test]
    fn unrelated_libraries_keep_input_order() {
        assert_eq!(order_libraries(&["sqlalchemy", "pydantic"]), vec!["sqlalchemy", "pydantic"]);
    }
}
