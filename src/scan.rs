//! Declaration scanning.
//!
//! Walks the declarations of one scope and flattens them into [`Marker`]s.
//! Indices are assigned to every single tag first, in source order, then to
//! the entries of each repeated container, container by container.

use crate::marker::{Declaration, Marker, Scope};
use crate::unit::{Operation, Unit};

/// Markers visible on one operation, split by scope.
#[derive(Debug, Default)]
pub struct Scanned {
    pub unit: Vec<Marker>,
    pub operation: Vec<Marker>,
}

/// Collects the unit-scope and operation-scope markers of `operation`.
pub fn scan(unit: &Unit, operation: &Operation) -> Scanned {
    Scanned {
        unit: collect(unit.declarations(), Scope::Unit),
        operation: collect(operation.declarations(), Scope::Operation),
    }
}

/// Flattens one scope's declarations.
pub fn collect(declarations: &[Declaration], scope: Scope) -> Vec<Marker> {
    let singles = declarations.iter().filter_map(|d| match d {
        Declaration::Single(tag) => Some(tag),
        Declaration::Repeated(_) => None,
    });
    let repeated = declarations
        .iter()
        .filter_map(|d| match d {
            Declaration::Repeated(tags) => Some(tags.iter()),
            Declaration::Single(_) => None,
        })
        .flatten();

    singles
        .chain(repeated)
        .enumerate()
        .map(|(index, tag)| Marker::new(tag, scope, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxedHandler;
    use crate::marker::{CustomTag, Repeatable, Tag};

    struct Quota(u32);

    impl CustomTag for Quota {
        const FACTORY: &'static str = "quota";
    }

    impl Repeatable for Quota {}

    fn first(next: BoxedHandler) -> BoxedHandler { next }
    fn second(next: BoxedHandler) -> BoxedHandler { next }

    #[test]
    fn empty_scope_yields_no_markers() {
        assert!(collect(&[], Scope::Unit).is_empty());
    }

    #[test]
    fn singles_come_before_repeated_entries() {
        let declarations = vec![
            Declaration::repeated([Quota(1), Quota(2)]),
            Tag::decorator("first", first).into(),
            Declaration::repeated([Quota(3)]),
            Tag::decorator("second", second).into(),
        ];

        let markers = collect(&declarations, Scope::Operation);
        let names: Vec<_> = markers.iter().map(Marker::name).collect();
        assert_eq!(names, ["first", "second", "quota", "quota", "quota"]);

        let quotas: Vec<_> = markers.iter().filter_map(|m| m.tag::<Quota>()).map(|q| q.0).collect();
        assert_eq!(quotas, [1, 2, 3]);

        let indices: Vec<_> = markers.iter().map(Marker::index).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
        assert!(markers.iter().all(|m| m.scope() == Scope::Operation));
    }
}
