//! Decorator ordering.

use std::ops::Deref;
use std::sync::Arc;

use crate::marker::Marker;

/// The final, total order of decorators for one operation.
///
/// Sorted ascending by priority. Equal priorities keep unit-scope markers
/// ahead of operation-scope markers, and discovery order within a scope.
#[derive(Clone, Debug, Default)]
pub struct OrderedChain(Arc<[Marker]>);

impl OrderedChain {
    pub fn priorities(&self) -> Vec<i32> {
        self.0.iter().map(Marker::priority).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(Marker::name).collect()
    }
}

impl Deref for OrderedChain {
    type Target = [Marker];

    fn deref(&self) -> &[Marker] {
        &self.0
    }
}

/// Merges the unit-scope and operation-scope markers into one chain.
///
/// `sort_by_key` is stable, so concatenating unit markers first is all it
/// takes to break ties by scope and then by index.
pub fn merge(unit: Vec<Marker>, operation: Vec<Marker>) -> OrderedChain {
    let mut markers = unit;
    markers.extend(operation);
    markers.sort_by_key(Marker::priority);
    OrderedChain(markers.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxedHandler;
    use crate::marker::{Scope, Tag};

    fn a(next: BoxedHandler) -> BoxedHandler { next }
    fn b(next: BoxedHandler) -> BoxedHandler { next }
    fn c(next: BoxedHandler) -> BoxedHandler { next }

    fn markers(scope: Scope, tags: &[Tag]) -> Vec<Marker> {
        tags.iter()
            .enumerate()
            .map(|(i, t)| Marker::new(t, scope, i))
            .collect()
    }

    #[test]
    fn empty_merge_is_empty() {
        assert!(merge(Vec::new(), Vec::new()).is_empty());
    }

    #[test]
    fn equal_priorities_keep_unit_markers_first() {
        let unit = markers(Scope::Unit, &[Tag::decorator("a", a), Tag::decorator("b", b)]);
        let op = markers(Scope::Operation, &[Tag::decorator("c", c)]);

        let chain = merge(unit, op);
        assert_eq!(chain.names(), ["a", "b", "c"]);
        assert_eq!(chain[2].scope(), Scope::Operation);
    }

    #[test]
    fn negative_operation_priority_moves_ahead_of_unit_defaults() {
        let unit = markers(Scope::Unit, &[Tag::decorator("a", a)]);
        let op = markers(Scope::Operation, &[
            Tag::decorator("b", b).order(1),
            Tag::decorator("c", c).order(-1),
        ]);

        let chain = merge(unit, op);
        assert_eq!(chain.names(), ["c", "a", "b"]);
        assert_eq!(chain.priorities(), [-1, 0, 1]);
    }

    #[test]
    fn merge_is_stable_for_every_priority() {
        let unit = markers(Scope::Unit, &[
            Tag::decorator("u0", a).order(2),
            Tag::decorator("u1", a).order(1),
            Tag::decorator("u2", a).order(2),
        ]);
        let op = markers(Scope::Operation, &[
            Tag::decorator("o0", b).order(1),
            Tag::decorator("o1", b).order(2),
        ]);

        let chain = merge(unit, op);
        assert_eq!(chain.names(), ["u1", "o0", "u0", "u2", "o1"]);
        for pair in chain.windows(2) {
            let (x, y) = (&pair[0], &pair[1]);
            assert!(
                x.priority() < y.priority()
                    || (x.scope(), x.index()) < (y.scope(), y.index())
            );
        }
    }
}
