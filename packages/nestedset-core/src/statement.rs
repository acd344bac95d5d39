//! The vocabulary the forest speaks to its persistence adapter: row filters, orderings and the
//! four write statements every structural mutation is expressed with.

use crate::ids::NodeId;
use crate::node::Membership;

/// Numeric columns of the forest table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Column {
    Left,
    Right,
    Level,
    Sequence,
}

impl Column {
    pub const ALL: [Column; 4] = [Column::Left, Column::Right, Column::Level, Column::Sequence];

    /// SQL column name. `left`/`right`/`level` are reserved words in most dialects.
    pub fn sql_name(self) -> &'static str {
        match self {
            Column::Left => "lft",
            Column::Right => "rgt",
            Column::Level => "lvl",
            Column::Sequence => "sequence",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Bound {
    Inclusive(i64),
    Exclusive(i64),
}

/// Range constraint on one column. Both ends open by default.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Span {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Span {
    pub const ANY: Span = Span {
        lower: None,
        upper: None,
    };

    pub fn at_least(value: i64) -> Self {
        Span::ANY.with_lower(Bound::Inclusive(value))
    }

    pub fn above(value: i64) -> Self {
        Span::ANY.with_lower(Bound::Exclusive(value))
    }

    pub fn at_most(value: i64) -> Self {
        Span::ANY.with_upper(Bound::Inclusive(value))
    }

    pub fn below(value: i64) -> Self {
        Span::ANY.with_upper(Bound::Exclusive(value))
    }

    pub fn exactly(value: i64) -> Self {
        Span::at_least(value).with_upper(Bound::Inclusive(value))
    }

    /// Half-open `[from, to)`.
    pub fn between(from: i64, to: i64) -> Self {
        Span::at_least(from).with_upper(Bound::Exclusive(to))
    }

    pub fn with_lower(mut self, bound: Bound) -> Self {
        self.lower = Some(bound);
        self
    }

    pub fn with_upper(mut self, bound: Bound) -> Self {
        self.upper = Some(bound);
        self
    }

    pub fn is_any(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    pub fn contains(&self, value: i64) -> bool {
        let lower_ok = match self.lower {
            None => true,
            Some(Bound::Inclusive(v)) => value >= v,
            Some(Bound::Exclusive(v)) => value > v,
        };
        let upper_ok = match self.upper {
            None => true,
            Some(Bound::Inclusive(v)) => value <= v,
            Some(Bound::Exclusive(v)) => value < v,
        };
        lower_ok && upper_ok
    }
}

/// Conjunction of row predicates.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Filter {
    pub ids: Option<Vec<NodeId>>,
    pub membership: Option<Membership>,
    /// `left = 1`.
    pub roots_only: bool,
    pub left: Span,
    pub right: Span,
    pub level: Span,
    pub sequence: Span,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn id(id: NodeId) -> Self {
        Self {
            ids: Some(vec![id]),
            ..Self::default()
        }
    }

    pub fn ids(ids: Vec<NodeId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn tree(root: NodeId) -> Self {
        Self {
            membership: Some(Membership::Tree(root)),
            ..Self::default()
        }
    }

    pub fn detached() -> Self {
        Self {
            membership: Some(Membership::Detached),
            ..Self::default()
        }
    }

    pub fn roots() -> Self {
        Self {
            roots_only: true,
            ..Self::default()
        }
    }

    /// Every row whose interval lies inside `[left, right]`, bounds included.
    pub fn within(self, left: i64, right: i64) -> Self {
        self.with(Column::Left, Span::at_least(left))
            .with(Column::Right, Span::at_most(right))
    }

    pub fn with(mut self, column: Column, span: Span) -> Self {
        match column {
            Column::Left => self.left = span,
            Column::Right => self.right = span,
            Column::Level => self.level = span,
            Column::Sequence => self.sequence = span,
        }
        self
    }

    pub fn span(&self, column: Column) -> &Span {
        match column {
            Column::Left => &self.left,
            Column::Right => &self.right,
            Column::Level => &self.level,
            Column::Sequence => &self.sequence,
        }
    }

    /// Evaluates the filter against raw column values, in `Column::ALL` order.
    pub fn matches(&self, id: NodeId, membership: Membership, values: [i64; 4]) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&id) {
                return false;
            }
        }
        if let Some(expected) = self.membership {
            if expected != membership {
                return false;
            }
        }
        if self.roots_only && values[0] != 1 {
            return false;
        }
        Column::ALL
            .iter()
            .zip(values)
            .all(|(column, value)| self.span(*column).contains(value))
    }
}

/// Result ordering for reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    /// Depth-first pre-order within a tree.
    Left,
    /// Forest order of root nodes.
    Sequence,
    /// `root, left`: the order rows are locked in.
    Lock,
}

/// Write statements. Each one is a single bulk update in SQL terms.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Statement {
    /// Adds `delta` to `column` on every matching row.
    Shift {
        column: Column,
        delta: i64,
        filter: Filter,
    },
    /// Assigns every matching row to `tree` and offsets its position and depth.
    Rebase {
        filter: Filter,
        tree: Membership,
        offset: i64,
        depth: i64,
    },
    /// Rewrites one row's parent link and root ordering key.
    Link {
        id: NodeId,
        parent: Option<NodeId>,
        sequence: i64,
    },
    Delete { ids: Vec<NodeId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_bounds() {
        let span = Span::between(3, 7);
        assert!(!span.contains(2));
        assert!(span.contains(3));
        assert!(span.contains(6));
        assert!(!span.contains(7));
        assert!(Span::above(3).contains(4));
        assert!(!Span::above(3).contains(3));
        assert!(Span::exactly(5).contains(5));
        assert!(!Span::exactly(5).contains(6));
        assert!(Span::ANY.contains(i64::MIN));
    }

    #[test]
    fn filter_matches_membership_and_ranges() {
        let filter = Filter::tree(NodeId(1)).within(2, 5);
        assert!(filter.matches(NodeId(9), Membership::Tree(NodeId(1)), [2, 3, 2, 0]));
        assert!(!filter.matches(NodeId(9), Membership::Tree(NodeId(2)), [2, 3, 2, 0]));
        assert!(!filter.matches(NodeId(9), Membership::Detached, [2, 3, 2, 0]));
        assert!(!filter.matches(NodeId(9), Membership::Tree(NodeId(1)), [1, 6, 1, 1]));

        let roots = Filter::roots().with(Column::Sequence, Span::above(2));
        assert!(roots.matches(NodeId(4), Membership::Tree(NodeId(4)), [1, 2, 1, 3]));
        assert!(!roots.matches(NodeId(4), Membership::Tree(NodeId(4)), [1, 2, 1, 2]));
        assert!(!roots.matches(NodeId(5), Membership::Tree(NodeId(4)), [2, 3, 2, 0]));
    }
}
