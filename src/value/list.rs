use std::fmt;

use super::Var;

/// Ordered, index-addressable sequence of [`Var`]s.
///
/// Negative indices count from the end: `-1` is the last element and `-len` the first.
/// Anything outside `-len..len` is out of range.
#[derive(Clone, Default, PartialEq)]
pub struct VarList {
    vars: Vec<Var>,
}

impl VarList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vars: Vec::with_capacity(capacity),
        }
    }

    /// Append a value and return its index.
    pub fn add(&mut self, var: Var) -> usize {
        self.vars.push(var);
        self.vars.len() - 1
    }

    /// Map a possibly negative index to a position inside the list.
    pub fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = i64::try_from(self.vars.len()).ok()?;
        let resolved = if index < 0 { len + index } else { index };
        if (0..len).contains(&resolved) {
            usize::try_from(resolved).ok()
        } else {
            None
        }
    }

    pub fn get(&self, index: i64) -> Option<&Var> {
        self.resolve_index(index).map(|i| &self.vars[i])
    }

    pub fn get_mut(&mut self, index: i64) -> Option<&mut Var> {
        self.resolve_index(index).map(move |i| &mut self.vars[i])
    }

    /// Overwrite the element at `index`, dropping the previous value.
    ///
    /// Returns `false` (and drops `var`) when the index is out of range.
    pub fn set(&mut self, index: i64, var: Var) -> bool {
        match self.get_mut(index) {
            Some(slot) => {
                *slot = var;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Var> {
        self.vars.iter()
    }

    pub fn as_slice(&self) -> &[Var] {
        &self.vars
    }

    pub fn into_vec(self) -> Vec<Var> {
        self.vars
    }
}

impl fmt::Debug for VarList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.vars.iter()).finish()
    }
}

impl FromIterator<Var> for VarList {
    fn from_iter<I: IntoIterator<Item = Var>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Var>> for VarList {
    fn from(vars: Vec<Var>) -> Self {
        Self { vars }
    }
}

impl IntoIterator for VarList {
    type Item = Var;
    type IntoIter = std::vec::IntoIter<Var>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

impl<'a> IntoIterator for &'a VarList {
    type Item = &'a Var;
    type IntoIter = std::slice::Iter<'a, Var>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn list_of(n: usize) -> VarList {
        (0..n as i64).map(Var::new_i64).collect()
    }

    #[test]
    fn test_add_returns_index() {
        let mut list = VarList::new();
        assert_eq!(list.add(Var::new_string("a")), 0);
        assert_eq!(list.add(Var::Null), 1);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_set_replaces_and_rejects_out_of_range() {
        let mut list = list_of(3);
        assert!(list.set(-1, Var::new_string("last")));
        assert_eq!(list.get(2).map(Var::as_str), Some("last"));
        assert!(!list.set(3, Var::Null));
        assert!(!list.set(-4, Var::Null));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_empty_list_has_no_indices() {
        let list = VarList::new();
        assert!(list.get(0).is_none());
        assert!(list.get(-1).is_none());
    }

    proptest! {
        #[test]
        fn prop_negative_indices_mirror_positive(n in 1usize..64, k in 1usize..64) {
            prop_assume!(k <= n);
            let list = list_of(n);
            let n = n as i64;
            let k = k as i64;
            prop_assert_eq!(list.get(-k), list.get(n - k));
            prop_assert_eq!(list.get(-n), list.get(0));
            prop_assert!(list.get(-(n + 1)).is_none());
            prop_assert!(list.get(n).is_none());
        }
    }
}
