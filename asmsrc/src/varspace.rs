use std::collections::HashMap;

/// An index into a [`VarSpace`]'s backing storage, stable across insertions
/// and across deletion of *other* entries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(usize);

fn qualify(name: &str, base: &str) -> String {
    match name.strip_prefix('.') {
        Some(rest) if base.is_empty() => rest.to_string(),
        Some(_) => format!("{}{}", base, name),
        None => name.to_string(),
    }
}

/// Scoped name -> value mapping. `spec.md` §3/§4.2: a dotted name is
/// qualified by `current_base` before storage or lookup; iteration order is
/// most-recent-insertion-first and must stay stable when an element other
/// than the one visited is deleted, which is why deletions tombstone rather
/// than shift later slots.
#[derive(Debug)]
pub struct VarSpace<V> {
    current_base: String,
    slots: Vec<Option<(String, V)>>,
    index: HashMap<String, usize>,
}

impl<V: Clone> VarSpace<V> {
    pub fn new() -> Self {
        VarSpace {
            current_base: String::new(),
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn set_base(&mut self, base: &str) {
        self.current_base = base.to_string();
    }

    pub fn current_base(&self) -> &str {
        &self.current_base
    }

    /// Insert `name` if absent, otherwise update its value in place
    /// (preserving its original position in iteration order).
    pub fn set(&mut self, name: &str, value: V) -> Handle {
        self.set_in(&self.current_base.clone(), name, value)
    }

    /// Like [`set`](Self::set), but qualifies `name` against `base` instead
    /// of `self.current_base` — used by [`ScopedView`] writes-through-base.
    pub fn set_in(&mut self, base: &str, name: &str, value: V) -> Handle {
        let key = qualify(name, base);
        if let Some(&i) = self.index.get(&key) {
            self.slots[i] = Some((key, value));
            Handle(i)
        } else {
            let i = self.slots.len();
            self.index.insert(key.clone(), i);
            self.slots.push(Some((key, value)));
            Handle(i)
        }
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.get_in(&self.current_base, name)
    }

    pub fn get_in(&self, base: &str, name: &str) -> Option<&V> {
        let key = qualify(name, base);
        self.index
            .get(&key)
            .and_then(|&i| self.slots[i].as_ref())
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns `false` if `name` was not bound (matching the historical
    /// `del_var`'s boolean-success return).
    pub fn delete(&mut self, name: &str) -> bool {
        let key = qualify(name, &self.current_base);
        if let Some(i) = self.index.remove(&key) {
            self.slots[i] = None;
            true
        } else {
            false
        }
    }

    pub fn delete_by_handle(&mut self, handle: Handle) {
        if let Some((key, _)) = self.slots[handle.0].take() {
            self.index.remove(&key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterate bound entries most-recently-inserted first.
    pub fn iter_most_recent_first(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots
            .iter()
            .rev()
            .filter_map(|slot| slot.as_ref())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// A read view with a different `current_base`, without disturbing this
    /// store's own base. Per `spec.md` §4.2/§9: a borrowed override, never
    /// an owned copy, and writes through it are not defined (there is no
    /// mutable accessor on `ScopedView`).
    pub fn scoped_view<'a>(&'a self, base: &'a str) -> ScopedView<'a, V> {
        ScopedView { store: self, base }
    }
}

/// A temporary-rename view: shares the underlying `VarSpace` but resolves
/// dotted names against its own `base` instead of the store's `current_base`.
pub struct ScopedView<'a, V> {
    store: &'a VarSpace<V>,
    base: &'a str,
}

impl<'a, V: Clone> ScopedView<'a, V> {
    pub fn get(&self, name: &str) -> Option<&V> {
        self.store.get_in(self.base, name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn base(&self) -> &str {
        self.base
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dotted_name_is_qualified_by_current_base() {
        let mut vs: VarSpace<i64> = VarSpace::new();
        vs.set_base("loop");
        vs.set(".counter", 1);
        assert_eq!(vs.get(".counter"), Some(&1));
        vs.set_base("");
        assert_eq!(vs.get("loop.counter"), Some(&1));
    }

    #[test]
    fn dotted_name_with_no_base_strips_the_dot() {
        let mut vs: VarSpace<i64> = VarSpace::new();
        vs.set(".orphan", 5);
        assert_eq!(vs.get("orphan"), Some(&5));
    }

    #[test]
    fn unqualified_name_ignores_base() {
        let mut vs: VarSpace<i64> = VarSpace::new();
        vs.set_base("scope");
        vs.set("top", 9);
        vs.set_base("other");
        assert_eq!(vs.get("top"), Some(&9));
    }

    #[test]
    fn iteration_is_most_recent_first_and_stable_under_unrelated_deletion() {
        let mut vs: VarSpace<i64> = VarSpace::new();
        vs.set("a", 1);
        vs.set("b", 2);
        vs.set("c", 3);
        vs.delete("b");
        let names: Vec<&str> = vs.iter_most_recent_first().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn scoped_view_reads_without_disturbing_store_base() {
        let mut vs: VarSpace<i64> = VarSpace::new();
        vs.set_base("main");
        vs.set(".x", 7);
        let view = vs.scoped_view("main");
        assert_eq!(view.get(".x"), Some(&7));
        assert_eq!(vs.current_base(), "main");
    }
}
