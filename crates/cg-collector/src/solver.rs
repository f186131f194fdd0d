//! Equivalence-Class Solver (C5): worklist-driven destructive merge over
//! the object universe, with prefix sets cascading member-access merges.

use std::collections::BTreeMap;
use std::collections::HashMap;

use cg_core::{ObjectName, ObjectRef};

type ClassId = usize;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PrefixKey {
    Member(String),
    /// A pure pointer dereference (`*p`, `p[i]`): no field name, so every
    /// dereference of a given base shares this one key. Needed so that
    /// unioning two aliased pointers also cascades into unioning what they
    /// point to (§4.5's "both dereferences" case), the same way a shared
    /// `Member` prefix cascades member accesses.
    Deref,
}

#[derive(Debug, Default)]
struct Class {
    members: Vec<ObjectRef>,
    prefixes: BTreeMap<PrefixKey, ClassId>,
}

/// Destructive union-find over `ObjectRef` identities, plus a prefix map
/// per class recording "this class, accessed via member M, reaches that
/// class" (§3 "Prefix"). Merging two classes that share a prefix key
/// schedules their prefix targets for merging too, cascading the alias
/// relation through field accesses.
pub struct EquivalenceClassSolver {
    classes: Vec<Option<Class>>,
    redirect: Vec<ClassId>,
    object_class: HashMap<ObjectRef, ClassId>,
}

impl Default for EquivalenceClassSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EquivalenceClassSolver {
    pub fn new() -> Self {
        EquivalenceClassSolver {
            classes: Vec::new(),
            redirect: Vec::new(),
            object_class: HashMap::new(),
        }
    }

    fn find_root(&mut self, mut c: ClassId) -> ClassId {
        while self.redirect[c] != c {
            self.redirect[c] = self.redirect[self.redirect[c]];
            c = self.redirect[c];
        }
        c
    }

    /// The class id for `obj`, creating a singleton class if this is the
    /// first time `obj` has been seen.
    pub fn class_of(&mut self, obj: &ObjectRef) -> ClassId {
        if let Some(&c) = self.object_class.get(obj) {
            return self.find_root(c);
        }
        let id = self.classes.len();
        self.classes.push(Some(Class {
            members: vec![obj.clone()],
            prefixes: BTreeMap::new(),
        }));
        self.redirect.push(id);
        self.object_class.insert(obj.clone(), id);
        id
    }

    /// Record that `base`'s class reaches `target`'s class via `field`.
    /// Any later merge bringing `base` into the same class as another
    /// object that also has a `field` prefix will cascade into merging
    /// the two targets.
    pub fn record_prefix(&mut self, base: &ObjectRef, field: &str, target: &ObjectRef) {
        let base_class = self.class_of(base);
        let target_class = self.class_of(target);
        self.record_prefix_key(base_class, PrefixKey::Member(field.to_string()), target_class);
    }

    /// Record that `base`'s class reaches `target`'s class through a
    /// pointer dereference (`*base`/`base[i]`). Two pointers that later get
    /// unioned (shown to alias) will cascade their dereferenced targets
    /// into the same class too, the same way `record_prefix` cascades
    /// member accesses.
    pub fn record_deref(&mut self, base: &ObjectRef, target: &ObjectRef) {
        let base_class = self.class_of(base);
        let target_class = self.class_of(target);
        self.record_prefix_key(base_class, PrefixKey::Deref, target_class);
    }

    fn record_prefix_key(&mut self, base_class: ClassId, key: PrefixKey, target_class: ClassId) {
        let existing = self.classes[base_class].as_ref().unwrap().prefixes.get(&key).copied();
        match existing {
            Some(existing_target) if self.find_root(existing_target) != self.find_root(target_class) => {
                self.union_classes(existing_target, target_class);
            }
            Some(_) => {}
            None => {
                self.classes[base_class]
                    .as_mut()
                    .unwrap()
                    .prefixes
                    .insert(key, target_class);
            }
        }
    }

    /// Merge the classes of `a` and `b`, cascading through any shared
    /// prefix keys.
    pub fn union(&mut self, a: &ObjectRef, b: &ObjectRef) {
        let ca = self.class_of(a);
        let cb = self.class_of(b);
        self.union_classes(ca, cb);
    }

    fn union_classes(&mut self, a: ClassId, b: ClassId) {
        let mut worklist = vec![(a, b)];
        while let Some((ca, cb)) = worklist.pop() {
            let ra = self.find_root(ca);
            let rb = self.find_root(cb);
            if ra == rb {
                continue;
            }
            let class_b = self.classes[rb].take().unwrap();
            self.redirect[rb] = ra;
            let class_a = self.classes[ra].as_mut().unwrap();
            class_a.members.extend(class_b.members);

            let mut conflicts = Vec::new();
            for (key, target_b) in class_b.prefixes {
                match class_a.prefixes.get(&key).copied() {
                    Some(target_a) => conflicts.push((target_a, target_b)),
                    None => {
                        class_a.prefixes.insert(key, target_b);
                    }
                }
            }
            worklist.extend(conflicts);
        }
    }

    /// The current equivalence-class members of `obj`'s class.
    pub fn members_of(&mut self, obj: &ObjectRef) -> Vec<ObjectRef> {
        let c = self.class_of(obj);
        self.classes[c].as_ref().unwrap().members.clone()
    }

    /// Every `ObjectName::Decl` name present in `obj`'s class — the set of
    /// functions a call through `obj` may reach.
    pub fn callee_decls(&mut self, obj: &ObjectRef) -> Vec<String> {
        self.members_of(obj)
            .into_iter()
            .filter_map(|m| match m.name {
                ObjectName::Decl(id) => Some(id.0),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_core::DeclId;

    fn decl(name: &str) -> ObjectRef {
        ObjectRef::object(ObjectName::Decl(DeclId::new(name)))
    }

    #[test]
    fn union_is_transitive_through_a_chain() {
        let mut solver = EquivalenceClassSolver::new();
        let fp1 = decl("f#fp1");
        let fp2 = decl("f#fp2");
        let foo = decl("foo");
        solver.union(&fp1, &fp2);
        solver.union(&fp2, &foo);
        let callees = solver.callee_decls(&fp1);
        assert!(callees.contains(&"foo".to_string()));
    }

    #[test]
    fn deref_cascade_merges_shared_pointee() {
        let mut solver = EquivalenceClassSolver::new();
        let p = decl("p");
        let q = decl("q");
        let p_target = p.at_level(p.deref_level + 1);
        let q_target = q.at_level(q.deref_level + 1);
        solver.record_deref(&p, &p_target);
        solver.record_deref(&q, &q_target);
        solver.union(&p, &q);
        let members = solver.members_of(&p_target);
        assert!(members.contains(&q_target));
    }

    #[test]
    fn prefix_cascade_merges_shared_field_access() {
        let mut solver = EquivalenceClassSolver::new();
        let x = decl("x");
        let y = decl("y");
        let x_f = decl("x.f_target");
        let y_f = decl("y.f_target");
        solver.record_prefix(&x, "f", &x_f);
        solver.record_prefix(&y, "f", &y_f);
        solver.union(&x, &y);
        let members = solver.members_of(&x_f);
        assert!(members.contains(&y_f));
    }
}
