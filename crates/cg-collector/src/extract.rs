//! AST Information Extractor (C4): one walk over a `TranslationUnit`,
//! recording the object universe, assignment constraints, and call sites
//! the solver and resolver need.

use cg_core::{DeclId, ObjectName, ObjectRef};
use cg_frontend::{Decl, Expr, ExprKind, TranslationUnit};

/// An assignment-shaped constraint: `lhs = rhs` merges their equivalence
/// classes (§4.4/§4.5). Scoped simplification: since the frontend carries
/// no type information, every `=` is treated as a location merge rather
/// than distinguishing pointer-pointee merges from value copies.
#[derive(Debug, Clone)]
pub struct AssignConstraint {
    pub lhs: ObjectRef,
    pub rhs: ObjectRef,
}

/// A `base.field` / `base->field` access: records a prefix obligation so
/// that merging two aliased bases also merges their `.field` classes.
#[derive(Debug, Clone)]
pub struct MemberConstraint {
    pub base: ObjectRef,
    pub field: String,
    pub object: ObjectRef,
}

/// A `*base` / `base[i]` dereference: records a prefix obligation so two
/// aliased pointers cascade their dereferenced classes together too.
#[derive(Debug, Clone)]
pub struct DerefConstraint {
    pub base: ObjectRef,
    pub target: ObjectRef,
}

#[derive(Debug, Clone)]
pub enum CalleeRef {
    /// The call's function expression is a plain name that matches a
    /// known decl directly; no equivalence-class lookup needed.
    Direct(String),
    /// The call's function expression resolves to an object in the
    /// universe; the resolver looks up its equivalence class members.
    Indirect(ObjectRef),
}

#[derive(Debug, Clone)]
pub struct CallConstraint {
    pub caller: String,
    pub callee: CalleeRef,
    pub loc_hash: u64,
    /// Set when the call's function expression is `base.method(...)` /
    /// `base->method(...)`: the unqualified method name, for the
    /// cross-TU virtual-dispatch over-approximation (§8 scenario 3) that
    /// runs at merge time, since the base/override decls this could
    /// reach often live outside this translation unit entirely.
    pub virtual_name: Option<String>,
    /// The call's own argument objects, in order, for binding into the
    /// resolved callee's parameters (§4.5/§4.6).
    pub args: Vec<ObjectRef>,
    /// For a method call, the receiver object (`base` in `base.method()`),
    /// bound to the resolved callee's own `this` identity so member
    /// accesses made through `this` inside the callee's body and through
    /// the call-site object outside it land in the same class (§8
    /// scenario 4).
    pub this_obj: Option<ObjectRef>,
}

#[derive(Debug, Default)]
pub struct ExtractedUnit {
    pub assigns: Vec<AssignConstraint>,
    pub members: Vec<MemberConstraint>,
    pub derefs: Vec<DerefConstraint>,
    pub calls: Vec<CallConstraint>,
}

pub fn extract(tu: &TranslationUnit, known_functions: &std::collections::HashSet<String>) -> ExtractedUnit {
    let mut unit = ExtractedUnit::default();
    for decl in &tu.decls {
        extract_decl(decl, known_functions, &mut unit);
    }
    unit
}

fn extract_decl(decl: &Decl, known: &std::collections::HashSet<String>, unit: &mut ExtractedUnit) {
    let scope = decl.mangled_names.first().cloned().unwrap_or_default();
    for expr in &decl.body {
        walk_expr(&scope, expr, known, unit);
    }
}

fn walk_expr(scope: &str, expr: &Expr, known: &std::collections::HashSet<String>, unit: &mut ExtractedUnit) {
    match expr.kind() {
        ExprKind::BinaryOp if expr.operator.as_deref() == Some("=") => {
            if let (Some(lhs_e), Some(rhs_e)) = (expr.sub_exprs.first(), expr.sub_exprs.get(1)) {
                if let (Some(lhs), Some(rhs)) = (expr_to_object(scope, lhs_e, known), expr_to_object(scope, rhs_e, known)) {
                    unit.assigns.push(AssignConstraint { lhs, rhs });
                }
            }
        }
        ExprKind::Call => {
            let func_expr = expr.sub_exprs.first();
            let callee = if let Some(name) = &expr.called_decl {
                if known.contains(name) {
                    CalleeRef::Direct(name.clone())
                } else {
                    CalleeRef::Indirect(ObjectRef::object(scoped_decl(scope, name)))
                }
            } else if let Some(func_expr) = func_expr {
                match expr_to_object(scope, func_expr, known) {
                    Some(obj) => CalleeRef::Indirect(obj),
                    None => return,
                }
            } else {
                return;
            };
            // `base.method(...)`/`base->method(...)`: also record the
            // unqualified method name for virtual-dispatch resolution,
            // since no assignment ever wires a method's address into the
            // object universe the way a function-pointer field does.
            let virtual_name = func_expr
                .filter(|f| f.kind() == ExprKind::Member)
                .and_then(|f| f.member_field.clone());
            let this_obj = func_expr
                .filter(|f| f.kind() == ExprKind::Member)
                .and_then(|f| f.sub_exprs.first())
                .and_then(|base_e| expr_to_object(scope, base_e, known));
            // The function expression itself occupies `sub_exprs[0]`
            // (an identifier, a member access, ...); everything after it
            // is an actual call argument.
            let args = expr
                .sub_exprs
                .iter()
                .skip(1)
                .filter_map(|a| expr_to_object(scope, a, known))
                .collect();
            unit.calls.push(CallConstraint {
                caller: scope.to_string(),
                callee,
                loc_hash: expr.loc.loc_hash(),
                virtual_name,
                args,
                this_obj,
            });
        }
        ExprKind::Member => {
            if let (Some(base_expr), Some(field)) = (expr.sub_exprs.first(), &expr.member_field) {
                if let Some(base) = expr_to_object(scope, base_expr, known) {
                    let object = ObjectRef::object(ObjectName::Member {
                        base: Box::new(base.clone()),
                        field: DeclId::new(field.clone()),
                    });
                    unit.members.push(MemberConstraint {
                        base,
                        field: field.clone(),
                        object,
                    });
                }
            }
        }
        ExprKind::UnaryOp if expr.operator.as_deref() == Some("*") => {
            if let Some(base) = expr.sub_exprs.first().and_then(|e| expr_to_object(scope, e, known)) {
                let target = base.at_level(base.deref_level + 1);
                unit.derefs.push(DerefConstraint { base, target });
            }
        }
        ExprKind::Subscript => {
            if let Some(base) = expr.sub_exprs.first().and_then(|e| expr_to_object(scope, e, known)) {
                let target = base.at_level(base.deref_level + 1);
                unit.derefs.push(DerefConstraint { base, target });
            }
        }
        _ => {}
    }
    for sub in &expr.sub_exprs {
        walk_expr(scope, sub, known, unit);
    }
}

fn scoped_decl(scope: &str, name: &str) -> ObjectName {
    ObjectName::Decl(DeclId::new(format!("{}#{}", scope, name)))
}

/// Maps an expression to its object-name identity, when the expression
/// denotes an addressable location at all (a call result, for instance,
/// does not). A `DeclRef` naming a known global function resolves to that
/// function's own (unscoped) identity, since a bare function name used as
/// a value decays to its address rather than naming a local variable.
pub fn expr_to_object(scope: &str, expr: &Expr, known: &std::collections::HashSet<String>) -> Option<ObjectRef> {
    match expr.kind() {
        ExprKind::DeclRef => {
            let name = expr.referenced_decl.as_ref()?;
            if known.contains(name) {
                Some(ObjectRef::object(ObjectName::Decl(DeclId::new(name.clone()))))
            } else {
                Some(ObjectRef::object(scoped_decl(scope, name)))
            }
        }
        ExprKind::This => Some(ObjectRef::object(ObjectName::This {
            parent: Box::new(ObjectName::Decl(DeclId::new(scope.to_string()))),
        })),
        ExprKind::Member => {
            let base = expr_to_object(scope, expr.sub_exprs.first()?, known)?;
            let field = expr.member_field.as_ref()?;
            Some(ObjectRef::object(ObjectName::Member {
                base: Box::new(base),
                field: DeclId::new(field.clone()),
            }))
        }
        ExprKind::Subscript => {
            // `table[i]` denotes a dereference of `table`'s pointee
            // storage; the index itself carries no identity in this
            // object-name universe (no per-element tracking), matching
            // the treatment of `*table`.
            let base = expr_to_object(scope, expr.sub_exprs.first()?, known)?;
            Some(base.at_level(base.deref_level + 1))
        }
        ExprKind::New => Some(ObjectRef::object(ObjectName::New {
            parent: Box::new(ObjectName::Decl(DeclId::new(scope.to_string()))),
            loc_hash: expr.loc.loc_hash(),
        })),
        ExprKind::UnaryOp => {
            let inner = expr.sub_exprs.first()?;
            let inner_obj = expr_to_object(scope, inner, known)?;
            match expr.operator.as_deref() {
                Some("&") => Some(inner_obj.at_level(inner_obj.deref_level - 1)),
                Some("*") => Some(inner_obj.at_level(inner_obj.deref_level + 1)),
                _ => Some(inner_obj),
            }
        }
        ExprKind::MaterializeTemp | ExprKind::BindTemp => Some(ObjectRef::object(ObjectName::MaterializedTemporary {
            parent: Box::new(ObjectName::Decl(DeclId::new(scope.to_string()))),
            loc_hash: expr.loc.loc_hash(),
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_frontend::{AstVisitor, TreeSitterCxxFrontend};
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[test]
    fn call_records_its_own_arguments() {
        let src = "int g(int x) { return x; }\nint f(int a) { return g(a); }\n";
        let tu = TreeSitterCxxFrontend::new().parse(&PathBuf::from("t.c"), src).unwrap();
        let known: HashSet<String> = tu.decls.iter().map(|d| d.mangled_names[0].clone()).collect();
        let unit = extract(&tu, &known);
        assert_eq!(unit.calls[0].args.len(), 1);
    }

    #[test]
    fn direct_call_is_classified_direct() {
        let src = "int g() { return 1; }\nint f() { return g(); }\n";
        let tu = TreeSitterCxxFrontend::new().parse(&PathBuf::from("t.c"), src).unwrap();
        let known: HashSet<String> = tu.decls.iter().map(|d| d.mangled_names[0].clone()).collect();
        let unit = extract(&tu, &known);
        assert_eq!(unit.calls.len(), 1);
        assert!(matches!(unit.calls[0].callee, CalleeRef::Direct(ref n) if n == "g"));
    }

    #[test]
    fn assignment_to_function_pointer_is_recorded() {
        let src = "int g() { return 1; }\nint f() { int (*fp)(); fp = g; return fp(); }\n";
        let tu = TreeSitterCxxFrontend::new().parse(&PathBuf::from("t.c"), src).unwrap();
        let known: HashSet<String> = tu.decls.iter().map(|d| d.mangled_names[0].clone()).collect();
        let unit = extract(&tu, &known);
        assert!(!unit.assigns.is_empty());
    }
}
