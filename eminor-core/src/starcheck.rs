//! Star-Code validation: the ahead-of-time rule set.
//!
//! Two walks over the tree. The first collects label definitions and `let`
//! declarations (both usable before their textual position); the second
//! runs the per-statement checks in source order and tracks a lease state
//! machine per capsule. A capsule that produced SC010 is latched and never
//! reported again.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::span::Span;

pub fn validate(program: &Program) -> Vec<Diagnostic> {
    let mut check = StarCheck::default();
    check.collect(&program.entry.block);
    for item in &program.items {
        check.collect_item(item);
    }
    check.visit_block(&program.entry.block);
    for item in &program.items {
        check.visit_item(item);
    }
    for (label, span) in std::mem::take(&mut check.gotos) {
        if !check.labels.contains(&label) {
            check.issues.push(Diagnostic::error(
                "SC040",
                span,
                format!("goto :{label} targets undefined label"),
            ));
        }
    }
    check.issues
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    Leased,
    Subleased,
    Poisoned,
}

#[derive(Default)]
struct StarCheck {
    issues: Vec<Diagnostic>,
    declared: HashSet<String>,
    inited: HashSet<String>,
    lease: HashMap<String, LeaseState>,
    labels: HashSet<String>,
    gotos: Vec<(String, Span)>,
}

impl StarCheck {
    // ----- pass 1: labels and lets -------------------------------------

    fn collect_item(&mut self, item: &Item) {
        match item {
            Item::Decl(Decl::Let(decl)) => {
                self.declared.insert(decl.name.name.clone());
            }
            Item::Decl(Decl::Function(decl)) => self.collect(&decl.body),
            Item::Decl(Decl::Worker(decl)) => self.collect(&decl.body),
            Item::Decl(_) => {}
            Item::Stmt(stmt) => self.collect_stmt(stmt),
        }
    }

    fn collect(&mut self, block: &Block) {
        for item in &block.items {
            self.collect_item(item);
        }
    }

    fn collect_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Label { name } => {
                self.labels.insert(name.clone());
            }
            StmtKind::If {
                then_block,
                else_block,
                ..
            } => {
                self.collect(then_block);
                if let Some(els) = else_block {
                    self.collect(els);
                }
            }
            StmtKind::Loop { body, .. } => self.collect(body),
            _ => {}
        }
    }

    // ----- pass 2: rule checks -----------------------------------------

    fn visit_item(&mut self, item: &Item) {
        match item {
            Item::Decl(Decl::Function(decl)) => self.visit_block(&decl.body),
            Item::Decl(Decl::Worker(decl)) => self.visit_block(&decl.body),
            Item::Decl(_) => {}
            Item::Stmt(stmt) => self.visit_stmt(stmt),
        }
    }

    fn visit_block(&mut self, block: &Block) {
        for item in &block.items {
            self.visit_item(item);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Init { target } => {
                self.inited.insert(target.name.clone());
            }
            StmtKind::Load { target, .. }
            | StmtKind::Render { target }
            | StmtKind::Input { target }
            | StmtKind::Output { target }
            | StmtKind::Stamp { target, .. } => {
                self.check_use("SC001", "Capsule", target, span);
            }
            StmtKind::Send { chan, pkt } | StmtKind::Recv { chan, pkt } => {
                self.check_use("SC002", "Channel", chan, span);
                self.check_use("SC003", "Packet", pkt, span);
            }
            StmtKind::Lease { target } => match self.lease.get(&target.name) {
                Some(LeaseState::Leased | LeaseState::Subleased) => {
                    self.issues.push(Diagnostic::error(
                        "SC010",
                        span,
                        format!("Capsule ${} double-lease without release", target.name),
                    ));
                    self.lease
                        .insert(target.name.clone(), LeaseState::Poisoned);
                }
                Some(LeaseState::Poisoned) => {}
                None => {
                    self.lease.insert(target.name.clone(), LeaseState::Leased);
                }
            },
            StmtKind::Sublease { target } => match self.lease.get(&target.name) {
                Some(LeaseState::Leased) => {
                    self.lease
                        .insert(target.name.clone(), LeaseState::Subleased);
                }
                Some(LeaseState::Subleased | LeaseState::Poisoned) => {}
                None => {
                    self.issues.push(Diagnostic::warning(
                        "SC011",
                        span,
                        format!("Sublease on non-leased capsule ${}", target.name),
                    ));
                }
            },
            StmtKind::Release { target } => match self.lease.get(&target.name) {
                Some(LeaseState::Leased | LeaseState::Subleased) => {
                    self.lease.remove(&target.name);
                }
                Some(LeaseState::Poisoned) => {}
                None => {
                    self.issues.push(Diagnostic::warning(
                        "SC012",
                        span,
                        format!("Release on non-leased capsule ${}", target.name),
                    ));
                }
            },
            StmtKind::Sleep { duration_ns } => {
                if *duration_ns < 0 {
                    self.issues.push(Diagnostic::warning(
                        "SC020",
                        span,
                        "Sleep duration must be non-negative",
                    ));
                }
            }
            StmtKind::Expire {
                target,
                duration_ns,
            } => {
                self.check_use("SC001", "Capsule", target, span);
                if *duration_ns < 0 {
                    self.issues.push(Diagnostic::warning(
                        "SC021",
                        span,
                        "Expire duration must be non-negative",
                    ));
                }
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                if let ExprKind::Literal(lit) = &cond.kind {
                    if !matches!(lit, Literal::Bool(_)) {
                        self.issues.push(Diagnostic::warning(
                            "SC030",
                            cond.span,
                            "Non-boolean literal used as condition",
                        ));
                    }
                }
                self.visit_block(then_block);
                if let Some(els) = else_block {
                    self.visit_block(els);
                }
            }
            StmtKind::Loop { body, .. } => self.visit_block(body),
            StmtKind::Goto { label } => {
                self.gotos.push((label.clone(), span));
            }
            StmtKind::CheckExp { .. }
            | StmtKind::Call { .. }
            | StmtKind::Exit
            | StmtKind::Spawn { .. }
            | StmtKind::Join { .. }
            | StmtKind::Yield
            | StmtKind::Error { .. }
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Label { .. }
            | StmtKind::Return { .. }
            | StmtKind::Print { .. } => {}
        }
    }

    fn check_use(&mut self, code: &'static str, what: &str, target: &Ident, span: Span) {
        if !self.inited.contains(&target.name) && !self.declared.contains(&target.name) {
            self.issues.push(Diagnostic::warning(
                code,
                span,
                format!("{what} ${} used before init/let", target.name),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Severity;
    use crate::parser::parse;

    fn issues(src: &str) -> Vec<Diagnostic> {
        validate(&parse(src).expect("parse should succeed"))
    }

    fn codes(src: &str) -> Vec<&'static str> {
        issues(src).into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn warns_on_capsule_use_before_init() {
        assert_eq!(codes("@main { #load $A0, 1 #exit }"), vec!["SC001"]);
        assert_eq!(codes("@main { #init $A0 #load $A0, 1 #exit }"), Vec::<&str>::new());
    }

    #[test]
    fn let_declaration_counts_as_initialized() {
        assert_eq!(
            codes("@main { #load $K0, 1 #exit } let $K0 : u32 ;"),
            Vec::<&str>::new()
        );
    }

    #[test]
    fn warns_on_channel_and_packet_use() {
        assert_eq!(
            codes("@main { #send $C0, $P0 #exit }"),
            vec!["SC002", "SC003"]
        );
        assert_eq!(
            codes("@main { #init $C0 #init $P0 #recv $C0, $P0 #exit }"),
            Vec::<&str>::new()
        );
    }

    #[test]
    fn reports_double_lease_exactly_once() {
        let found = issues("@main { #init $A0 #lease $A0 #lease $A0 #lease $A0 #exit }");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "SC010");
        assert_eq!(found[0].severity, Severity::Error);
    }

    #[test]
    fn lease_release_lease_is_clean() {
        assert_eq!(
            codes("@main { #init $A0 #lease $A0 #release $A0 #lease $A0 #exit }"),
            Vec::<&str>::new()
        );
    }

    #[test]
    fn warns_on_sublease_and_release_without_lease() {
        assert_eq!(codes("@main { #init $A0 #sublease $A0 #exit }"), vec!["SC011"]);
        assert_eq!(codes("@main { #init $A0 #release $A0 #exit }"), vec!["SC012"]);
    }

    #[test]
    fn warns_on_negative_durations() {
        let found = issues("@main { #init $A0 #sleep -5s #expire $A0, -1ms #exit }");
        let codes: Vec<_> = found.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["SC020", "SC021"]);
        assert!(found.iter().all(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn accepts_positive_durations() {
        assert_eq!(
            codes("@main { #init $A0 #sleep 5s #expire $A0, 5m #exit }"),
            Vec::<&str>::new()
        );
    }

    #[test]
    fn warns_on_non_bool_literal_condition() {
        assert_eq!(codes("@main { #if (1) { #exit } #endif }"), vec!["SC030"]);
        assert_eq!(
            codes("@main { #if (true) { #exit } #endif }"),
            Vec::<&str>::new()
        );
        // Non-literal conditions are fine even if they fold to an int.
        assert_eq!(
            codes("@main { #if (1 == 2) { #exit } #endif }"),
            Vec::<&str>::new()
        );
    }

    #[test]
    fn errors_on_goto_to_undefined_label() {
        let found = issues("@main { goto :missing #exit }");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "SC040");
        assert!(found[0].is_error());
    }

    #[test]
    fn goto_resolves_forward_labels() {
        assert_eq!(
            codes("@main { goto :done #yield :done #exit }"),
            Vec::<&str>::new()
        );
    }

    #[test]
    fn walks_into_function_bodies() {
        assert_eq!(
            codes("@main { #exit } function $f() { #load $Z9, 1 }"),
            vec!["SC001"]
        );
    }

    #[test]
    fn adding_init_never_introduces_use_warnings() {
        let before = codes("@main { #init $A0 #load $A0, 1 #load $B1, 2 #exit }");
        let after = codes("@main { #init $B1 #init $A0 #load $A0, 1 #load $B1, 2 #exit }");
        assert!(after.iter().all(|c| before.contains(c) || *c != "SC001"));
        assert_eq!(after, Vec::<&str>::new());
    }
}
