//! Compiles `cascada-ast`'s parse tree into the annotated, sequence-numbered
//! form `cascada-core`'s runtime walks.

pub mod compile;
pub mod error;
pub mod ir;

pub use compile::compile;
pub use error::{CompileError, CompileResult};

#[cfg(test)]
mod tests {
    use super::*;
    use cascada_ast::parse_template;
    use pretty_assertions::assert_eq;

    fn compile_src(src: &str) -> ir::Program {
        let template = parse_template(src).unwrap();
        compile(template).unwrap()
    }

    #[test]
    fn ident_lookup_is_async() {
        let program = compile_src("{{ name }}");
        let ir::StmtKind::Output(e) = &program.body[0].kind else { panic!() };
        assert!(e.is_async);
    }

    #[test]
    fn literal_is_not_async() {
        let program = compile_src("{{ 1 + 2 }}");
        let ir::StmtKind::Output(e) = &program.body[0].kind else { panic!() };
        assert!(!e.is_async);
    }

    #[test]
    fn call_taints_enclosing_binary_expr() {
        let program = compile_src("{{ 1 + fn() }}");
        let ir::StmtKind::Output(e) = &program.body[0].kind else { panic!() };
        assert!(e.is_async);
    }

    #[test]
    fn for_loop_over_pure_output_is_parallel() {
        let program = compile_src("{% for x in items %}{{ x }}{% endfor %}");
        let ir::StmtKind::For { plan, .. } = &program.body[0].kind else { panic!() };
        assert_eq!(plan.strategy, ir::ForStrategy::Parallel);
    }

    #[test]
    fn for_loop_accumulating_outer_variable_is_sequential() {
        let src = "{% set total = 0 %}{% for i in items %}{% set total = total + i %}{% endfor %}";
        let program = compile_src(src);
        let ir::StmtKind::For { plan, .. } = &program.body[1].kind else { panic!() };
        match &plan.strategy {
            ir::ForStrategy::Sequential { written_outer_names } => {
                assert_eq!(written_outer_names, &vec!["total".to_string()]);
            }
            ir::ForStrategy::Parallel => panic!("expected a sequential plan"),
        }
    }

    #[test]
    fn for_loop_writing_only_loop_local_names_is_parallel() {
        let src = "{% for i in items %}{% set doubled = i * 2 %}{{ doubled }}{% endfor %}";
        let program = compile_src(src);
        let ir::StmtKind::For { plan, .. } = &program.body[0].kind else { panic!() };
        assert_eq!(plan.strategy, ir::ForStrategy::Parallel);
    }

    #[test]
    fn command_sugar_lowers_to_set_method() {
        let program = compile_src("{% do @data.user.name = \"Ada\" %}");
        let ir::StmtKind::Command(cmd) = &program.body[0].kind else { panic!() };
        assert_eq!(cmd.method, "set");
        assert_eq!(cmd.args.len(), 1);
    }

    #[test]
    fn command_compound_assign_lowers_to_add() {
        let program = compile_src("{% do @data.counter += 1 %}");
        let ir::StmtKind::Command(cmd) = &program.body[0].kind else { panic!() };
        assert_eq!(cmd.method, "add");
    }

    #[test]
    fn command_increment_has_no_args() {
        let program = compile_src("{% do @data.counter++ %}");
        let ir::StmtKind::Command(cmd) = &program.body[0].kind else { panic!() };
        assert_eq!(cmd.method, "inc");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn commands_get_increasing_program_order_sequence_numbers() {
        let src = "{% do @data.a.set(1) %}{% do @data.b.set(2) %}";
        let program = compile_src(src);
        let ir::StmtKind::Command(first) = &program.body[0].kind else { panic!() };
        let ir::StmtKind::Command(second) = &program.body[1].kind else { panic!() };
        assert!(second.seq > first.seq);
    }

    #[test]
    fn path_keyed_lock_on_command_requires_static_path() {
        let program = compile_src("{% do @data.accounts.balance!.add(10) %}");
        let ir::StmtKind::Command(cmd) = &program.body[0].kind else { panic!() };
        let lock = cmd.lock.as_ref().expect("expected a lock key");
        assert_eq!(lock.path, vec!["accounts".to_string(), "balance".to_string()]);
        assert_eq!(lock.method, None);
    }

    #[test]
    fn dynamic_index_under_sequence_lock_is_rejected() {
        let template = parse_template("{% do @data.accounts[idx]!.add(10) %}").unwrap();
        let err = compile(template).unwrap_err();
        assert!(matches!(err, CompileError::DynamicSequenceLockPath(_)));
    }

    #[test]
    fn method_keyed_lock_on_expression_call() {
        let program = compile_src("{{ sequencer.runOp.method!(1) }}");
        let ir::StmtKind::Output(e) = &program.body[0].kind else { panic!() };
        let ir::ExprKind::LockedCall { lock, .. } = &e.kind else { panic!("expected a locked call") };
        assert_eq!(lock.method.as_deref(), Some("method"));
    }

    #[test]
    fn bare_property_read_with_trailing_bang_is_rejected() {
        let template = parse_template("{{ obj.a.b! }}").unwrap();
        let err = compile(template).unwrap_err();
        assert!(matches!(err, CompileError::SequenceLockOnPropertyRead(_)));
    }

    #[test]
    fn guard_rejects_duplicate_selector() {
        let src = "{% guard @data @data %}{% set x = 1 %}{% endguard %}";
        let template = parse_template(src).unwrap();
        let err = compile(template).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateGuardSelector(_)));
    }

    #[test]
    fn guard_rejects_undeclared_variable() {
        let src = "{% guard @data x %}{% set x = 1 %}{% endguard %}";
        let template = parse_template(src).unwrap();
        let err = compile(template).unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredGuardVariable(_)));
    }

    #[test]
    fn guard_accepts_declared_and_modified_variable() {
        let src = "{% set x = 0 %}{% guard @data x %}{% set x = 1 %}{% endguard %}";
        let program = compile_src(src);
        assert!(matches!(program.body[1].kind, ir::StmtKind::Guard { .. }));
    }
}
