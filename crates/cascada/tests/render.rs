use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cascada::{Environment, Handler, MemoryLoader};
use cascada_value::{HostObject, Value};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn renders_a_template_by_name_with_context() {
    init_tracing();
    let loader = Arc::new(MemoryLoader::new());
    loader.insert("greeting", "Hello, {{ name }}!");
    let env = Environment::builder(loader).build();

    let outcome = env.render("greeting", HashMap::from([("name".to_string(), "Ada".into())])).await.unwrap();

    assert_eq!(outcome.text().as_deref(), Some("Hello, Ada!"));
}

#[tokio::test]
async fn render_string_resolves_a_statically_named_include_through_the_loader() {
    let loader = Arc::new(MemoryLoader::new());
    loader.insert("partial", "<{{ name }}>");
    let env = Environment::builder(loader).build();

    let outcome =
        env.render_string("{% include \"partial\" %}", HashMap::from([("name".to_string(), "Bob".into())]))
            .await
            .unwrap();

    assert_eq!(outcome.text().as_deref(), Some("<Bob>"));
}

#[tokio::test]
async fn render_script_builds_the_data_result_container() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader).build();

    let script = ":data\n@data.counter = 10\n@data.counter += 5\n";
    let outcome = env.render_script(script, HashMap::new()).await.unwrap();

    match outcome {
        cascada::RenderOutcome::Focused(v) => {
            assert_eq!(v.get_path(&[cascada_value::Part::field("counter")]), cascada_value::Value::from(15));
        }
        other => panic!("expected a focused value, got {other:?}"),
    }
}

#[tokio::test]
async fn environment_globals_are_visible_unless_the_render_context_overrides_them() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader).with_value("site", "default".into()).build();

    let default_outcome = env.render_string("{{ site }}", HashMap::new()).await.unwrap();
    assert_eq!(default_outcome.text().as_deref(), Some("default"));

    let overridden =
        env.render_string("{{ site }}", HashMap::from([("site".to_string(), "override".into())])).await.unwrap();
    assert_eq!(overridden.text().as_deref(), Some("override"));
}

#[tokio::test]
async fn unknown_template_name_surfaces_a_load_error() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader).build();

    let err = env.render("missing", HashMap::new()).await.unwrap_err();
    assert!(matches!(err, cascada::Error::Core(cascada_core::Error::TemplateNotFound(_))));
}

#[tokio::test]
async fn custom_singleton_handler_state_persists_across_renders() {
    let loader = Arc::new(MemoryLoader::new());
    let handler = Arc::new(cascada::DataHandler::new());
    let env = Environment::builder(loader).with_command_handler("log", handler.clone()).build();

    env.render_script(":data\n@log.count += 1\n", HashMap::new()).await.unwrap();
    env.render_script(":data\n@log.count += 1\n", HashMap::new()).await.unwrap();

    // The singleton handler is the same instance every render shares; a
    // fresh factory-registered handler would reset between calls instead.
    assert_eq!(handler.snapshot().get_path(&[cascada_value::Part::field("count")]), cascada_value::Value::from(2));
}

fn delayed(value: Value, millis: u64) -> Value {
    let pending = cascada_value::Pending::new();
    let resolver = pending.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        resolver.resolve(value);
    });
    Value::Pending(pending)
}

/// `spec.md` §8 scenario 1: two independent async fetches merged into one
/// `@data` result, regardless of which one the executor happens to await
/// first.
#[tokio::test]
async fn two_async_fetches_merge_into_one_data_result_in_program_order() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader)
        .with_function("fetchUsers", |_args| {
            let mut alice = indexmap::IndexMap::new();
            alice.insert("id".to_string(), Value::from(1));
            alice.insert("name".to_string(), Value::from("Alice"));
            let mut bob = indexmap::IndexMap::new();
            bob.insert("id".to_string(), Value::from(2));
            bob.insert("name".to_string(), Value::from("Bob"));
            // The slower of the two fetches resolves last, but the command
            // buffer still applies `@data.result.users` before
            // `@data.result.config` only because it was *reached* first in
            // program order, not because it settles first.
            delayed(Value::List(vec![Value::Dict(alice), Value::Dict(bob)]), 20)
        })
        .with_function("fetchConfig", |_args| {
            let mut config = indexmap::IndexMap::new();
            config.insert("theme".to_string(), Value::from("dark"));
            config.insert("version".to_string(), Value::from("1.5"));
            delayed(Value::Dict(config), 1)
        })
        .build();

    let script = ":data\n\
         var u = fetchUsers()\n\
         var c = fetchConfig()\n\
         @data.result.users.set(u)\n\
         @data.result.config.merge(c)\n\
         @data.result.config.loaded.set(true)\n";
    let outcome = env.render_script(script, HashMap::new()).await.unwrap();

    let cascada::RenderOutcome::Focused(result) = outcome else { panic!("expected focused :data result") };
    assert_eq!(
        result.get_path(&[cascada_value::Part::field("result"), cascada_value::Part::field("config")]),
        {
            let mut m = indexmap::IndexMap::new();
            m.insert("theme".to_string(), Value::from("dark"));
            m.insert("version".to_string(), Value::from("1.5"));
            m.insert("loaded".to_string(), Value::Bool(true));
            Value::Dict(m)
        }
    );
    assert_eq!(
        result.get_path(&[cascada_value::Part::field("result"), cascada_value::Part::field("users")])
            .get_path(&[cascada_value::Part::Index(1), cascada_value::Part::field("name")]),
        Value::from("Bob")
    );
}

/// `spec.md` §8 scenario 2: a registered global function (`range`, a
/// built-in) drives a `for` loop whose body calls another registered
/// function per iteration.
#[tokio::test]
async fn range_drives_a_for_loop_calling_a_registered_function_per_iteration() {
    let loader = Arc::new(MemoryLoader::new());
    let names = ["Alice", "Bob", "Charlie", "David", "Eve"];
    let env = Environment::builder(loader)
        .with_function("getName", move |args| {
            let i = args.first().and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(0);
            names.get(i).map(|n| Value::from(*n)).unwrap_or(Value::Undef)
        })
        .build();

    let outcome = env
        .render_string("{%- for i in range(5) %}<li>{{ getName(i) }}</li>{%- endfor %}", HashMap::new())
        .await
        .unwrap();

    let expected: String = names.iter().map(|n| format!("<li>{n}</li>")).collect();
    assert_eq!(outcome.text().as_deref(), Some(expected.as_str()));
}

/// `spec.md` §8 scenario 3: chained compound assignments on `@data`.
#[tokio::test]
async fn compound_assignments_chain_in_program_order() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader).build();

    let script = ":data\n\
         @data.counter = 10\n\
         @data.counter += 5\n\
         @data.counter *= 2\n\
         @data.counter -= 3\n\
         @data.counter++\n\
         @data.counter /= 2\n";
    let outcome = env.render_script(script, HashMap::new()).await.unwrap();

    let cascada::RenderOutcome::Focused(result) = outcome else { panic!("expected focused :data result") };
    assert_eq!(result.get_path(&[cascada_value::Part::field("counter")]), Value::from(14));
}

/// `spec.md` §8 scenario 4: a guard absorbs a poisoned expression, reverting
/// the output it had already produced, and execution continues past
/// `{% endguard %}`.
#[tokio::test]
async fn a_failing_guard_reverts_its_own_output_and_lets_the_render_continue() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader).with_function("fail", |_args| Value::from(cascada_value::Error::custom("fail"))).build();

    let outcome = env
        .render_string("{% guard %}OK{{ fail() }}MORE{% endguard %}AFTER", HashMap::new())
        .await
        .unwrap();

    assert_eq!(outcome.text().as_deref(), Some("AFTER"));
}

/// `spec.md` §8 scenario 6: `for`/`else` over a non-empty, then an empty,
/// iterable.
#[tokio::test]
async fn for_else_runs_only_when_the_iterable_is_empty() {
    let loader = Arc::new(MemoryLoader::new());
    let env = Environment::builder(loader).build();

    let script = ":data\n\
         var total = 0\n\
         for i in items\n\
         \ttotal = total + i\n\
         else\n\
         \ttotal = 100\n\
         endfor\n\
         @data.total = total\n";

    let with_items =
        env.render_script(script, HashMap::from([("items".to_string(), Value::List(vec![
            Value::from(1), Value::from(2), Value::from(3),
        ]))]))
            .await
            .unwrap();
    let cascada::RenderOutcome::Focused(v) = with_items else { panic!("expected focused :data result") };
    assert_eq!(v.get_path(&[cascada_value::Part::field("total")]), Value::from(6));

    let empty = env
        .render_script(script, HashMap::from([("items".to_string(), Value::List(vec![]))]))
        .await
        .unwrap();
    let cascada::RenderOutcome::Focused(v) = empty else { panic!("expected focused :data result") };
    assert_eq!(v.get_path(&[cascada_value::Part::field("total")]), Value::from(100));
}

/// `spec.md` §8 scenario 5 / testable property "Sequence lock (path)": two
/// `!`-marked calls on the same host object run strictly in program order,
/// regardless of which one's own delay is longer.
#[tokio::test]
async fn sequence_lock_runs_marked_calls_in_program_order_despite_delays() {
    #[derive(Debug)]
    struct Sequencer {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl HostObject for Sequencer {
        fn get(&self, key: &str) -> Option<Value> {
            if key != "runOp" {
                return None;
            }
            let log = self.log.clone();
            Some(Value::Func(cascada_value::Func::new(move |args: &[Value]| {
                let label = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
                let delay = args.get(1).and_then(Value::as_number).and_then(|n| n.as_usize()).unwrap_or(0) as u64;
                let log = log.clone();
                let pending = cascada_value::Pending::new();
                let resolver = pending.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(format!("{label} on seq1"));
                    resolver.resolve(Value::Undef);
                });
                Value::Pending(pending)
            })))
        }
    }

    let loader = Arc::new(MemoryLoader::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let sequencer = Value::Obj(cascada_value::ObjHandle(Arc::new(Sequencer { log: log.clone() })));
    let env = Environment::builder(loader).with_value("sequencer", sequencer).build();

    env.render_string("{% do sequencer!.runOp('A', 20) %}{% do sequencer!.runOp('B', 5) %}", HashMap::new())
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["A on seq1".to_string(), "B on seq1".to_string()]);
}
