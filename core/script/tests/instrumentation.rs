//! Instrumenting running scripts end to end.

use indoc::indoc;
use std::sync::{Arc, Mutex, PoisonError};
use test_case::test_case;
use waypoint_engine::{
    Anchor, Debugger, Error, Frame, HostError, Identifier, Instrumenter, Monitor,
    Namespace, NativeFunction, ResolutionError, RoutineRef, Scope, Value, source_hash,
};
use waypoint_script::{Interpreter, Module, ScriptError};

struct Session {
    interp: Interpreter,
    module: Arc<Module>,
    instrumenter: Arc<Instrumenter>,
}

impl Session {
    fn new(source: &str) -> Self {
        let interp = Interpreter::new();
        let module = interp.load("test", source).unwrap();
        let instrumenter = Instrumenter::builder()
            .build(interp.monitoring().clone())
            .unwrap();
        Self {
            interp,
            module,
            instrumenter,
        }
    }

    fn routine(&self, name: &str) -> RoutineRef {
        self.module.routine(name).unwrap()
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.interp.call(&self.module, name, args)
    }
}

const IDENTITY: &str = indoc! {"
    def f(x):
        return x
"};

#[test]
fn inject_rebinds_a_local() {
    let s = Session::new(IDENTITY);
    s.instrumenter
        .when(s.routine("f"))
        .at("return x")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 1")
        .unwrap();

    assert_eq!(s.call("f", vec![2.into()]).unwrap(), Value::Int(1));

    s.instrumenter.clear_all().unwrap();
    assert_eq!(s.call("f", vec![2.into()]).unwrap(), Value::Int(2));
    assert_eq!(s.instrumenter.handler_count(), 0);
}

#[test]
fn invoke_writes_back_returned_bindings() {
    let s = Session::new(indoc! {"
        def f(x, y):
            return x + y
    "});
    let function = NativeFunction::new(["x", "y"], |args| {
        let x = args.get("x").and_then(Value::as_int).unwrap_or_default();
        let y = args.get("y").and_then(Value::as_int).unwrap_or_default();
        Ok(Value::map([("x", Value::Int(x + 1)), ("y", Value::Int(y + 2))]))
    })
    .unwrap();
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .build()
        .unwrap()
        .invoke(&s.instrumenter, function)
        .unwrap();

    assert_eq!(s.call("f", vec![1.into(), 1.into()]).unwrap(), Value::Int(5));
}

#[test]
fn writeback_of_an_unknown_local_fails_the_script() {
    let s = Session::new(IDENTITY);
    let function = NativeFunction::new(["x"], |_| Ok(Value::map([("nope", Value::Int(1))]))).unwrap();
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .build()
        .unwrap()
        .invoke(&s.instrumenter, function)
        .unwrap();

    let err = s.call("f", vec![1.into()]).unwrap_err();
    assert!(matches!(err, ScriptError::Instrumentation(Error::Writeback(_))), "{err}");
}

#[test]
fn disjoint_tuple_does_not_resolve() {
    let s = Session::new(indoc! {"
        def f(x):
            y = x + 1
            return y
    "});
    let result = s
        .instrumenter
        .when(s.routine("f"))
        .at(Identifier::all(["y =".into(), "return".into()]))
        .build();
    assert!(matches!(
        result,
        Err(Error::Resolution(ResolutionError::NoMatch { .. }))
    ));
}

#[test]
fn handlers_fire_in_submission_order() {
    let s = Session::new(IDENTITY);
    let trigger = s.instrumenter.when(s.routine("f")).at("return").build().unwrap();
    trigger.inject(&s.instrumenter, "x = x * 10").unwrap();
    trigger.inject(&s.instrumenter, "x = x + 1").unwrap();

    assert_eq!(s.call("f", vec![2.into()]).unwrap(), Value::Int(21));
}

#[test]
fn disable_and_reenable() {
    let s = Session::new(IDENTITY);
    let handler = s
        .instrumenter
        .when(s.routine("f"))
        .at("return")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 1")
        .unwrap();

    handler.disable().unwrap();
    assert_eq!(s.call("f", vec![2.into()]).unwrap(), Value::Int(2));
    assert_eq!(s.interp.monitoring().disabled_sites(), 1);

    handler.enable().unwrap();
    assert_eq!(s.interp.monitoring().disabled_sites(), 0);
    assert_eq!(s.call("f", vec![2.into()]).unwrap(), Value::Int(1));
}

#[test]
fn remove_is_idempotent_and_unwatches() {
    let s = Session::new(IDENTITY);
    let f = s.routine("f");
    let handler = s
        .instrumenter
        .when(Arc::clone(&f))
        .at("return")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 1")
        .unwrap();
    assert!(!s.interp.monitoring().watched(Scope::Routine(f.id())).is_empty());

    handler.remove().unwrap();
    handler.remove().unwrap();
    s.instrumenter.remove(&handler).unwrap();

    assert!(s.interp.monitoring().watched(Scope::Routine(f.id())).is_empty());
    assert!(handler.enable().is_err());
    assert_eq!(s.call("f", vec![2.into()]).unwrap(), Value::Int(2));
}

#[test_case("x > 1", 5, 0 ; "condition holds")]
#[test_case("x > 1", 1, 1 ; "condition fails")]
#[test_case("undefined > 1", 5, 5 ; "failing condition reads as false")]
fn conditional_inject(condition: &str, arg: i64, expected: i64) {
    let s = Session::new(IDENTITY);
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .condition(condition)
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 0")
        .unwrap();

    assert_eq!(s.call("f", vec![arg.into()]).unwrap(), Value::Int(expected));
}

#[test]
fn injected_code_can_reenter_the_same_site() {
    let s = Session::new(IDENTITY);
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .condition("x > 0")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = f(x - 1) + 10")
        .unwrap();

    assert_eq!(s.call("f", vec![3.into()]).unwrap(), Value::Int(30));
    assert_eq!(s.instrumenter.handler_count(), 1);
}

#[test]
fn malformed_condition_is_rejected_at_build() {
    let s = Session::new(IDENTITY);
    let result = s
        .instrumenter
        .when(s.routine("f"))
        .at("return")
        .condition("x >")
        .build();
    assert!(matches!(
        result,
        Err(Error::Resolution(ResolutionError::InvalidCondition { .. }))
    ));
}

#[test]
fn predicate_can_disable_its_handler() {
    let s = Session::new(IDENTITY);
    let predicate = NativeFunction::new(["x"], |args| {
        Ok(match args.get("x").and_then(Value::as_int) {
            Some(0) => Value::Disable,
            _ => Value::Bool(true),
        })
    })
    .unwrap();
    let handler = s
        .instrumenter
        .when(s.routine("f"))
        .at("return")
        .condition(predicate)
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = x + 100")
        .unwrap();

    assert_eq!(s.call("f", vec![1.into()]).unwrap(), Value::Int(101));
    assert_eq!(s.call("f", vec![0.into()]).unwrap(), Value::Int(0));
    assert!(!handler.is_enabled());
    assert_eq!(s.call("f", vec![1.into()]).unwrap(), Value::Int(1));
}

#[test]
fn jump_skips_a_failing_line() {
    let s = Session::new(indoc! {"
        def f():
            x = 1
            assert False
            return x
    "});
    assert!(matches!(s.call("f", vec![]), Err(ScriptError::Assertion { line: 3 })));

    s.instrumenter
        .when(s.routine("f"))
        .at("assert")
        .build()
        .unwrap()
        .jump(&s.instrumenter, "return")
        .unwrap();

    assert_eq!(s.call("f", vec![]).unwrap(), Value::Int(1));
}

#[test]
fn jump_to_an_unknown_line_fails() {
    let s = Session::new(IDENTITY);
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .build()
        .unwrap()
        .jump(&s.instrumenter, "nowhere")
        .unwrap();

    let err = s.call("f", vec![1.into()]).unwrap_err();
    assert!(matches!(err, ScriptError::Instrumentation(Error::Jump(_))), "{err}");
}

#[test]
fn start_and_return_events() {
    let s = Session::new(indoc! {"
        def f(x):
            y = x * 2
            return y
    "});
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = {
        let seen = Arc::clone(&seen);
        NativeFunction::new(["_retval"], move |args| {
            if let Some(value) = args.get("_retval") {
                seen.lock().unwrap_or_else(PoisonError::into_inner).push(value.clone());
            }
            Ok(Value::None)
        })
        .unwrap()
    };

    let f = s.routine("f");
    s.instrumenter
        .when(Arc::clone(&f))
        .at(Identifier::Start)
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 10")
        .unwrap();
    s.instrumenter
        .when(f)
        .at("<return>")
        .build()
        .unwrap()
        .invoke(&s.instrumenter, record)
        .unwrap();

    assert_eq!(s.call("f", vec![1.into()]).unwrap(), Value::Int(20));
    assert_eq!(*seen.lock().unwrap(), vec![Value::Int(20)]);
}

#[test]
fn sentinel_inside_a_tuple_is_rejected() {
    let s = Session::new(IDENTITY);
    let result = s
        .instrumenter
        .when(s.routine("f"))
        .at(Identifier::all([Identifier::Start, "return".into()]))
        .build();
    assert!(matches!(
        result,
        Err(Error::Resolution(ResolutionError::SentinelInTuple(_)))
    ));
}

#[test]
fn global_trigger_fires_in_every_routine() {
    let s = Session::new(indoc! {"
        def f(x):
            y = x + 1
            return y

        def g(x):
            y = x * 2
            return y
    "});
    s.instrumenter
        .when(Anchor::Global)
        .at("y =")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 3")
        .unwrap();

    assert_eq!(s.call("f", vec![1.into()]).unwrap(), Value::Int(4));
    assert_eq!(s.call("g", vec![1.into()]).unwrap(), Value::Int(6));
}

#[test]
fn offsets_skip_decorators() {
    let s = Session::new(indoc! {"
        @trace
        @cached
        def f(x):
            x = x + 1
            return x
    "});
    s.instrumenter
        .when(s.routine("f"))
        .at("+2")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 0")
        .unwrap();

    assert_eq!(s.call("f", vec![5.into()]).unwrap(), Value::Int(0));
}

#[test]
fn nested_lambda_shares_the_line() {
    let s = Session::new(indoc! {"
        def f(x):
            g = lambda a: a + 1
            return g(x)
    "});
    s.instrumenter
        .when(s.routine("f"))
        .at("g = lambda")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "a = 100")
        .unwrap();

    assert_eq!(s.call("f", vec![1.into()]).unwrap(), Value::Int(101));
}

#[test]
fn namespace_anchor_covers_its_routines() {
    let s = Session::new(indoc! {"
        def f(x):
            return x

        def g(x):
            return x * 2
    "});
    let namespace: Arc<dyn Namespace> = s.module.clone();
    s.instrumenter
        .when(namespace)
        .at("return")
        .build()
        .unwrap()
        .inject(&s.instrumenter, "x = 7")
        .unwrap();

    assert_eq!(s.call("f", vec![1.into()]).unwrap(), Value::Int(7));
    assert_eq!(s.call("g", vec![1.into()]).unwrap(), Value::Int(14));
}

#[test]
fn source_hash_guards_against_drift() {
    let s = Session::new(IDENTITY);
    let f = s.routine("f");
    let hash = source_hash(&Anchor::from(Arc::clone(&f))).unwrap();

    assert!(
        s.instrumenter
            .when(Arc::clone(&f))
            .at("return")
            .source_hash(hash)
            .build()
            .is_ok()
    );
    assert!(matches!(
        s.instrumenter
            .when(f)
            .at("return")
            .source_hash("0000000000000000")
            .build(),
        Err(Error::Resolution(_))
    ));
}

#[test]
fn callback_error_aborts_the_script() {
    let s = Session::new(IDENTITY);
    let failing = NativeFunction::new(["x"], |_| Err(HostError::new("boom"))).unwrap();
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .build()
        .unwrap()
        .invoke(&s.instrumenter, failing)
        .unwrap();

    let err = s.call("f", vec![1.into()]).unwrap_err();
    assert!(matches!(err, ScriptError::Instrumentation(Error::Host(_))), "{err}");
}

#[test]
fn breakpoint_without_debugger_fails() {
    let s = Session::new(IDENTITY);
    s.instrumenter
        .when(s.routine("f"))
        .at("return")
        .build()
        .unwrap()
        .breakpoint(&s.instrumenter)
        .unwrap();

    assert!(matches!(
        s.call("f", vec![1.into()]),
        Err(ScriptError::Instrumentation(Error::NoDebugger))
    ));
}

struct Scripted {
    commands: Vec<&'static str>,
    seen: Mutex<Vec<String>>,
}

impl Debugger for Scripted {
    fn interact(&self, frame: &mut dyn Frame) -> Result<(), HostError> {
        for command in &self.commands {
            frame.exec(command)?;
        }
        let mut names = frame.local_names();
        names.sort();
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(names);
        Ok(())
    }
}

#[test]
fn breakpoint_hands_the_frame_to_the_debugger() {
    let interp = Interpreter::new();
    let module = interp.load("test", IDENTITY).unwrap();
    let debugger = Arc::new(Scripted {
        commands: vec!["x = x + 41"],
        seen: Mutex::new(Vec::new()),
    });
    let instrumenter = Instrumenter::builder()
        .tool_name("test-debugger")
        .debugger(debugger.clone())
        .build(interp.monitoring().clone())
        .unwrap();
    instrumenter
        .when(module.routine("f").unwrap())
        .at("return")
        .build()
        .unwrap()
        .breakpoint(&instrumenter)
        .unwrap();

    assert_eq!(interp.call(&module, "f", vec![1.into()]).unwrap(), Value::Int(42));
    assert_eq!(*debugger.seen.lock().unwrap(), vec!["x".to_owned()]);
    assert_eq!(interp.monitoring().tool().as_deref(), Some("test-debugger"));
}

#[test]
fn only_one_live_tool_per_interpreter() {
    let s = Session::new(IDENTITY);
    assert!(Instrumenter::builder().build(s.interp.monitoring().clone()).is_err());

    drop(s.instrumenter);
    assert!(Instrumenter::builder().build(s.interp.monitoring().clone()).is_ok());
}
