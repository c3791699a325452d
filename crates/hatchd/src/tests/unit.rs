//! Unit tests for routing, replies and bootstrap.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use hatch_config::MethodTable;
use rstest::{fixture, rstest};

use crate::accounts::MockAccountResolver;
use crate::bootstrap_with;
use crate::bus::{BusArg, MessageKind, Outgoing, ReplyBody};
use crate::dispatch::{CallError, Context, DeferredReply, MethodCall, Outcome, RouteError};
use crate::event_loop::{EventLoop, WatchFlags};
use crate::{register_methods, run_iteration};

use super::support::{
    ALICE_UID, FakeBus, HealthEvent, RecordingHealthReporter, TestConfigLoader, TestWorld,
    method_call,
};

const SERVICE: &str = "org.hatch.Jobs";
const INTERFACE: &str = "org.hatch.Jobs1";

#[fixture]
fn world() -> TestWorld {
    let world = TestWorld::new();
    world.bus.set_uid(":1.10", ALICE_UID);
    world
}

#[rstest]
fn bootstrap_reports_start_and_success() {
    let reporter = Arc::new(RecordingHealthReporter::default());

    bootstrap_with(&TestConfigLoader, reporter.clone()).expect("bootstrap should succeed");

    let events = reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapStarting));
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
}

#[rstest]
fn find_method_ignores_foreign_connections(mut world: TestWorld) {
    world.register(SERVICE, "/org/hatch/*", INTERFACE, "run", 0);
    let token = world.context.services()[0].token().expect("connected");

    let route = world
        .context
        .find_method(token, SERVICE, "/org/hatch/a", Some(INTERFACE), "run")
        .expect("route");
    assert_eq!(route.method.name(), "run");

    let foreign = crate::bus::ConnectionToken::new(token.get() + 100);
    assert!(matches!(
        world
            .context
            .find_method(foreign, SERVICE, "/org/hatch/a", None, "run"),
        Err(RouteError::NotOurs)
    ));
}

#[rstest]
fn ambiguous_interface_guess_is_rejected(mut world: TestWorld) {
    world.register(SERVICE, "/o", "org.hatch.A", "run", 0);
    world.register(SERVICE, "/o", "org.hatch.B", "run", 0);

    world.call(Some(":1.10"), SERVICE, "/o", None, "run", &[]);

    assert_eq!(
        world.last_rejection(),
        Some(&CallError::NoInterface {
            interface: String::new()
        })
    );
    assert!(world.calls.borrow().is_empty());
}

#[rstest]
fn non_calls_and_incomplete_calls_are_left_alone(mut world: TestWorld) {
    world.register(SERVICE, "/o", INTERFACE, "run", 0);
    let mut signal = method_call(Some(":1.10"), SERVICE, "/o", Some(INTERFACE), "run", &[]);
    signal.kind = MessageKind::Signal;
    let mut memberless = method_call(Some(":1.10"), SERVICE, "/o", Some(INTERFACE), "run", &[]);
    memberless.header.member = None;

    world.bus.deliver(SERVICE, signal);
    world.bus.deliver(SERVICE, memberless);
    world.drain();

    assert_eq!(world.outcomes, vec![Outcome::Ignored, Outcome::Ignored]);
    assert!(world.bus.sent_by(SERVICE).is_empty());
}

#[rstest]
fn unimplemented_methods_are_reported(mut world: TestWorld) {
    world.register_unimplemented(SERVICE, "/o", INTERFACE, "later");

    world.call(Some(":1.10"), SERVICE, "/o", Some(INTERFACE), "later", &[]);

    assert_eq!(
        world.last_error_reply(SERVICE),
        Some((
            "org.hatch.Error.UnimplementedMethod".to_owned(),
            "later".to_owned()
        ))
    );
}

#[rstest]
fn mirrored_replies_follow_the_return(mut world: TestWorld) {
    world.register_handler(
        SERVICE,
        "/o",
        INTERFACE,
        "run",
        0,
        Rc::new(|call: &mut MethodCall<'_>| call.reply_text(4, "done", true)),
    );

    world.call(Some(":1.10"), SERVICE, "/o", None, "run", &[]);

    let sent = world.bus.sent_by(SERVICE);
    let body = ReplyBody::Text {
        code: 4,
        text: "done".to_owned(),
    };
    match sent.as_slice() {
        [
            Outgoing::Return { body: returned, .. },
            Outgoing::Signal {
                call,
                interface,
                body: mirrored,
            },
        ] => {
            assert_eq!(returned, &body);
            assert_eq!(mirrored, &body);
            assert_eq!(interface, INTERFACE);
            assert_eq!(call.sender.as_deref(), Some(":1.10"));
            assert_eq!(call.serial, 7);
        }
        other => panic!("unexpected messages: {other:?}"),
    }
}

#[rstest]
fn deferred_replies_are_sent_later(mut world: TestWorld) {
    let parked: Rc<RefCell<Option<DeferredReply>>> = Rc::default();
    let slot = Rc::clone(&parked);
    world.register_handler(
        SERVICE,
        "/o",
        INTERFACE,
        "slow",
        0,
        Rc::new(move |call: &mut MethodCall<'_>| {
            *slot.borrow_mut() = Some(call.defer());
        }),
    );

    world.call(Some(":1.10"), SERVICE, "/o", None, "slow", &[]);
    assert!(world.bus.sent_by(SERVICE).is_empty());

    let reply = parked.borrow_mut().take().expect("handler deferred");
    let body = ReplyBody::Plain("finished".to_owned());
    assert!(world.context.complete(reply, body.clone(), false));
    assert!(matches!(
        world.bus.sent_by(SERVICE).as_slice(),
        [Outgoing::Return { body: sent, .. }] if *sent == body
    ));
}

#[rstest]
fn deferred_replies_for_closed_connections_are_dropped(mut world: TestWorld) {
    let parked: Rc<RefCell<Option<DeferredReply>>> = Rc::default();
    let slot = Rc::clone(&parked);
    world.register_handler(
        SERVICE,
        "/o",
        INTERFACE,
        "slow",
        0,
        Rc::new(move |call: &mut MethodCall<'_>| {
            *slot.borrow_mut() = Some(call.defer());
        }),
    );
    world.call(Some(":1.10"), SERVICE, "/o", None, "slow", &[]);
    world.bus.sever(SERVICE);
    let TestWorld {
        context, events, ..
    } = &mut world;
    context.reconcile(events);

    let reply = parked.borrow_mut().take().expect("handler deferred");
    assert!(!world
        .context
        .complete(reply, ReplyBody::Plain(String::new()), false));
}

#[rstest]
fn security_labels_reach_the_handler(mut world: TestWorld) {
    world.context = Context::new(world.bus.connector(), Duration::from_secs(30))
        .with_accounts(super::support::FakeAccounts::default().with(ALICE_UID, "alice"))
        .with_security_context_lookup(true);
    world.bus.set_label(":1.10", "staff_u:staff_r:staff_t:s0");
    let seen: Rc<RefCell<Option<String>>> = Rc::default();
    let slot = Rc::clone(&seen);
    world.register_handler(
        SERVICE,
        "/o",
        INTERFACE,
        "run",
        0,
        Rc::new(move |call: &mut MethodCall<'_>| {
            *slot.borrow_mut() = call.request().security_label().map(str::to_owned);
            call.reply_plain(String::new());
        }),
    );

    world.call(Some(":1.10"), SERVICE, "/o", None, "run", &[]);

    assert_eq!(
        seen.borrow().as_deref(),
        Some("staff_u:staff_r:staff_t:s0")
    );
}

#[rstest]
fn resolver_misses_reject_with_the_uid(mut world: TestWorld) {
    let mut accounts = MockAccountResolver::new();
    accounts
        .expect_account_name()
        .withf(|uid| *uid == ALICE_UID)
        .times(1)
        .returning(|_| None);
    world.context = Context::new(world.bus.connector(), Duration::from_secs(30))
        .with_sleeper(world.sleeper.clone())
        .with_accounts(accounts);
    world.register(SERVICE, "/o", INTERFACE, "run", 0);

    world.call(Some(":1.10"), SERVICE, "/o", None, "run", &[]);

    assert_eq!(
        world.last_error_reply(SERVICE),
        Some(("org.hatch.Error.UnknownUser".to_owned(), "UID=1000".to_owned()))
    );
}

#[rstest]
fn reply_results_are_read_from_returns_only() {
    let mut message = method_call(None, SERVICE, "/o", None, "run", &["x"]);
    message.args.insert(0, BusArg::Int32(5));
    assert_eq!(
        crate::dispatch::RequestContext::from_message(&message).result(),
        -1
    );
    message.kind = MessageKind::MethodReturn;
    let request = crate::dispatch::RequestContext::from_message(&message);
    assert_eq!(request.result(), 5);
    assert_eq!(request.args(), ["x"]);
}

#[rstest]
fn method_table_registers_helpers_and_introspection() {
    let bus = FakeBus::default();
    bus.set_uid(":1.10", ALICE_UID);
    let mut context = Context::new(bus.connector(), Duration::from_secs(30))
        .with_accounts(super::support::FakeAccounts::default().with(ALICE_UID, "alice"));
    let mut events = EventLoop::new();
    let table = MethodTable::from_toml_str(
        r#"
        [[method]]
        service = "org.hatch.Jobs"
        object = "/org/hatch/jobs"
        interface = "org.hatch.Jobs1"
        method = "run"
        helper = "/usr/libexec/hatch/run --verbose"
        arguments = 2
        "#,
    )
    .expect("table parses");

    let registered = register_methods(&mut context, &mut events, &table).expect("registered");
    assert_eq!(registered, 1);

    bus.deliver(
        SERVICE,
        method_call(
            Some(":1.10"),
            SERVICE,
            "/org/hatch/jobs",
            Some("org.freedesktop.DBus.Introspectable"),
            "Introspect",
            &[],
        ),
    );
    context.dispatch_pending(&mut events);

    let sent = bus.sent_by(SERVICE);
    let Some(Outgoing::Return {
        body: ReplyBody::Plain(xml),
        ..
    }) = sent.last()
    else {
        panic!("unexpected messages: {sent:?}");
    };
    assert!(xml.starts_with("<!DOCTYPE node"));
    assert!(xml.contains("<interface name=\"org.hatch.Jobs1\">"));
    assert!(xml.contains("<method name=\"run\">"));
    assert!(xml.contains("<arg name=\"arg1\" type=\"s\" direction=\"in\"/>"));
    assert!(xml.contains("<arg name=\"xml_data\" type=\"s\" direction=\"out\"/>"));
}

#[rstest]
fn failed_rebinds_are_retried_without_traffic(mut world: TestWorld) {
    world.context.set_reconnect_timeout(Duration::from_millis(20));
    world.register(SERVICE, "/o", INTERFACE, "run", 0);
    assert_eq!(world.context.reconcile_interval(), None);
    world.bus.occupy_name(SERVICE);
    world.bus.sever(SERVICE);
    assert_eq!(world.context.reconcile(&mut world.events), 0);
    assert!(world.context.services()[0].token().is_none());
    assert_eq!(world.context.reconcile_interval(), Some(Duration::from_millis(20)));

    world.bus.free_name(SERVICE);
    run_iteration(&mut world.context, &mut world.events).expect("loop turn");

    assert!(world.bus.owner_of(SERVICE).is_some());
    assert_eq!(world.context.reconcile_interval(), None);
}

#[rstest]
fn connections_that_drop_at_once_are_retried(mut world: TestWorld) {
    world.bus.dead_opens(2);

    world.register(SERVICE, "/o", INTERFACE, "run", 0);

    assert!(matches!(world.registration, Some(Ok(()))));
    assert_eq!(
        world.bus.log(),
        vec![
            "open #0",
            "close #0",
            "open #1",
            "close #1",
            "open #2",
            "exit_on_disconnect #2 false",
            format!("request_name #2 {SERVICE}").as_str(),
        ]
    );
    assert_eq!(world.bus.owner_of(SERVICE), Some(2));
    assert_eq!(world.sleeper.pauses(), vec![Duration::from_secs(2); 2]);
}

#[rstest]
fn readable_bus_descriptors_drive_dispatch(mut world: TestWorld) {
    world.register(SERVICE, "/org/hatch/*", INTERFACE, "run", 0);
    world.bus.deliver(
        SERVICE,
        method_call(Some(":1.10"), SERVICE, "/org/hatch/a", Some(INTERFACE), "run", &[]),
    );
    world.bus.poke(SERVICE);

    let ready = world
        .events
        .iterate(&mut world.context)
        .expect("loop turn");

    assert_eq!(ready, 1);
    assert_eq!(world.bus.watch_events(), vec![(0, WatchFlags::READABLE)]);
    assert_eq!(world.calls.borrow().len(), 1);
    let sent = world.bus.sent_by(SERVICE);
    assert!(
        matches!(
            sent.as_slice(),
            [Outgoing::Return {
                body: ReplyBody::Text { code: 0, .. },
                ..
            }]
        ),
        "unexpected messages: {sent:?}"
    );
}
