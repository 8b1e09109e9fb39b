//! End-to-end peer tests: remote method calls, timeout semantics, and
//! service wiring over linked in-memory connections.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use tannoy::{
    CallFailure, CallState, Connection, Context, MethodHandler, RemoteMethod, RemoteMethodCall,
    RequestKind, RpcError, Uri, WampConnection,
};
use tannoy_testkit::{LinkedPair, RecordingSender};

fn server_home(user: &str) -> String {
    format!("/wamp/server/user/{user}/home")
}

fn client_home(user: &str) -> String {
    format!("/wamp/clients/{user}/home")
}

fn linked_pair(context: &Context, user: &str) -> LinkedPair {
    LinkedPair::new(
        context,
        "/peer_test",
        user,
        &client_home(user),
        &server_home(user),
    )
}

/// Installs an adder method under the user's server home.
fn install_adder(context: &Context, user: &str) {
    let directory = context.directory();
    let path = format!("{}/rpc/add", server_home(user));
    assert!(directory.create_path(&path));
    assert!(directory.add_handler(
        &path,
        Arc::new(MethodHandler::typed("add", false, |(x, y, z): (i64, i64, i64)| {
            Ok::<_, RpcError>(x + y + z)
        })),
    ));
}

#[tokio::test]
async fn remote_method_returns_typed_result() {
    let user = "rpc@domain.zz";
    let context = Context::new();
    install_adder(&context, user);
    let pair = linked_pair(&context, user);
    pair.open();

    let connection: Arc<dyn Connection> = pair.client().clone();
    let add = RemoteMethod::<i64>::new(connection, "/rpc/add");
    let result = add.call(vec![json!(2), json!(3), json!(5)]).await.unwrap();
    assert_eq!(result, Some(10));

    // The same remote method is reusable.
    let result = add.call(vec![json!(1), json!(1), json!(1)]).await.unwrap();
    assert_eq!(result, Some(3));

    pair.close();
}

#[tokio::test]
async fn remote_method_surfaces_remote_errors() {
    let user = "rpc-err@domain.zz";
    let context = Context::new();
    let directory = context.directory();
    let path = format!("{}/rpc/broken", server_home(user));
    assert!(directory.create_path(&path));
    assert!(directory.add_handler(
        &path,
        Arc::new(MethodHandler::typed("broken", false, |(): ()| {
            Err::<Value, _>(RpcError::new("kaput", Some(json!({"code": 12}))))
        })),
    ));
    let pair = linked_pair(&context, user);
    pair.open();

    let connection: Arc<dyn Connection> = pair.client().clone();
    let broken = RemoteMethod::<Value>::new(connection, "/rpc/broken");
    let error = broken.call(vec![]).await.unwrap_err();
    assert_eq!(error.reason, CallFailure::RemoteError);
    assert_eq!(error.description.as_deref(), Some("kaput"));
    assert_eq!(error.details, Some(json!({"code": 12})));
    let error_uri = error.error_uri.unwrap();
    assert_eq!(error_uri.fragment(), "logic_error");

    pair.close();
}

#[tokio::test]
async fn undefined_method_surfaces_rpc_error() {
    let user = "rpc-missing@domain.zz";
    let context = Context::new();
    let pair = linked_pair(&context, user);
    pair.open();

    let connection: Arc<dyn Connection> = pair.client().clone();
    let missing = RemoteMethod::<Value>::new(connection, "/rpc/missing");
    let error = missing.call(vec![]).await.unwrap_err();
    assert_eq!(error.reason, CallFailure::RemoteError);
    assert_eq!(error.description.as_deref(), Some("undefined method"));
    assert_eq!(error.error_uri.unwrap().fragment(), "rpc_error");

    pair.close();
}

#[tokio::test]
async fn timed_out_call_can_still_complete() {
    // A connection whose peer never answers: frames are recorded but not
    // delivered anywhere.
    let context = Context::new();
    let sender = RecordingSender::new();
    let client = WampConnection::new(
        Uri::parse("wamp://silent.host/endpoint").unwrap(),
        Some("quiet".to_owned()),
        "/home/quiet",
        sender.clone(),
        context.clone(),
    );

    let connection: Arc<dyn Connection> = client.clone();
    let mut call = RemoteMethodCall::<i64>::new(connection, "/rpc/slow");
    call.set_timeout(Duration::from_millis(20));
    assert!(!call.call(vec![json!(1)]).await);
    assert_eq!(call.state(), CallState::InProgress);

    // The timeout did not cancel anything: waiting again still times out,
    // and a late response completes the call.
    assert!(!call.wait_until_completion(Duration::from_millis(20)).await);
    let request = sender.last_message().unwrap();
    let call_id = request[1].as_str().unwrap();
    assert!(client.process(&format!("[3,{},5]", json!(call_id))));
    assert!(call.wait_until_completion(Duration::from_millis(20)).await);
    assert_eq!(call.state(), CallState::Completed);
    assert!(call.is_successful());
    assert_eq!(call.result(), Some(5));
}

#[tokio::test]
async fn a_call_fires_at_most_once() {
    let user = "once@domain.zz";
    let context = Context::new();
    install_adder(&context, user);
    let pair = linked_pair(&context, user);
    pair.open();

    let connection: Arc<dyn Connection> = pair.client().clone();
    let call = RemoteMethodCall::<i64>::new(connection, "/rpc/add");
    assert!(call.call_async(vec![json!(1), json!(2), json!(3)]));
    assert!(call.wait_until_completion(Duration::from_millis(100)).await);
    assert_eq!(call.result(), Some(6));

    // The instance is single-use: firing again is refused.
    assert!(!call.call_async(vec![json!(4), json!(5), json!(6)]));
    assert_eq!(call.result(), Some(6));

    pair.close();
}

#[test]
fn services_wire_subscriptions_onto_ready_connections() {
    let user = "svc@domain.zz";
    let context = Context::new();
    let home = client_home(user);

    let received: Arc<parking_lot::Mutex<Vec<Value>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = received.clone();
    let service = context.services().add_service("monitor", &home);
    assert!(service.add_method("/events/tick", RequestKind::Publish, 1, move |args| {
        sink.lock().push(args[0].clone());
        Ok(None)
    }));

    // A service flagged manual is left unwired.
    let manual = context
        .services()
        .add_service("manual", &client_home("other"));
    manual.set_auto_connect(false);
    assert!(!manual.auto_connect());

    let pair = linked_pair(&context, user);
    pair.open();

    // Readiness fan-out subscribed the service's event path; the server
    // now publishes into it.
    assert!(pair.server().event("/events/tick", json!(42)));
    assert_eq!(received.lock().as_slice(), &[json!(42)]);

    pair.close();
    context.services().remove_service("monitor");
    assert!(!context
        .directory()
        .has_handler(&format!("{home}/events/tick"), "monitor:publish:/events/tick"));
}

#[test]
fn registry_tracks_ready_connections() {
    let context = Context::new();
    let sender = RecordingSender::new();
    let connection = WampConnection::new(
        Uri::parse("wamp://host.zz/endpoint").unwrap(),
        None,
        "/",
        sender,
        context.clone(),
    );
    assert_eq!(context.connections().num_connections(), 0);

    assert!(connection.welcome_with("session-1"));
    assert_eq!(context.connections().num_connections(), 1);

    // Registering an already-registered connection is a silent no-op.
    let as_dyn: Arc<dyn Connection> = connection.clone();
    context.connections().add(as_dyn);
    assert_eq!(context.connections().num_connections(), 1);

    connection.close();
    assert_eq!(context.connections().num_connections(), 0);
    // Closing twice is harmless.
    connection.close();
    assert_eq!(context.connections().num_connections(), 0);
}

#[test]
#[should_panic(expected = "ready")]
fn registering_a_dormant_connection_is_a_programmer_error() {
    let context = Context::new();
    let sender = RecordingSender::new();
    let connection = WampConnection::new(
        Uri::parse("wamp://host.zz/endpoint").unwrap(),
        None,
        "/",
        sender,
        context.clone(),
    );
    let as_dyn: Arc<dyn Connection> = connection;
    context.connections().add(as_dyn);
}

#[test]
fn close_tolerates_a_dead_socket() {
    let user = "dead@domain.zz";
    let context = Context::new();
    let directory = context.directory();
    let home = server_home(user);
    assert!(directory.create_path(&format!("{home}/t")));
    let pair = linked_pair(&context, user);
    pair.open();

    assert!(pair.client().subscribe("/t"));
    let relay_name = format!("{home}/t->{user}@{}", pair.session_id());
    assert!(directory.has_handler(&format!("{home}/t"), &relay_name));

    // Kill the client's socket; closing must still succeed locally.
    pair.client_sender().set_broken(true);
    pair.client().close();
    assert!(!pair.client().core().is_ready());

    // The unsubscribe frame was lost, so the server-side relay survives
    // until the server itself closes.
    assert!(directory.has_handler(&format!("{home}/t"), &relay_name));
    pair.server().close();
    assert!(!directory.has_handler(&format!("{home}/t"), &relay_name));
}

#[test]
fn subscriptions_are_cleaned_up_on_close() {
    let user = "cleanup@domain.zz";
    let context = Context::new();
    let directory = context.directory();
    let home = server_home(user);
    assert!(directory.create_path(&format!("{home}/a/b")));
    assert!(directory.create_path(&format!("{home}/c")));

    let pair = linked_pair(&context, user);
    pair.open();
    let session = pair.session_id();

    assert!(pair.client().subscribe("/a/b"));
    assert!(pair.client().subscribe("/a/*"));
    assert!(pair.client().subscribe("/c"));
    assert!(directory.has_handler(
        &format!("{home}/a/b"),
        &format!("{home}/a/b->{user}@{session}")
    ));
    assert!(directory.has_handler(
        &format!("{home}/a"),
        &format!("{home}/a/*->{user}@{session}")
    ));
    assert!(directory.has_handler(
        &format!("{home}/c"),
        &format!("{home}/c->{user}@{session}")
    ));

    pair.client().close();
    assert!(!directory.has_handler(
        &format!("{home}/a/b"),
        &format!("{home}/a/b->{user}@{session}")
    ));
    assert!(!directory.has_handler(
        &format!("{home}/a"),
        &format!("{home}/a/*->{user}@{session}")
    ));
    assert!(!directory.has_handler(
        &format!("{home}/c"),
        &format!("{home}/c->{user}@{session}")
    ));

    pair.close();
}
