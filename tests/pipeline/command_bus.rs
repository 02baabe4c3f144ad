use claims::{assert_err, assert_matches, assert_ok};
use signup::command_bus::{BusError, CommandBus};
use signup::dispatcher::DispatchPolicy;
use signup::domain::CreateUser;
use signup::handler::CreateUserError;

use crate::helpers::{ada, spawn_app};

#[tokio::test]
async fn create_user_is_routed_to_its_handler() {
    let app = spawn_app(DispatchPolicy::Once);

    let result = assert_ok!(app.command_bus.dispatch(ada()).await);
    let result = assert_ok!(result);

    assert!(app.store.get(result.id).is_some());
    assert_eq!(app.command_bus.commands(), vec!["CreateUser"]);
}

#[tokio::test]
async fn handler_errors_come_back_typed() {
    let app = spawn_app(DispatchPolicy::Once);

    let result = assert_ok!(
        app.command_bus
            .dispatch(CreateUser::new("", "", "nope"))
            .await
    );

    let e = assert_err!(result);
    assert_matches!(e, CreateUserError::Validation(_));
}

#[tokio::test]
async fn empty_bus_has_no_route_for_create_user() {
    let bus = CommandBus::new();

    let e = assert_err!(bus.dispatch(ada()).await);

    assert_eq!(e, BusError::HandlerNotFound("CreateUser"));
}
