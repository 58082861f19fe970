//! ---
//! eds_section: "15-testing-qa-runbook"
//! eds_subsection: "integration-tests"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Driver and manager facades exchanging operations over one broker."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use eds_common::{EdgeResult, ErrorType};
use eds_models::{
    Device, DeviceData, DeviceStatus, DriverInitialization, DriverStatus, Product, Properties,
    PropertyValueType, Protocol, State,
};
use eds_msgbus::{BusSettings, InMemoryBroker, MessageBus};
use eds_operations::{DataTarget, DriverClient, DriverService, ManagerClient, ManagerService};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn connected(broker: &InMemoryBroker) -> MessageBus {
    eds_logging::init();
    let (transport, events) = broker.transport();
    let bus = MessageBus::new(Arc::new(transport), events, BusSettings::default());
    bus.connect().await.expect("connect");
    bus
}

fn temperature(value: f64) -> Properties {
    let sampled_at = Utc.timestamp_opt(1_700_000_000, 0).single().expect("timestamp");
    let mut props = Properties::new();
    props.insert(
        "temp".into(),
        DeviceData::new("temp", PropertyValueType::Float, value)
            .expect("sample")
            .with_timestamp(sampled_at),
    );
    props
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("delivered in time")
        .expect("channel open")
}

#[tokio::test]
async fn read_round_trips_between_manager_and_driver() {
    let broker = InMemoryBroker::new();
    let driver = DriverService::new(connected(&broker).await);
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    driver
        .data
        .on_read("p1", move |target: DataTarget| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(target);
                Ok(temperature(21.5))
            }
        })
        .await
        .expect("serve reads");
    assert!(broker
        .subscriptions()
        .contains("DATA/v1/DOWN/p1/+/+/+/READ/+"));

    let manager_bus = connected(&broker).await;
    let manager = ManagerClient::new(manager_bus.clone());
    let props = manager
        .data
        .read("p1", "prod1", "dev1", "temp")
        .await
        .expect("read");
    assert_eq!(props, temperature(21.5));
    assert_eq!(
        next(&mut seen).await,
        DataTarget {
            product_id: "prod1".into(),
            device_id: "dev1".into(),
            func_id: "temp".into(),
        }
    );
    assert!(manager_bus.routes().is_empty());
}

#[tokio::test]
async fn driver_errors_reach_the_caller_unchanged() {
    let broker = InMemoryBroker::new();
    let driver = DriverService::new(connected(&broker).await);
    driver
        .data
        .on_hard_read("p1", |_target: DataTarget| async {
            Err::<Properties, _>(ErrorType::Driver.error("device offline"))
        })
        .await
        .expect("serve hard reads");

    let manager = ManagerClient::new(connected(&broker).await);
    let err = manager
        .data
        .hard_read("p1", "prod1", "dev1", "temp")
        .await
        .expect_err("driver failure");
    let remote = err.remote().expect("remote error");
    assert_eq!(remote.code(), ErrorType::Driver.code());
    assert_eq!(remote.message(), "device offline");
}

#[tokio::test]
async fn unanswered_read_times_out() {
    let broker = InMemoryBroker::new();
    let manager_bus = connected(&broker).await;
    let manager = ManagerClient::new(manager_bus.clone());
    let data = manager.data.with_call_timeout(Duration::from_millis(150));

    let started = Instant::now();
    let err = data
        .read("p1", "prod1", "dev1", "temp")
        .await
        .expect_err("nobody answers");
    assert!(err.is_call_timeout());
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(manager_bus.routes().is_empty());
}

#[tokio::test]
async fn write_and_call_reach_their_handlers() {
    let broker = InMemoryBroker::new();
    let driver = DriverService::new(connected(&broker).await);
    let (writes_tx, mut writes) = mpsc::unbounded_channel();
    driver
        .data
        .on_write("p1", move |target: DataTarget, props: Properties| {
            let writes_tx = writes_tx.clone();
            async move {
                let _ = writes_tx.send((target.func_id, props));
                Ok(())
            }
        })
        .await
        .expect("serve writes");
    driver
        .data
        .on_call("p1", |target: DataTarget, ins: Properties| async move {
            if target.func_id != "reset" {
                return Err(ErrorType::NotFound.error(format!("no method {}", target.func_id)));
            }
            let mut outs = Properties::new();
            outs.insert(
                "accepted".into(),
                DeviceData::new("accepted", PropertyValueType::Bool, !ins.is_empty())
                    .expect("output"),
            );
            EdgeResult::Ok(outs)
        })
        .await
        .expect("serve calls");

    let manager = ManagerClient::new(connected(&broker).await);
    manager
        .data
        .write("p1", "prod1", "dev1", "temp", &temperature(18.0))
        .await
        .expect("write");
    assert_eq!(next(&mut writes).await, ("temp".to_string(), temperature(18.0)));

    let outs = manager
        .data
        .call("p1", "prod1", "dev1", "reset", &temperature(0.0))
        .await
        .expect("call");
    assert!(outs.contains_key("accepted"));

    let err = manager
        .data
        .call("p1", "prod1", "dev1", "explode", &Properties::new())
        .await
        .expect_err("unknown method");
    assert_eq!(err.remote().map(|remote| remote.category()), Some(ErrorType::NotFound));
}

#[tokio::test]
async fn metadata_flows_from_manager_to_driver() {
    let broker = InMemoryBroker::new();
    let driver = DriverService::new(connected(&broker).await);
    let (tx, mut events) = mpsc::unbounded_channel::<String>();

    let init_tx = tx.clone();
    driver
        .meta
        .on_initialize_driver("p1", move |init: DriverInitialization| {
            let init_tx = init_tx.clone();
            async move {
                let _ = init_tx.send(format!("init {} {}", init.products.len(), init.devices.len()));
                Ok(())
            }
        })
        .await
        .expect("serve init");
    let update_tx = tx.clone();
    driver
        .meta
        .on_update_device("p1", move |device: Device| {
            let update_tx = update_tx.clone();
            async move {
                let _ = update_tx.send(format!("update {}", device.id));
                Ok(())
            }
        })
        .await
        .expect("serve device updates");
    let delete_tx = tx.clone();
    driver
        .meta
        .on_delete_device("p1", move |device_id: String| {
            let delete_tx = delete_tx.clone();
            async move {
                let _ = delete_tx.send(format!("delete {device_id}"));
                Ok(())
            }
        })
        .await
        .expect("serve device deletes");
    driver
        .meta
        .on_delete_product("p1", move |product_id: String| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(format!("drop {product_id}"));
                Ok(())
            }
        })
        .await
        .expect("serve product deletes");

    let manager = ManagerClient::new(connected(&broker).await);
    let product = Product {
        id: "prod1".into(),
        ..Product::default()
    };
    let device = Device {
        id: "dev1".into(),
        product_id: "prod1".into(),
        ..Device::default()
    };
    manager
        .meta
        .init_driver("p1", vec![product.clone()], vec![device.clone()])
        .await
        .expect("init");
    assert_eq!(next(&mut events).await, "init 1 1");

    manager.meta.update_device("p1", &device).await.expect("update");
    assert_eq!(next(&mut events).await, "update dev1");

    manager.meta.delete_device("p1", "dev1").await.expect("delete");
    assert_eq!(next(&mut events).await, "delete dev1");

    manager.meta.delete_product("p1", "prod1").await.expect("drop");
    assert_eq!(next(&mut events).await, "drop prod1");

    // No update handler for products: the update is logged and ignored.
    manager.meta.update_product("p1", &product).await.expect("update product");
    manager.meta.delete_product("p1", "prod2").await.expect("drop again");
    assert_eq!(next(&mut events).await, "drop prod2");
}

#[tokio::test]
async fn driver_reports_reach_manager_subscriptions() {
    let broker = InMemoryBroker::new();
    let service = ManagerService::new(connected(&broker).await);
    let mut drivers = service
        .meta
        .subscribe_driver_status()
        .await
        .expect("driver status");
    let mut devices = service
        .data
        .subscribe_device_status("p1")
        .await
        .expect("device status");
    let mut props = service
        .data
        .subscribe_device_props("p1", "prod1", "+", "+")
        .await
        .expect("props");
    let mut events = service
        .data
        .subscribe_device_event("p1", "+", "+", "alarm")
        .await
        .expect("events");

    let client = DriverClient::new(connected(&broker).await);
    let status = DriverStatus {
        hello: true,
        protocol: Protocol {
            id: "p1".into(),
            ..Protocol::default()
        },
        state: State::Running,
        state_detail: String::new(),
        health_check_interval_second: 5,
    };
    client.meta.publish_driver_status(&status).await.expect("driver status");
    let received = timeout(WAIT, drivers.recv()).await.expect("in time").expect("open");
    assert_eq!(received, status);

    let device = Device {
        id: "dev1".into(),
        ..Device::default()
    };
    client
        .data
        .publish_device_status(
            "p1",
            "prod1",
            "dev1",
            &DeviceStatus::new(device, State::Disconnected).with_detail("link down"),
        )
        .await
        .expect("device status");
    let received = timeout(WAIT, devices.recv()).await.expect("in time").expect("open");
    assert_eq!(received.state, State::Disconnected);
    assert_eq!(received.state_detail, "link down");

    client
        .data
        .publish_device_props("p1", "prod1", "dev1", "temp", &temperature(22.0))
        .await
        .expect("props");
    client
        .data
        .publish_device_props("p1", "other", "dev9", "temp", &temperature(99.0))
        .await
        .expect("props elsewhere");
    let wrapped = timeout(WAIT, props.recv()).await.expect("in time").expect("open");
    assert_eq!((wrapped.product_id.as_str(), wrapped.device_id.as_str()), ("prod1", "dev1"));
    assert_eq!(wrapped.properties, temperature(22.0));

    client
        .data
        .publish_device_event("p1", "prod1", "dev1", "alarm", &temperature(80.0))
        .await
        .expect("event");
    let wrapped = timeout(WAIT, events.recv()).await.expect("in time").expect("open");
    assert_eq!(wrapped.func_id, "alarm");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(props.try_recv().is_none());
}
