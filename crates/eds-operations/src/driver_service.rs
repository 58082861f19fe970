//! ---
//! eds_section: "02-messaging-ipc-data-model"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Operation protocol and RPC facades."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Commands a driver serves.
//!
//! Every handler is registered per protocol. Metadata handlers are
//! fire-and-forget: failures are logged and nothing is sent back. Data
//! handlers always answer exactly once, on the `UP` twin of the request topic
//! when they succeed and on the `UP-ERR` twin when they fail.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use eds_common::{EdgeError, EdgeResult, ErrorType};
use eds_logging::{eds_debug, eds_error, eds_warn, LogContext};
use eds_models::{Device, DriverInitialization, Product, Properties};
use eds_msgbus::{handler_fn, Message, MessageBus, SINGLE_LEVEL_WILDCARD};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::data::{DataOperation, DataOperationType};
use crate::meta::{MetaOperation, MetaOperationType};
use crate::operation::{Mode, Operation};
use crate::Result;

type MetaHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, EdgeResult<()>> + Send + Sync>;

/// Device function a data request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTarget {
    /// Product of the device.
    pub product_id: String,
    /// Addressed device.
    pub device_id: String,
    /// Property or method id; `*` for every property.
    pub func_id: String,
}

impl From<&DataOperation> for DataTarget {
    fn from(operation: &DataOperation) -> Self {
        Self {
            product_id: operation.product_id.clone(),
            device_id: operation.device_id.clone(),
            func_id: operation.func_id.clone(),
        }
    }
}

/// Driver-side command handlers.
pub struct DriverService {
    /// Initialisation and metadata mutations.
    pub meta: MetaDriverService,
    /// Property and method requests.
    pub data: DataDriverService,
}

impl DriverService {
    /// Both halves over one bus.
    pub fn new(bus: MessageBus) -> Self {
        Self {
            meta: MetaDriverService::new(bus.clone()),
            data: DataDriverService { bus },
        }
    }
}

/// Update and delete handlers sharing one metadata topic.
///
/// Updates carry the entity, deletes carry `null`; both arrive on the same
/// filter so one bus route serves the pair.
struct MutationRoutes<T> {
    kind: MetaOperationType,
    update: Mutex<Option<MetaHandler<T>>>,
    delete: Mutex<Option<MetaHandler<String>>>,
}

impl<T: DeserializeOwned + Send + 'static> MutationRoutes<T> {
    fn new(kind: MetaOperationType) -> Self {
        Self {
            kind,
            update: Mutex::new(None),
            delete: Mutex::new(None),
        }
    }

    async fn dispatch(&self, operation: MetaOperation) -> EdgeResult<()> {
        if operation.payload().has_value() {
            let handler = self.update.lock().clone();
            let Some(handler) = handler else {
                debug!(kind = %self.kind, id = %operation.req_id, "no update handler registered");
                return Ok(());
            };
            let entity = operation.unmarshal::<T>()?;
            handler(entity).await
        } else {
            let handler = self.delete.lock().clone();
            let Some(handler) = handler else {
                debug!(kind = %self.kind, id = %operation.req_id, "no delete handler registered");
                return Ok(());
            };
            handler(operation.req_id).await
        }
    }
}

type MutationRegistry<T> = Mutex<HashMap<String, Arc<MutationRoutes<T>>>>;

/// Driver initialisation and metadata mutations.
pub struct MetaDriverService {
    bus: MessageBus,
    products: MutationRegistry<Product>,
    devices: MutationRegistry<Device>,
}

impl MetaDriverService {
    fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            products: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `DOWN/<protocol>/INIT` with the products and devices the driver owns.
    pub async fn on_initialize_driver<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(DriverInitialization) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        serve_meta(&self.bus, protocol_id, MetaOperationType::Init, move |operation| {
            let handler = Arc::clone(&handler);
            async move {
                match operation.unmarshal::<DriverInitialization>() {
                    Ok(init) => handler(init).await,
                    Err(err) => Err(err.into()),
                }
            }
        })
        .await
    }

    /// Serve product creations and replacements.
    pub async fn on_update_product<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(Product) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<()>> + Send + 'static,
    {
        let handler = boxed(handler);
        self.mutations(&self.products, protocol_id, MetaOperationType::Product, |routes| {
            *routes.update.lock() = Some(handler);
        })
        .await
    }

    /// Serve product removals; the handler gets the product id.
    pub async fn on_delete_product<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<()>> + Send + 'static,
    {
        let handler = boxed(handler);
        self.mutations(&self.products, protocol_id, MetaOperationType::Product, |routes| {
            *routes.delete.lock() = Some(handler);
        })
        .await
    }

    /// Serve device creations and replacements.
    pub async fn on_update_device<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(Device) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<()>> + Send + 'static,
    {
        let handler = boxed(handler);
        self.mutations(&self.devices, protocol_id, MetaOperationType::Device, |routes| {
            *routes.update.lock() = Some(handler);
        })
        .await
    }

    /// Serve device removals; the handler gets the device id.
    pub async fn on_delete_device<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<()>> + Send + 'static,
    {
        let handler = boxed(handler);
        self.mutations(&self.devices, protocol_id, MetaOperationType::Device, |routes| {
            *routes.delete.lock() = Some(handler);
        })
        .await
    }

    /// Install a handler in the protocol's routes, subscribing the first time.
    async fn mutations<T>(
        &self,
        registry: &MutationRegistry<T>,
        protocol_id: &str,
        kind: MetaOperationType,
        install: impl FnOnce(&MutationRoutes<T>),
    ) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (routes, fresh) = {
            let mut registry = registry.lock();
            match registry.get(protocol_id) {
                Some(routes) => (Arc::clone(routes), false),
                None => {
                    let routes = Arc::new(MutationRoutes::new(kind));
                    registry.insert(protocol_id.to_string(), Arc::clone(&routes));
                    (routes, true)
                }
            }
        };
        install(&routes);
        if !fresh {
            return Ok(());
        }

        let dispatch = Arc::clone(&routes);
        let subscribed = serve_meta(&self.bus, protocol_id, kind, move |operation| {
            let routes = Arc::clone(&dispatch);
            async move { routes.dispatch(operation).await }
        })
        .await;
        if subscribed.is_err() {
            registry.lock().remove(protocol_id);
        }
        subscribed
    }
}

fn boxed<T, F, Fut>(handler: F) -> MetaHandler<T>
where
    T: 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EdgeResult<()>> + Send + 'static,
{
    Arc::new(move |value: T| -> BoxFuture<'static, EdgeResult<()>> { Box::pin(handler(value)) })
}

async fn serve_meta<F, Fut>(
    bus: &MessageBus,
    protocol_id: &str,
    kind: MetaOperationType,
    handle: F,
) -> Result<()>
where
    F: Fn(MetaOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EdgeResult<()>> + Send + 'static,
{
    let topic = MetaOperation::new(Mode::Down, protocol_id, kind, SINGLE_LEVEL_WILDCARD)
        .topic()
        .to_string();
    let handle = Arc::new(handle);
    let handler = handler_fn(move |message: Message| {
        let handle = Arc::clone(&handle);
        async move {
            let operation = match MetaOperation::parse(&message) {
                Ok(operation) => operation,
                Err(err) => {
                    error!(topic = %message.topic, error = %err, "fail to parse the meta operation");
                    return;
                }
            };
            let protocol_id = operation.protocol_id.clone();
            let req_id = operation.req_id.clone();
            if let Err(err) = handle(operation).await {
                eds_error!(
                    context = LogContext::new().with_protocol(&protocol_id).with_req_id(&req_id),
                    "fail to handle the {} operation: {}",
                    kind,
                    err
                );
            }
        }
    });
    bus.subscribe(handler, [topic]).await?;
    Ok(())
}

/// Property and method requests.
pub struct DataDriverService {
    bus: MessageBus,
}

impl DataDriverService {
    /// Serve cached property reads.
    pub async fn on_read<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(DataTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<Properties>> + Send + 'static,
    {
        self.serve_reads(protocol_id, DataOperationType::Read, handler)
            .await
    }

    /// Serve property reads that go to the device.
    pub async fn on_hard_read<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(DataTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<Properties>> + Send + 'static,
    {
        self.serve_reads(protocol_id, DataOperationType::HardRead, handler)
            .await
    }

    /// Serve property writes. Success is answered with an empty property set.
    pub async fn on_write<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(DataTarget, Properties) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        serve_data(&self.bus, protocol_id, DataOperationType::Write, move |request| {
            let handler = Arc::clone(&handler);
            async move {
                let props = decode_inputs(&request, "fail to decode the properties to write")?;
                handler(DataTarget::from(&request), props).await?;
                Ok::<_, EdgeError>(Properties::new())
            }
        })
        .await
    }

    /// Serve method calls with their input fields.
    pub async fn on_call<F, Fut>(&self, protocol_id: &str, handler: F) -> Result<()>
    where
        F: Fn(DataTarget, Properties) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<Properties>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        serve_data(&self.bus, protocol_id, DataOperationType::Call, move |request| {
            let handler = Arc::clone(&handler);
            async move {
                match decode_inputs(&request, "fail to decode the method inputs") {
                    Ok(ins) => handler(DataTarget::from(&request), ins).await,
                    Err(err) => Err(err),
                }
            }
        })
        .await
    }

    async fn serve_reads<F, Fut>(
        &self,
        protocol_id: &str,
        op_type: DataOperationType,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(DataTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EdgeResult<Properties>> + Send + 'static,
    {
        serve_data(&self.bus, protocol_id, op_type, move |request| {
            handler(DataTarget::from(&request))
        })
        .await
    }
}

fn decode_inputs(request: &DataOperation, message: &str) -> EdgeResult<Properties> {
    request
        .unmarshal::<Properties>()
        .map_err(|err| ErrorType::BadRequest.cause(err, message))
}

async fn serve_data<F, Fut>(
    bus: &MessageBus,
    protocol_id: &str,
    op_type: DataOperationType,
    handle: F,
) -> Result<()>
where
    F: Fn(DataOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EdgeResult<Properties>> + Send + 'static,
{
    let wildcard = SINGLE_LEVEL_WILDCARD;
    let topic = DataOperation::new(
        Mode::Down,
        protocol_id,
        wildcard,
        wildcard,
        wildcard,
        op_type,
        wildcard,
    )
    .topic()
    .to_string();
    let handle = Arc::new(handle);
    let responder = bus.clone();
    let handler = handler_fn(move |message: Message| {
        let handle = Arc::clone(&handle);
        let bus = responder.clone();
        async move {
            let request = match DataOperation::parse(&message) {
                Ok(request) => request,
                Err(err) => {
                    error!(topic = %message.topic, error = %err, "fail to parse the data operation");
                    return;
                }
            };
            let reply_to = request.with_mode(Mode::Up);
            let outcome = handle(request).await;
            respond(&bus, reply_to, outcome).await;
        }
    });
    bus.subscribe(handler, [topic]).await?;
    Ok(())
}

/// Publish the single answer to a request.
async fn respond(bus: &MessageBus, mut response: DataOperation, outcome: EdgeResult<Properties>) {
    let encoded = match outcome {
        Ok(outs) => response.set_value(&outs).or_else(|err| {
            response.mode = Mode::UpErr;
            response.set_value(&EdgeError::from(err))
        }),
        Err(err) => {
            eds_warn!(
                context = response.log_context(),
                "{} on {} failed: {}",
                response.op_type,
                response.func_id,
                err
            );
            response.mode = Mode::UpErr;
            response.set_value(&err)
        }
    };
    let message = match encoded.and_then(|()| response.to_message()) {
        Ok(message) => message,
        Err(err) => {
            eds_error!(context = response.log_context(), "fail to encode the response: {}", err);
            return;
        }
    };
    eds_debug!(context = response.log_context(), "answering on {}", message.topic);
    if let Err(err) = bus.publish(&message).await {
        eds_error!(context = response.log_context(), "fail to publish the response: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eds_msgbus::{BusSettings, InMemoryBroker};
    use tokio::sync::mpsc;

    async fn bus(broker: &InMemoryBroker) -> MessageBus {
        let (transport, events) = broker.transport();
        let bus = MessageBus::new(Arc::new(transport), events, BusSettings::default());
        bus.connect().await.expect("connect");
        bus
    }

    #[tokio::test]
    async fn product_update_and_delete_share_one_route() {
        let broker = InMemoryBroker::new();
        let service = DriverService::new(bus(&broker).await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let updates = tx.clone();
        service
            .meta
            .on_update_product("p1", move |product: Product| {
                let updates = updates.clone();
                async move {
                    let _ = updates.send(format!("update {}", product.id));
                    Ok(())
                }
            })
            .await
            .expect("update handler");
        service
            .meta
            .on_delete_product("p1", move |product_id: String| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(format!("delete {product_id}"));
                    Ok(())
                }
            })
            .await
            .expect("delete handler");
        assert_eq!(
            broker.subscriptions().into_iter().collect::<Vec<_>>(),
            vec!["META/v1/DOWN/p1/PRODUCT/+".to_string()]
        );

        let manager = bus(&broker).await;
        manager
            .publish(&Message::new("META/v1/DOWN/p1/PRODUCT/prod1", r#"{"id":"prod1"}"#))
            .await
            .expect("publish update");
        assert_eq!(rx.recv().await.as_deref(), Some("update prod1"));

        manager
            .publish(&Message::new("META/v1/DOWN/p1/PRODUCT/prod1", "null"))
            .await
            .expect("publish delete");
        assert_eq!(rx.recv().await.as_deref(), Some("delete prod1"));
    }

    #[tokio::test]
    async fn failing_read_answers_on_the_error_topic() {
        let broker = InMemoryBroker::new();
        let service = DriverService::new(bus(&broker).await);
        service
            .data
            .on_read("p1", |_target: DataTarget| async {
                Err::<Properties, _>(ErrorType::Driver.error("device offline"))
            })
            .await
            .expect("read handler");

        let manager = bus(&broker).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager
            .subscribe(
                handler_fn(move |message: Message| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(message);
                    }
                }),
                ["DATA/v1/UP-ERR/p1/+/+/+/READ/+"],
            )
            .await
            .expect("watch replies");
        manager
            .publish(&Message::new("DATA/v1/DOWN/p1/prod1/dev1/temp/READ/r1", "null"))
            .await
            .expect("publish request");

        let reply = rx.recv().await.expect("reply");
        assert_eq!(reply.topic, "DATA/v1/UP-ERR/p1/prod1/dev1/temp/READ/r1");
        let err = EdgeError::from_payload(&reply.payload);
        assert_eq!(err.category(), ErrorType::Driver);
        assert_eq!(err.message(), "device offline");
    }

    #[tokio::test]
    async fn undecodable_write_is_rejected_as_bad_request() {
        let broker = InMemoryBroker::new();
        let service = DriverService::new(bus(&broker).await);
        service
            .data
            .on_write("p1", |_target: DataTarget, _props: Properties| async { Ok(()) })
            .await
            .expect("write handler");

        let manager = bus(&broker).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager
            .subscribe(
                handler_fn(move |message: Message| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(message);
                    }
                }),
                ["DATA/v1/UP-ERR/p1/+/+/+/WRITE/+"],
            )
            .await
            .expect("watch replies");
        manager
            .publish(&Message::new("DATA/v1/DOWN/p1/prod1/dev1/temp/WRITE/w1", "[1,2]"))
            .await
            .expect("publish request");

        let reply = rx.recv().await.expect("reply");
        assert_eq!(EdgeError::from_payload(&reply.payload).category(), ErrorType::BadRequest);
    }
}
