//! Which handlers see which message.

use std::collections::HashMap;
use std::sync::Arc;

use sagabus_core::ConfigResult;
use sagabus_messages::{
    HandlerFn, HandlerFnInvoker, HandlerFuture, HandlerInvoker, Handles, Message, MessageContext,
    MessageType, SagaInvoker, SagaType, TypedMessage,
};

use crate::resolver::CorrelationResolver;

type InvokerFactory =
    Arc<dyn Fn(Arc<dyn Message>) -> Option<Box<dyn HandlerInvoker>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    name: String,
    factory: InvokerFactory,
}

/// Handler table keyed by message type.
///
/// Every processed message gets fresh invokers, in registration order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Vec<Registration>>,
    saga_types: Vec<SagaType>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages of type `M` to saga `S`.
    pub fn add_saga<S, M>(&mut self, saga: Arc<S>) -> &mut Self
    where
        S: Handles<M>,
        M: TypedMessage,
    {
        let saga_type = SagaType::of::<S>();
        if !self.saga_types.iter().any(|t| t.name() == saga_type.name()) {
            self.saga_types.push(saga_type);
        }

        let factory: InvokerFactory = Arc::new(move |message: Arc<dyn Message>| {
            let typed = message.downcast_arc::<M>()?;
            let invoker: Box<dyn HandlerInvoker> = Box::new(SagaInvoker::new(saga.clone(), typed));
            Some(invoker)
        });
        self.push(M::MESSAGE_TYPE, S::SAGA_TYPE.to_string(), factory)
    }

    /// Route messages of type `M` to a plain handler function.
    pub fn add_handler<M, F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        M: TypedMessage,
        F: Fn(Arc<M>, MessageContext) -> HandlerFuture + Send + Sync + 'static,
    {
        let name = name.into();
        let handler: HandlerFn<M> = Arc::new(handler);
        let invoker_name = name.clone();
        let factory: InvokerFactory = Arc::new(move |message: Arc<dyn Message>| {
            let typed = message.downcast_arc::<M>()?;
            let invoker: Box<dyn HandlerInvoker> = Box::new(HandlerFnInvoker::from_shared(
                invoker_name.clone(),
                typed,
                handler.clone(),
            ));
            Some(invoker)
        });
        self.push(M::MESSAGE_TYPE, name, factory)
    }

    /// Fresh invokers for every handler registered for `message`'s type.
    ///
    /// Routing uses the concrete type only: a handler sees a message family
    /// by being registered for each concrete member. Correlation rules, by
    /// contrast, may target a supertype (`Correlator::correlate_family`).
    pub fn invokers_for(&self, message: &Arc<dyn Message>) -> Vec<Box<dyn HandlerInvoker>> {
        let Some(registrations) = self.handlers.get(&message.message_type()) else {
            return Vec::new();
        };
        registrations
            .iter()
            .filter_map(|r| {
                let invoker = (r.factory)(message.clone());
                if invoker.is_none() {
                    tracing::warn!(
                        handler = %r.name,
                        message_type = %message.message_type(),
                        "registered handler does not accept message"
                    );
                }
                invoker
            })
            .collect()
    }

    pub fn saga_types(&self) -> &[SagaType] {
        &self.saga_types
    }

    /// Build every registered saga's correlation rules up front.
    pub fn register_all(&self, resolver: &CorrelationResolver) -> ConfigResult<()> {
        for saga_type in &self.saga_types {
            resolver.get(saga_type)?;
        }
        Ok(())
    }

    fn push(&mut self, message_type: MessageType, name: String, factory: InvokerFactory) -> &mut Self {
        self.handlers
            .entry(message_type)
            .or_default()
            .push(Registration { name, factory });
        self
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let handlers: HashMap<&str, Vec<&str>> = self
            .handlers
            .iter()
            .map(|(t, regs)| (t.name(), regs.iter().map(|r| r.name.as_str()).collect()))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &handlers)
            .field("saga_types", &self.saga_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use sagabus_core::{ConfigError, PropertyTable, SagaData, SagaMetadata};
    use sagabus_messages::{Correlator, Saga, SagaInstance};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct BoxData {
        meta: SagaMetadata,
        label: String,
    }

    impl SagaData for BoxData {
        const DATA_TYPE: &'static str = "test.box_data";

        fn metadata(&self) -> &SagaMetadata {
            &self.meta
        }

        fn metadata_mut(&mut self) -> &mut SagaMetadata {
            &mut self.meta
        }

        fn properties(table: PropertyTable<Self>) -> PropertyTable<Self> {
            table.field("Label", |d| &d.label, |d| &mut d.label)
        }
    }

    #[derive(Debug)]
    struct BoxPacked {
        label: String,
    }

    #[derive(Debug)]
    struct BoxLost;

    sagabus_messages::message!(BoxPacked => "test.box_packed");
    sagabus_messages::message!(BoxLost => "test.box_lost");

    #[derive(Debug)]
    struct BoxCrushed;

    sagabus_messages::message!(BoxCrushed => "test.box_crushed", supertypes = ["test.box_event"]);

    struct BoxSaga;

    #[async_trait]
    impl Saga for BoxSaga {
        type Data = BoxData;
        const SAGA_TYPE: &'static str = "test.box_saga";
        const INITIATED_BY: &'static [MessageType] = &[BoxPacked::MESSAGE_TYPE];

        fn correlate(c: &mut Correlator<BoxData>) -> ConfigResult<()> {
            c.correlate(|m: &BoxPacked| m.label.clone(), "Label")?;
            Ok(())
        }
    }

    #[async_trait]
    impl Handles<BoxPacked> for BoxSaga {
        async fn handle(
            &self,
            _saga: &mut SagaInstance<BoxData>,
            _message: &BoxPacked,
            _ctx: &MessageContext,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct BadLabelSaga;

    #[async_trait]
    impl Saga for BadLabelSaga {
        type Data = BoxData;
        const SAGA_TYPE: &'static str = "test.bad_label_saga";
        const INITIATED_BY: &'static [MessageType] = &[];

        fn correlate(c: &mut Correlator<BoxData>) -> ConfigResult<()> {
            c.correlate(|m: &BoxPacked| m.label.clone(), "Colour")?;
            Ok(())
        }
    }

    #[async_trait]
    impl Handles<BoxPacked> for BadLabelSaga {
        async fn handle(
            &self,
            _saga: &mut SagaInstance<BoxData>,
            _message: &BoxPacked,
            _ctx: &MessageContext,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop(_m: Arc<BoxPacked>, _ctx: MessageContext) -> HandlerFuture {
        Box::pin(async { Ok(()) })
    }

    fn file_claim(_m: Arc<BoxCrushed>, _ctx: MessageContext) -> HandlerFuture {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn invokers_follow_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry
            .add_handler::<BoxPacked, _>("audit", noop)
            .add_saga::<BoxSaga, BoxPacked>(Arc::new(BoxSaga));

        let message: Arc<dyn Message> = Arc::new(BoxPacked { label: "b".into() });
        let invokers = registry.invokers_for(&message);

        let names: Vec<&str> = invokers.iter().map(|i| i.handler_name()).collect();
        assert_eq!(names, vec!["audit", "test.box_saga"]);
        assert!(!invokers[0].has_saga());
        assert!(invokers[1].has_saga());
    }

    #[test]
    fn unknown_message_types_get_no_invokers() {
        let mut registry = HandlerRegistry::new();
        registry.add_saga::<BoxSaga, BoxPacked>(Arc::new(BoxSaga));

        let message: Arc<dyn Message> = Arc::new(BoxLost);
        assert!(registry.invokers_for(&message).is_empty());
    }

    #[test]
    fn routing_follows_the_concrete_message_type() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler::<BoxCrushed, _>("claims", file_claim);

        let crushed: Arc<dyn Message> = Arc::new(BoxCrushed);
        let names: Vec<String> = registry
            .invokers_for(&crushed)
            .iter()
            .map(|i| i.handler_name().to_string())
            .collect();
        assert_eq!(names, vec!["claims"]);

        let lost: Arc<dyn Message> = Arc::new(BoxLost);
        assert!(registry.invokers_for(&lost).is_empty());
    }

    #[test]
    fn register_all_surfaces_configuration_errors() {
        let mut registry = HandlerRegistry::new();
        registry
            .add_saga::<BoxSaga, BoxPacked>(Arc::new(BoxSaga))
            .add_saga::<BadLabelSaga, BoxPacked>(Arc::new(BadLabelSaga));

        let err = registry
            .register_all(&CorrelationResolver::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProperty { .. }));
        assert_eq!(registry.saga_types().len(), 2);
    }
}
