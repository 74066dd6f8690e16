//! Correlation rules: which saga data property a message value is matched against.
//!
//! A saga declares its rules once through a [`Correlator`]. Every registration
//! is validated immediately against the saga data's [`PropertyTable`], so an
//! unknown path or a value kind that can never match the property fails at
//! startup instead of while a message is being processed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sagabus_core::{
    ConfigError, ConfigResult, CorrelationValue, ID_PROPERTY, IntoCorrelationValue,
    PropertyTable, SagaData, ScalarKind,
};

use crate::context::MessageContext;
use crate::message::{Message, MessageType, TypedMessage};

type ValueExtractor =
    Arc<dyn Fn(&MessageContext, &dyn Message) -> Option<CorrelationValue> + Send + Sync>;

/// One correlation rule: message type → extracted value → saga data property.
#[derive(Clone)]
pub struct CorrelationProperty {
    message_type: MessageType,
    saga_data_type: &'static str,
    property_name: String,
    saga_type: &'static str,
    kind: ScalarKind,
    extract: ValueExtractor,
}

impl core::fmt::Debug for CorrelationProperty {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CorrelationProperty")
            .field("message_type", &self.message_type)
            .field("saga_data_type", &self.saga_data_type)
            .field("property_name", &self.property_name)
            .field("saga_type", &self.saga_type)
            .field("kind", &self.kind)
            .finish()
    }
}

impl CorrelationProperty {
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn saga_data_type(&self) -> &'static str {
        self.saga_data_type
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub fn saga_type(&self) -> &'static str {
        self.saga_type
    }

    /// Kind of the saga data property the rule targets.
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn is_identity(&self) -> bool {
        self.property_name == ID_PROPERTY
    }

    /// Extract the correlation value, already coerced to the property's kind.
    ///
    /// `None` means the message carries no usable value for this rule (absent
    /// header, empty option, or a value that does not convert).
    pub fn value_from(
        &self,
        ctx: &MessageContext,
        message: &dyn Message,
    ) -> Option<CorrelationValue> {
        let raw = (self.extract)(ctx, message)?;
        let coerced = raw.clone().coerce(self.kind);
        if coerced.is_none() {
            tracing::debug!(
                saga_type = self.saga_type,
                message_type = %self.message_type,
                property = %self.property_name,
                value = %raw,
                "correlation value does not convert to property kind"
            );
        }
        coerced
    }
}

/// Builder a saga uses to declare its correlation rules.
///
/// ```ignore
/// fn correlate(c: &mut Correlator<OrderData>) -> Result<(), ConfigError> {
///     c.correlate(|m: &OrderPlaced| m.order_id.clone(), "OrderId")?
///         .correlate_header::<PaymentReceived>("order-id", "OrderId")?;
///     Ok(())
/// }
/// ```
pub struct Correlator<D> {
    saga_type: &'static str,
    table: PropertyTable<D>,
    properties: Vec<CorrelationProperty>,
}

impl<D: SagaData> Correlator<D> {
    pub fn new(saga_type: &'static str) -> Self {
        Self {
            saga_type,
            table: PropertyTable::<D>::for_data(),
            properties: Vec::new(),
        }
    }

    /// Correlate by a value extracted from the message body.
    pub fn correlate<M, V, F>(&mut self, extract: F, property: &str) -> ConfigResult<&mut Self>
    where
        M: TypedMessage,
        V: IntoCorrelationValue,
        F: Fn(&M) -> V + Send + Sync + 'static,
    {
        let extractor: ValueExtractor =
            Arc::new(move |_ctx: &MessageContext, message: &dyn Message| {
                message
                    .downcast_ref::<M>()
                    .and_then(|m| extract(m).into_correlation_value())
            });
        self.register(M::MESSAGE_TYPE, V::KIND, property, extractor)
    }

    /// Correlate by the value of a single message header.
    pub fn correlate_header<M: TypedMessage>(
        &mut self,
        header: &str,
        property: &str,
    ) -> ConfigResult<&mut Self> {
        let header = header.to_string();
        let extractor: ValueExtractor =
            Arc::new(move |ctx: &MessageContext, _message: &dyn Message| {
                ctx.header(&header)
                    .map(|v| CorrelationValue::String(v.to_string()))
            });
        self.register(M::MESSAGE_TYPE, ScalarKind::String, property, extractor)
    }

    /// Correlate by a value computed from the whole message context.
    pub fn correlate_context<M, V, F>(&mut self, extract: F, property: &str) -> ConfigResult<&mut Self>
    where
        M: TypedMessage,
        V: IntoCorrelationValue,
        F: Fn(&MessageContext) -> V + Send + Sync + 'static,
    {
        let extractor: ValueExtractor =
            Arc::new(move |ctx: &MessageContext, _message: &dyn Message| {
                extract(ctx).into_correlation_value()
            });
        self.register(M::MESSAGE_TYPE, V::KIND, property, extractor)
    }

    /// Correlate every message that reports `message_type` as its own type or
    /// as one of its supertypes.
    pub fn correlate_family<V, F>(
        &mut self,
        message_type: MessageType,
        extract: F,
        property: &str,
    ) -> ConfigResult<&mut Self>
    where
        V: IntoCorrelationValue,
        F: Fn(&dyn Message) -> V + Send + Sync + 'static,
    {
        let extractor: ValueExtractor =
            Arc::new(move |_ctx: &MessageContext, message: &dyn Message| {
                extract(message).into_correlation_value()
            });
        self.register(message_type, V::KIND, property, extractor)
    }

    fn register(
        &mut self,
        message_type: MessageType,
        kind: ScalarKind,
        property: &str,
        extract: ValueExtractor,
    ) -> ConfigResult<&mut Self> {
        let accessor = self.table.require(D::DATA_TYPE, property)?;
        if !kind.can_coerce_to(accessor.kind()) {
            return Err(ConfigError::disallowed_type(D::DATA_TYPE, property, kind));
        }

        self.properties.push(CorrelationProperty {
            message_type,
            saga_data_type: D::DATA_TYPE,
            property_name: property.to_string(),
            saga_type: self.saga_type,
            kind: accessor.kind(),
            extract,
        });
        Ok(self)
    }

    pub fn build(self) -> SagaDataCorrelationProperties {
        let mut by_message: HashMap<MessageType, Vec<CorrelationProperty>> = HashMap::new();
        for property in self.properties {
            by_message
                .entry(property.message_type)
                .or_default()
                .push(property);
        }

        SagaDataCorrelationProperties {
            saga_type: self.saga_type,
            saga_data_type: D::DATA_TYPE,
            by_message,
        }
    }
}

/// All correlation rules of one saga type, grouped by message type.
#[derive(Debug, Clone)]
pub struct SagaDataCorrelationProperties {
    saga_type: &'static str,
    saga_data_type: &'static str,
    by_message: HashMap<MessageType, Vec<CorrelationProperty>>,
}

impl SagaDataCorrelationProperties {
    pub fn saga_type(&self) -> &'static str {
        self.saga_type
    }

    pub fn saga_data_type(&self) -> &'static str {
        self.saga_data_type
    }

    pub fn message_types(&self) -> impl Iterator<Item = MessageType> + '_ {
        self.by_message.keys().copied()
    }

    /// One rule per distinct property path, across every message type.
    ///
    /// These are the values storage indexes, so an instance created by one
    /// message can be found through a property another message correlates on.
    pub fn indexed(&self) -> Vec<CorrelationProperty> {
        let mut message_types: Vec<MessageType> = self.by_message.keys().copied().collect();
        message_types.sort();

        let mut seen = HashSet::new();
        message_types
            .iter()
            .filter_map(|t| self.by_message.get(t))
            .flatten()
            .filter(|p| seen.insert(p.property_name().to_string()))
            .cloned()
            .collect()
    }

    /// Rules that apply to `message`: those of its concrete type, then those
    /// of each supertype it reports, most specific first. Declaration order
    /// holds within each type.
    pub fn for_message(&self, message: &dyn Message) -> ConfigResult<Vec<CorrelationProperty>> {
        let properties: Vec<CorrelationProperty> = message
            .type_hierarchy()
            .filter_map(|t| self.by_message.get(&t))
            .flatten()
            .cloned()
            .collect();

        if properties.is_empty() {
            return Err(ConfigError::no_correlation(
                self.saga_type,
                message.message_type().name(),
            ));
        }
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagabus_core::{MessageId, SagaMetadata};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Child {
        property: String,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CaseData {
        meta: SagaMetadata,
        case_id: String,
        pending: i32,
        child: Child,
    }

    impl SagaData for CaseData {
        const DATA_TYPE: &'static str = "test.case_data";

        fn metadata(&self) -> &SagaMetadata {
            &self.meta
        }

        fn metadata_mut(&mut self) -> &mut SagaMetadata {
            &mut self.meta
        }

        fn properties(table: PropertyTable<Self>) -> PropertyTable<Self> {
            let child = PropertyTable::<Child>::new().field(
                "Property",
                |c: &Child| &c.property,
                |c: &mut Child| &mut c.property,
            );
            table
                .field("CaseId", |d| &d.case_id, |d| &mut d.case_id)
                .field("Pending", |d| &d.pending, |d| &mut d.pending)
                .nested("Child", |d| &d.child, |d| &mut d.child, child)
        }
    }

    #[derive(Debug)]
    struct CaseOpened {
        case_id: String,
    }

    #[derive(Debug)]
    struct CaseNoted {
        flag: bool,
    }

    #[derive(Debug)]
    struct CaseClosed {
        case_id: String,
    }

    crate::message!(CaseOpened => "test.case_opened");
    crate::message!(CaseNoted => "test.case_noted");
    crate::message!(CaseClosed => "test.case_closed", supertypes = ["test.case_event"]);

    const CASE_EVENT: MessageType = MessageType::new("test.case_event");

    #[test]
    fn body_rule_extracts_and_coerces() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate(|m: &CaseOpened| m.case_id.clone(), "CaseId")
            .unwrap();
        let props = c.build();

        let msg = CaseOpened {
            case_id: "case-123".into(),
        };
        let found = props.for_message(&msg).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].property_name(), "CaseId");
        assert_eq!(
            found[0].value_from(&MessageContext::default(), &msg),
            Some(CorrelationValue::String("case-123".into()))
        );
    }

    #[test]
    fn header_rule_converts_string_to_property_kind() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate_header::<CaseOpened>("pending", "Pending").unwrap();
        let props = c.build();

        let msg = CaseOpened {
            case_id: String::new(),
        };
        let ctx = MessageContext::new(MessageId::new()).with_header("pending", "7");
        let found = props.for_message(&msg).unwrap();
        assert_eq!(found[0].value_from(&ctx, &msg), Some(CorrelationValue::I32(7)));

        let bad = MessageContext::default().with_header("pending", "seven");
        assert_eq!(found[0].value_from(&bad, &msg), None);
        assert_eq!(found[0].value_from(&MessageContext::default(), &msg), None);
    }

    #[test]
    fn context_rule_reads_transport_metadata() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate_context::<CaseOpened, _, _>(
            |ctx| ctx.source_queue().map(str::to_string),
            "Child.Property",
        )
        .unwrap();
        let props = c.build();

        let msg = CaseOpened {
            case_id: String::new(),
        };
        let ctx = MessageContext::default().with_source_queue("cases");
        let found = props.for_message(&msg).unwrap();
        assert_eq!(found[0].property_name(), "Child.Property");
        assert_eq!(
            found[0].value_from(&ctx, &msg),
            Some(CorrelationValue::String("cases".into()))
        );
    }

    #[test]
    fn unknown_path_fails_at_registration() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        let err = c
            .correlate(|m: &CaseOpened| m.case_id.clone(), "Child.Missing")
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::unknown_property("test.case_data", "Child.Missing")
        );
    }

    #[test]
    fn disallowed_kind_fails_at_registration() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        let err = c.correlate(|m: &CaseNoted| m.flag, "Pending").err().unwrap();
        assert!(matches!(err, ConfigError::DisallowedType { .. }));
    }

    #[test]
    fn identity_property_is_always_correlatable() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate(|m: &CaseOpened| m.case_id.clone(), ID_PROPERTY)
            .unwrap();
        let props = c.build();
        let msg = CaseOpened {
            case_id: String::new(),
        };
        assert!(props.for_message(&msg).unwrap()[0].is_identity());
    }

    #[test]
    fn supertype_rules_apply_to_derived_messages() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate_family(
            CASE_EVENT,
            |m: &dyn Message| {
                m.downcast_ref::<CaseClosed>()
                    .map(|closed| closed.case_id.clone())
            },
            "CaseId",
        )
        .unwrap();
        let props = c.build();

        let msg = CaseClosed {
            case_id: "case-9".into(),
        };
        let found = props.for_message(&msg).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_type(), CASE_EVENT);
    }

    #[test]
    fn concrete_and_supertype_rules_are_combined() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate_family(
            CASE_EVENT,
            |m: &dyn Message| m.message_type().name().to_string(),
            "Child.Property",
        )
        .unwrap()
        .correlate(|m: &CaseClosed| m.case_id.clone(), "CaseId")
        .unwrap();
        let props = c.build();

        let msg = CaseClosed {
            case_id: "case-10".into(),
        };
        let found = props.for_message(&msg).unwrap();
        let paths: Vec<&str> = found.iter().map(|p| p.property_name()).collect();
        assert_eq!(paths, vec!["CaseId", "Child.Property"]);
        assert_eq!(found[0].message_type(), CaseClosed::MESSAGE_TYPE);
        assert_eq!(found[1].message_type(), CASE_EVENT);
    }

    #[test]
    fn indexed_rules_cover_every_message_once_per_path() {
        let mut c = Correlator::<CaseData>::new("test.case_saga");
        c.correlate(|m: &CaseOpened| m.case_id.clone(), "CaseId")
            .unwrap()
            .correlate(|m: &CaseClosed| m.case_id.clone(), "CaseId")
            .unwrap()
            .correlate_header::<CaseNoted>("child", "Child.Property")
            .unwrap();
        let props = c.build();

        let mut paths: Vec<String> = props
            .indexed()
            .iter()
            .map(|p| p.property_name().to_string())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["CaseId", "Child.Property"]);
    }

    #[test]
    fn message_without_rules_is_a_configuration_error() {
        let c = Correlator::<CaseData>::new("test.case_saga");
        let props = c.build();
        let err = props.for_message(&CaseNoted { flag: true }).unwrap_err();
        assert_eq!(
            err,
            ConfigError::no_correlation("test.case_saga", "test.case_noted")
        );
    }
}
