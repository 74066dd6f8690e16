use std::any::Any;
use std::sync::Arc;

/// Stable runtime type token for a message type (e.g. "orders.order_placed").
///
/// Used as the key of correlation maps in place of reflective type identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(&'static str);

impl MessageType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(self) -> &'static str {
        self.0
    }
}

impl core::fmt::Display for MessageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.0)
    }
}

/// A message body travelling through the bus.
///
/// Messages are:
/// - **owned** (`'static`, they cross task boundaries)
/// - **identified** by a [`MessageType`] token
/// - **polymorphic** through `supertypes()`, the tokens of the message families
///   (base types, interfaces) the message also counts as
///
/// Implement with the [`message!`](crate::message) macro rather than by hand.
pub trait Message: Any + Send + Sync + core::fmt::Debug {
    fn message_type(&self) -> MessageType;

    /// Supertype tokens, most specific first.
    fn supertypes(&self) -> &'static [MessageType] {
        &[]
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl dyn Message + '_ {
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    /// Recover the typed message behind a shared handle.
    pub fn downcast_arc<M: Message>(self: Arc<Self>) -> Option<Arc<M>> {
        self.into_any().downcast::<M>().ok()
    }

    /// The message's own type followed by its supertypes.
    pub fn type_hierarchy(&self) -> impl Iterator<Item = MessageType> + '_ {
        std::iter::once(self.message_type()).chain(self.supertypes().iter().copied())
    }
}

/// A message type with a compile-time type token.
pub trait TypedMessage: Message + Sized {
    const MESSAGE_TYPE: MessageType;
}

/// Implement [`Message`] and [`TypedMessage`] for a type.
///
/// ```ignore
/// message!(OrderPlaced => "orders.order_placed");
/// message!(OrderShipped => "orders.order_shipped", supertypes = ["orders.order_event"]);
/// ```
#[macro_export]
macro_rules! message {
    ($t:ty => $name:literal $(, supertypes = [$($sup:literal),* $(,)?])? $(,)?) => {
        impl $crate::TypedMessage for $t {
            const MESSAGE_TYPE: $crate::MessageType = $crate::MessageType::new($name);
        }

        impl $crate::Message for $t {
            fn message_type(&self) -> $crate::MessageType {
                <Self as $crate::TypedMessage>::MESSAGE_TYPE
            }

            fn supertypes(&self) -> &'static [$crate::MessageType] {
                const SUPERTYPES: &[$crate::MessageType] =
                    &[$($($crate::MessageType::new($sup)),*)?];
                SUPERTYPES
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn into_any(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::std::any::Any + Send + Sync> {
                self
            }
        }
    };
}
