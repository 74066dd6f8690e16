//! Saga data: the persisted state of one saga instance.
//!
//! Saga data types expose their correlatable fields through a [`PropertyTable`]
//! of typed getter/setter accessors. The table is built once per lookup site
//! and replaces runtime reflection: a dotted path such as `Child.Property` is
//! just a key in the table, produced by composing the accessors of nested
//! structs with [`PropertyTable::nested`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ConfigError, ConfigResult};
use crate::id::SagaId;
use crate::revision::Revision;
use crate::value::{CorrelationScalar, CorrelationValue, ScalarKind};

/// Name of the identity property. Lookups by this name bypass correlation indexes.
pub const ID_PROPERTY: &str = "Id";

/// Identity and concurrency token carried by every saga data type.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaMetadata {
    pub id: SagaId,
    pub revision: Revision,
}

impl SagaMetadata {
    pub fn new(id: SagaId) -> Self {
        Self {
            id,
            revision: Revision::INITIAL,
        }
    }
}

/// Persisted state of one saga instance.
///
/// Implementors own every field except the embedded [`SagaMetadata`], which the
/// runtime manages.
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct OrderData {
///     meta: SagaMetadata,
///     order_id: String,
/// }
///
/// impl SagaData for OrderData {
///     const DATA_TYPE: &'static str = "orders.order_data";
///
///     fn metadata(&self) -> &SagaMetadata { &self.meta }
///     fn metadata_mut(&mut self) -> &mut SagaMetadata { &mut self.meta }
///
///     fn properties(table: PropertyTable<Self>) -> PropertyTable<Self> {
///         table.field("OrderId", |d| &d.order_id, |d| &mut d.order_id)
///     }
/// }
/// ```
pub trait SagaData: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name used as the storage partition key.
    const DATA_TYPE: &'static str;

    fn metadata(&self) -> &SagaMetadata;

    fn metadata_mut(&mut self) -> &mut SagaMetadata;

    /// Register correlatable properties. `table` already contains `Id`.
    fn properties(table: PropertyTable<Self>) -> PropertyTable<Self> {
        table
    }

    fn id(&self) -> SagaId {
        self.metadata().id
    }

    fn revision(&self) -> Revision {
        self.metadata().revision
    }
}

type Getter<D> = Arc<dyn Fn(&D) -> CorrelationValue + Send + Sync>;
type Setter<D> = Arc<dyn Fn(&mut D, &CorrelationValue) -> bool + Send + Sync>;

/// Typed accessor for one correlatable property path.
pub struct PropertyAccessor<D> {
    path: String,
    kind: ScalarKind,
    get: Getter<D>,
    set: Setter<D>,
}

impl<D> Clone for PropertyAccessor<D> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            kind: self.kind,
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

impl<D> core::fmt::Debug for PropertyAccessor<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyAccessor")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<D> PropertyAccessor<D> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn value(&self, data: &D) -> CorrelationValue {
        (self.get)(data)
    }

    /// Assign `value` (coerced to this property's kind). Returns `false` if the
    /// value cannot be represented.
    pub fn set(&self, data: &mut D, value: &CorrelationValue) -> bool {
        match value.clone().coerce(self.kind) {
            Some(coerced) => (self.set)(data, &coerced),
            None => false,
        }
    }
}

/// Registry of correlatable property paths for a type.
pub struct PropertyTable<D> {
    accessors: Vec<PropertyAccessor<D>>,
}

impl<D> Clone for PropertyTable<D> {
    fn clone(&self) -> Self {
        Self {
            accessors: self.accessors.clone(),
        }
    }
}

impl<D> core::fmt::Debug for PropertyTable<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.accessors.iter().map(|a| &a.path)).finish()
    }
}

impl<D: 'static> Default for PropertyTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: 'static> PropertyTable<D> {
    /// Empty table, used for nested (non saga data) structs.
    pub fn new() -> Self {
        Self {
            accessors: Vec::new(),
        }
    }

    /// Register a scalar field under `name`.
    ///
    /// Re-registering a path replaces the earlier accessor.
    pub fn field<T, G, M>(mut self, name: &str, get: G, get_mut: M) -> Self
    where
        T: CorrelationScalar,
        G: Fn(&D) -> &T + Send + Sync + 'static,
        M: Fn(&mut D) -> &mut T + Send + Sync + 'static,
    {
        let accessor = PropertyAccessor {
            path: name.to_string(),
            kind: T::KIND,
            get: Arc::new(move |d: &D| get(d).to_value()),
            set: Arc::new(move |d: &mut D, v: &CorrelationValue| match T::from_value(v) {
                Some(value) => {
                    *get_mut(d) = value;
                    true
                }
                None => false,
            }),
        };
        self.push(accessor);
        self
    }

    /// Register every path of `table` under `name.` using the given projections.
    pub fn nested<C, G, M>(mut self, name: &str, get: G, get_mut: M, table: PropertyTable<C>) -> Self
    where
        C: 'static,
        G: Fn(&D) -> &C + Send + Sync + 'static,
        M: Fn(&mut D) -> &mut C + Send + Sync + 'static,
    {
        let get = Arc::new(get);
        let get_mut = Arc::new(get_mut);

        for child in table.accessors {
            let outer_get = get.clone();
            let outer_set = get_mut.clone();
            let child_get = child.get.clone();
            let child_set = child.set.clone();

            self.push(PropertyAccessor {
                path: format!("{name}.{}", child.path),
                kind: child.kind,
                get: Arc::new(move |d: &D| child_get(outer_get(d))),
                set: Arc::new(move |d: &mut D, v: &CorrelationValue| child_set(outer_set(d), v)),
            });
        }
        self
    }

    fn push(&mut self, accessor: PropertyAccessor<D>) {
        self.accessors.retain(|a| a.path != accessor.path);
        self.accessors.push(accessor);
    }

    pub fn get(&self, path: &str) -> Option<&PropertyAccessor<D>> {
        self.accessors.iter().find(|a| a.path == path)
    }

    /// Look up `path`, failing with a configuration error naming `data_type`.
    pub fn require(&self, data_type: &str, path: &str) -> ConfigResult<&PropertyAccessor<D>> {
        self.get(path)
            .ok_or_else(|| ConfigError::unknown_property(data_type, path))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.accessors.iter().map(|a| a.path.as_str())
    }
}

impl<D: SagaData> PropertyTable<D> {
    /// Full table for a saga data type: `Id` plus everything the type registers.
    pub fn for_data() -> Self {
        let identity = PropertyTable::<D>::new().field(
            ID_PROPERTY,
            |d: &D| &d.metadata().id,
            |d: &mut D| &mut d.metadata_mut().id,
        );
        D::properties(identity)
    }
}

/// One entry of a backend's correlation index: property path plus current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedProperty {
    pub name: String,
    pub value: CorrelationValue,
}

impl IndexedProperty {
    pub fn new(name: impl Into<String>, value: CorrelationValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Type-erased saga data as exchanged with storage backends.
///
/// `id` and `revision` are authoritative; the copies inside `body` are
/// overwritten when the document is turned back into typed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaDocument {
    pub id: SagaId,
    pub revision: Revision,
    pub data_type: String,
    pub body: JsonValue,
}

impl SagaDocument {
    pub fn from_data<D: SagaData>(data: &D) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: data.id(),
            revision: data.revision(),
            data_type: D::DATA_TYPE.to_string(),
            body: serde_json::to_value(data)?,
        })
    }

    pub fn to_data<D: SagaData>(&self) -> Result<D, serde_json::Error> {
        let mut data: D = serde_json::from_value(self.body.clone())?;
        *data.metadata_mut() = SagaMetadata {
            id: self.id,
            revision: self.revision,
        };
        Ok(data)
    }
}
