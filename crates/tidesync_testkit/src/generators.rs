//! Property-based test generators using proptest.
//!
//! Values produced here always fit the type tag they are paired with, so they
//! can be encrypted without a tag mismatch.

use proptest::prelude::*;
use std::collections::BTreeMap;
use tidesync_protocol::{FieldValue, OperationKind, TypeTag};

/// Strategy for finite floats that survive equality checks.
pub fn finite_float_strategy() -> impl Strategy<Value = f64> {
    -1.0e12f64..1.0e12
}

/// Strategy for scalar values of any shape.
pub fn scalar_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Integer),
        finite_float_strategy().prop_map(FieldValue::Float),
        ".{0,24}".prop_map(FieldValue::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(FieldValue::Bytes),
        any::<i64>().prop_map(FieldValue::Date),
    ]
}

/// Strategy for a value that `tag` accepts.
pub fn value_for_tag(tag: TypeTag) -> BoxedStrategy<FieldValue> {
    match tag {
        TypeTag::Text => ".{0,64}".prop_map(FieldValue::Text).boxed(),
        TypeTag::Number => prop_oneof![
            any::<i64>().prop_map(FieldValue::Integer),
            finite_float_strategy().prop_map(FieldValue::Float),
            any::<bool>().prop_map(FieldValue::Bool),
        ]
        .boxed(),
        TypeTag::Image | TypeTag::Bytes => prop::collection::vec(any::<u8>(), 0..256)
            .prop_map(FieldValue::Bytes)
            .boxed(),
        TypeTag::Date => any::<i64>().prop_map(FieldValue::Date).boxed(),
        TypeTag::Array | TypeTag::MutableArray => {
            prop::collection::vec(scalar_value_strategy(), 0..8)
                .prop_map(FieldValue::Array)
                .boxed()
        }
        TypeTag::Dictionary | TypeTag::MutableDictionary => {
            prop::collection::btree_map("[a-z]{1,8}", scalar_value_strategy(), 0..6)
                .prop_map(FieldValue::Dictionary)
                .boxed()
        }
        TypeTag::Null => Just(FieldValue::Null).boxed(),
        TypeTag::EntityString => "[A-Za-z0-9-]{1,36}".prop_map(FieldValue::Text).boxed(),
        TypeTag::EntityNumeric => any::<i64>().prop_map(FieldValue::Integer).boxed(),
    }
}

/// Strategy for a tag together with a value it accepts.
pub fn tagged_value_strategy() -> impl Strategy<Value = (TypeTag, FieldValue)> {
    prop::sample::select(TypeTag::ALL.to_vec())
        .prop_flat_map(|tag| value_for_tag(tag).prop_map(move |value| (tag, value)))
}

/// Strategy for human-readable group names.
pub fn group_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_-]{0,31}").expect("Invalid regex")
}

/// A local change to drive through an engine.
#[derive(Debug, Clone)]
pub struct LocalChange {
    /// Object key; the entity is always `Person`.
    pub key: i64,
    /// Operation kind.
    pub operation: OperationKind,
    /// Changed fields.
    pub fields: BTreeMap<String, FieldValue>,
}

/// Strategy for changes to `Person` objects with keys below `keys`.
///
/// Fields match [`person_schema`](crate::person_schema) without relationships.
pub fn local_change_strategy(keys: i64) -> impl Strategy<Value = LocalChange> {
    let name = ".{1,16}".prop_map(FieldValue::Text);
    let age = (0i64..120).prop_map(FieldValue::Integer);
    prop_oneof![
        3 => (0..keys, name, age.clone()).prop_map(|(key, name, age)| LocalChange {
            key,
            operation: OperationKind::Create,
            fields: BTreeMap::from([("name".to_string(), name), ("age".to_string(), age)]),
        }),
        4 => (0..keys, age).prop_map(|(key, age)| LocalChange {
            key,
            operation: OperationKind::Set,
            fields: BTreeMap::from([("age".to_string(), age)]),
        }),
        1 => (0..keys).prop_map(|key| LocalChange {
            key,
            operation: OperationKind::Delete,
            fields: BTreeMap::new(),
        }),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
