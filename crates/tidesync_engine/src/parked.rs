//! Values of properties the local schema does not know yet.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tidesync_protocol::{EntityRef, FieldValue, GroupId, RecordId};

/// A remote value held until the local schema learns its property.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkedField {
    /// Object the value belongs to.
    pub target: EntityRef,
    /// Property name unknown to the local schema.
    pub property: String,
    /// Decrypted value.
    pub value: FieldValue,
    /// Group of the record that carried the value.
    pub group: GroupId,
    /// Record that carried the value.
    pub record: RecordId,
    /// When the value was parked.
    pub parked_at: Instant,
}

/// Parked values keyed by object and property.
///
/// A later value for the same property replaces an earlier one, and any
/// write of the property through the normal apply path discards it.
#[derive(Debug, Default)]
pub(crate) struct ParkedFields {
    fields: Mutex<BTreeMap<(EntityRef, String), ParkedField>>,
}

impl ParkedFields {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn park(&self, field: ParkedField) {
        let key = (field.target.clone(), field.property.clone());
        self.fields.lock().insert(key, field);
    }

    /// Forgets parked values for `properties` of `target`.
    pub(crate) fn discard<'a>(&self, target: &EntityRef, properties: impl IntoIterator<Item = &'a String>) {
        let mut fields = self.fields.lock();
        if fields.is_empty() {
            return;
        }
        for property in properties {
            fields.remove(&(target.clone(), property.clone()));
        }
    }

    /// Forgets every parked value of `target`.
    pub(crate) fn drop_object(&self, target: &EntityRef) -> usize {
        let mut fields = self.fields.lock();
        let before = fields.len();
        fields.retain(|(object, _), _| object != target);
        before - fields.len()
    }

    /// Removes the values of `group` whose property `known` accepts.
    pub(crate) fn take_known(
        &self,
        group: GroupId,
        known: impl Fn(&EntityRef, &str) -> bool,
    ) -> Vec<ParkedField> {
        let mut fields = self.fields.lock();
        let keys: Vec<(EntityRef, String)> = fields
            .iter()
            .filter(|(_, field)| field.group == group && known(&field.target, &field.property))
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| fields.remove(&key))
            .collect()
    }

    /// Groups holding at least one parked value.
    pub(crate) fn groups(&self) -> BTreeSet<GroupId> {
        self.fields.lock().values().map(|field| field.group).collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<ParkedField> {
        self.fields.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.fields.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_protocol::DeviceId;

    fn parked(key: i64, property: &str, value: i64, group: &str) -> ParkedField {
        let group = GroupId::from_name(group);
        ParkedField {
            target: EntityRef::new("Person", key),
            property: property.to_string(),
            value: FieldValue::Integer(value),
            group,
            record: RecordId {
                group,
                origin: DeviceId::from_bytes([6u8; 16]),
                sequence: value as u64,
            },
            parked_at: Instant::now(),
        }
    }

    #[test]
    fn later_value_replaces_earlier() {
        let store = ParkedFields::new();
        store.park(parked(1, "height", 170, "g"));
        store.park(parked(1, "height", 171, "g"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot()[0].value, FieldValue::Integer(171));
    }

    #[test]
    fn take_known_filters_group_and_property() {
        let store = ParkedFields::new();
        store.park(parked(1, "height", 1, "g"));
        store.park(parked(1, "shoe", 2, "g"));
        store.park(parked(2, "height", 3, "h"));

        let taken = store.take_known(GroupId::from_name("g"), |_, property| property == "height");
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].property, "height");
        assert_eq!(store.len(), 2);
        assert_eq!(store.groups().len(), 2);
    }

    #[test]
    fn writes_and_deletes_discard() {
        let store = ParkedFields::new();
        store.park(parked(1, "height", 1, "g"));
        store.park(parked(1, "shoe", 2, "g"));
        store.park(parked(2, "shoe", 3, "g"));

        store.discard(&EntityRef::new("Person", 1), [&"height".to_string()]);
        assert_eq!(store.len(), 2);

        assert_eq!(store.drop_object(&EntityRef::new("Person", 1)), 1);
        assert_eq!(store.len(), 1);
    }
}
