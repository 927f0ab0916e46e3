//! End-to-end reconciliation between simulated devices.

use tidesync_core::crypto::KeyMaterial;
use tidesync_core::MemoryStore;
use tidesync_engine::{ApplyOutcome, SyncConfig, SyncEngine, SyncError};
use tidesync_protocol::DeviceId;
use tidesync_testkit::prelude::*;

fn person(key: i64) -> EntityRef {
    EntityRef::new("Person", key)
}

fn team() -> GroupId {
    GroupId::from_name("teamA")
}

#[test]
fn set_waits_for_missing_create() {
    init_tracing();
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();
    assert_eq!(group, GroupId::from_name("teamA"));

    x.create(group, &person(7), fields(&[]));
    x.set(group, &person(7), fields(&[("name", FieldValue::from("Ann"))]));
    let outbox = x.outbox(group);
    let (create, set) = (outbox[0].clone(), outbox[1].clone());

    // the create is lost, the set arrives
    let report = y.engine.ingest(vec![set]);
    assert_eq!(report.group(group).map(|r| r.deferred), Some(1));
    assert!(y.object(&person(7)).is_none());

    let unresolved = y.engine.unresolved_deferred();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].waiting_on, person(7));

    // the create is retried
    let report = y.engine.ingest(vec![create]);
    let totals = report.totals();
    assert_eq!(totals.applied, 2);
    assert_eq!(totals.replayed, 1);

    assert_eq!(y.field(&person(7), "name"), Some(FieldValue::from("Ann")));
    assert!(y.engine.unresolved_deferred().is_empty());
}

#[test]
fn stale_set_after_delete_is_rejected() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(7), fields(&[("age", FieldValue::Integer(29))]));
    x.set(group, &person(7), fields(&[("age", FieldValue::Integer(30))]));
    x.delete(group, &person(7));
    let outbox = x.outbox(group);

    y.engine.ingest(vec![outbox[0].clone(), outbox[2].clone()]);
    assert!(y.object(&person(7)).is_none());
    assert!(y.engine.is_defunct(&person(7)));

    let report = y.engine.ingest(vec![outbox[1].clone()]);
    assert_eq!(report.group(group).map(|r| r.rejected), Some(1));
    assert!(y.object(&person(7)).is_none());
    assert_eq!(y.engine.stats().rejected, 1);
}

#[test]
fn delete_blocks_later_create_and_set() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(3), fields(&[("name", FieldValue::from("Cy"))]));
    x.set(group, &person(3), fields(&[("age", FieldValue::Integer(5))]));
    x.delete(group, &person(3));
    let outbox = x.outbox(group);

    // delete first, then everything it superseded
    y.engine.ingest(vec![outbox[2].clone()]);
    let report = y.engine.ingest(vec![outbox[0].clone(), outbox[1].clone()]);

    assert_eq!(report.group(group).map(|r| r.rejected), Some(2));
    assert!(y.object(&person(3)).is_none());
    assert!(y.engine.unresolved_deferred().is_empty());
}

#[test]
fn delete_drops_deferred_changes_to_the_object() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(4), fields(&[]));
    x.set(group, &person(4), fields(&[("age", FieldValue::Integer(8))]));
    x.delete(group, &person(4));
    let outbox = x.outbox(group);

    y.engine.ingest(vec![outbox[1].clone()]);
    assert_eq!(y.engine.unresolved_deferred().len(), 1);

    y.engine.ingest(vec![outbox[2].clone()]);
    assert!(y.engine.unresolved_deferred().is_empty());

    let report = y.engine.ingest(vec![outbox[0].clone()]);
    assert_eq!(report.group(group).map(|r| r.rejected), Some(1));
    assert!(y.object(&person(4)).is_none());
}

#[test]
fn redelivery_is_idempotent() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(1), fields(&[("name", FieldValue::from("Dee"))]));
    x.set(group, &person(1), fields(&[("age", FieldValue::Integer(44))]));
    x.create(group, &person(2), fields(&[]));
    x.delete(group, &person(2));

    x.deliver_to(&y, group);
    let once = y.engine.store().snapshot();

    let report = x.deliver_to(&y, group);
    assert_eq!(report.totals().duplicates, 4);
    assert_eq!(report.totals().applied, 0);
    assert_eq!(y.engine.store().snapshot(), once);
    assert_eq!(once, x.engine.store().snapshot());
}

#[test]
fn deferred_redelivery_is_a_duplicate() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(9), fields(&[]));
    x.set(group, &person(9), fields(&[("age", FieldValue::Integer(1))]));
    let set = x.outbox(group)[1].clone();

    y.engine.ingest(vec![set.clone()]);
    let report = y.engine.ingest(vec![set]);
    assert_eq!(report.totals().duplicates, 1);
    assert_eq!(y.engine.unresolved_deferred().len(), 1);
}

#[test]
fn records_apply_in_arrival_order() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(1), fields(&[("age", FieldValue::Integer(0))]));
    for age in 1..=5 {
        x.set(group, &person(1), fields(&[("age", FieldValue::Integer(age))]));
    }

    x.deliver_to(&y, group);
    assert_eq!(y.field(&person(1), "age"), Some(FieldValue::Integer(5)));
}

#[test]
fn later_changes_wait_behind_a_deferred_one() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();
    let department = EntityRef::new("Department", 5);

    x.create(group, &person(1), fields(&[("age", FieldValue::Integer(20))]));
    x.create(group, &department, fields(&[("title", FieldValue::from("R&D"))]));
    x.set(group, &person(1), fields(&[("department", FieldValue::Integer(5))]));
    x.set(group, &person(1), fields(&[("age", FieldValue::Integer(21))]));
    let outbox = x.outbox(group);

    let report = y.engine.ingest(vec![
        outbox[0].clone(),
        outbox[2].clone(),
        outbox[3].clone(),
    ]);
    assert_eq!(report.group(group).map(|r| r.deferred), Some(2));
    assert_eq!(y.field(&person(1), "age"), Some(FieldValue::Integer(20)));
    let waiting: Vec<EntityRef> = y
        .engine
        .unresolved_deferred()
        .into_iter()
        .map(|u| u.waiting_on)
        .collect();
    assert_eq!(waiting, vec![department.clone(), department.clone()]);

    y.engine.ingest(vec![outbox[1].clone()]);
    assert_eq!(y.field(&person(1), "department"), Some(FieldValue::Integer(5)));
    assert_eq!(y.field(&person(1), "age"), Some(FieldValue::Integer(21)));
    assert_eq!(y.engine.store().snapshot(), x.engine.store().snapshot());
}

#[test]
fn replayed_change_does_not_overwrite_newer_values() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let people = team();
    let org = GroupId::from_name("org");

    x.create(people, &person(1), fields(&[("name", FieldValue::from("Zed"))]));
    x.create(org, &EntityRef::new("Department", 5), fields(&[]));
    x.set(
        people,
        &person(1),
        fields(&[
            ("department", FieldValue::Integer(5)),
            ("name", FieldValue::from("Ann")),
        ]),
    );
    x.set(people, &person(1), fields(&[("name", FieldValue::from("Bob"))]));

    x.deliver_to(&y, people);
    assert_eq!(y.field(&person(1), "name"), Some(FieldValue::from("Zed")));

    x.deliver_to(&y, org);
    assert_eq!(y.field(&person(1), "name"), Some(FieldValue::from("Bob")));
    assert_eq!(y.engine.store().snapshot(), x.engine.store().snapshot());
}

#[test]
fn dependency_chain_resolves_recursively() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();
    let location = EntityRef::new("Location", "hq");
    let department = EntityRef::new("Department", 1);

    x.create(group, &location, fields(&[("locationName", FieldValue::from("HQ"))]));
    x.create(group, &department, fields(&[("location", FieldValue::from("hq"))]));
    x.create(group, &person(1), fields(&[("department", FieldValue::Integer(1))]));
    let outbox = x.outbox(group);

    // children first
    y.engine.ingest(vec![outbox[2].clone(), outbox[1].clone()]);
    let waiting: Vec<EntityRef> = y
        .engine
        .unresolved_deferred()
        .into_iter()
        .map(|u| u.waiting_on)
        .collect();
    assert_eq!(waiting, vec![department.clone(), location.clone()]);

    let report = y.engine.ingest(vec![outbox[0].clone()]);
    assert_eq!(report.totals().replayed, 2);
    assert!(y.object(&location).is_some());
    assert!(y.object(&department).is_some());
    assert_eq!(y.field(&person(1), "department"), Some(FieldValue::Integer(1)));
    assert!(y.engine.unresolved_deferred().is_empty());
}

#[test]
fn remote_create_releases_other_groups() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let people = GroupId::from_name("people");
    let org = GroupId::from_name("org");

    x.create(org, &EntityRef::new("Department", 2), fields(&[]));
    x.create(people, &person(1), fields(&[("department", FieldValue::Integer(2))]));

    x.deliver_to(&y, people);
    assert_eq!(y.engine.unresolved_deferred().len(), 1);

    let report = x.deliver_to(&y, org);
    assert!(report.is_success());
    assert!(y.engine.unresolved_deferred().is_empty());
    assert_eq!(y.field(&person(1), "department"), Some(FieldValue::Integer(2)));
    assert_eq!(y.engine.stats().replayed, 1);
}

#[test]
fn busy_group_replays_on_its_next_pass() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let people = GroupId::from_name("people");
    let org = GroupId::from_name("org");

    x.create(org, &EntityRef::new("Department", 2), fields(&[]));
    x.create(people, &person(1), fields(&[("department", FieldValue::Integer(2))]));
    x.deliver_to(&y, people);

    let pass = y.engine.begin_pass(people).unwrap();
    x.deliver_to(&y, org);
    assert_eq!(y.engine.unresolved_deferred().len(), 1);
    drop(pass);

    let report = y.engine.resolve_deferred(people).unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.applied, 1);
    assert!(y.object(&person(1)).is_some());
}

#[test]
fn delete_of_dependency_converges_in_any_order() {
    let x = TestDevice::new(1);
    let group = team();
    let department = EntityRef::new("Department", 3);

    x.create(group, &department, fields(&[("title", FieldValue::from("Ops"))]));
    x.create(group, &person(1), fields(&[("department", FieldValue::Integer(3))]));
    x.delete(group, &department);
    let outbox = x.outbox(group);
    let (create_department, create_person, delete) =
        (outbox[0].clone(), outbox[1].clone(), outbox[2].clone());

    let a = TestDevice::new(2);
    for record in [create_person.clone(), delete.clone(), create_department.clone()] {
        a.engine.ingest(vec![record]);
    }
    let b = TestDevice::new(3);
    for record in [delete, create_person, create_department] {
        b.engine.ingest(vec![record]);
    }

    let expected = x.engine.store().snapshot();
    assert_eq!(a.field(&person(1), "department"), Some(FieldValue::Integer(3)));
    assert_eq!(a.engine.store().snapshot(), expected);
    assert_eq!(b.engine.store().snapshot(), expected);
    assert!(a.engine.unresolved_deferred().is_empty());
    assert!(b.engine.unresolved_deferred().is_empty());
}

#[test]
fn local_delete_releases_waiting_changes() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();
    let department = EntityRef::new("Department", 3);

    x.create(group, &department, fields(&[]));
    x.create(group, &person(1), fields(&[("department", FieldValue::Integer(3))]));
    y.engine.ingest(vec![x.outbox(group)[1].clone()]);
    assert_eq!(y.engine.unresolved_deferred().len(), 1);

    y.delete(GroupId::from_name("org"), &department);
    assert!(y.engine.unresolved_deferred().is_empty());
    assert_eq!(y.field(&person(1), "department"), Some(FieldValue::Integer(3)));
}

#[test]
fn local_create_resolves_waiting_changes() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(6), fields(&[]));
    x.set(group, &person(6), fields(&[("name", FieldValue::from("Eve"))]));
    let set = x.outbox(group)[1].clone();

    y.engine.ingest(vec![set]);
    assert_eq!(y.engine.unresolved_deferred().len(), 1);

    y.create(group, &person(6), fields(&[]));
    assert!(y.engine.unresolved_deferred().is_empty());
    assert_eq!(y.field(&person(6), "name"), Some(FieldValue::from("Eve")));
}

#[test]
fn unresolved_changes_are_kept() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(8), fields(&[]));
    x.set(group, &person(8), fields(&[("age", FieldValue::Integer(3))]));
    let set = x.outbox(group)[1].clone();

    y.engine.ingest(vec![set]);
    for _ in 0..3 {
        y.engine.resolve_deferred(group).unwrap();
    }

    let unresolved = y.engine.unresolved_deferred();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].target, person(8));
    assert_eq!(unresolved[0].operation, OperationKind::Set);
}

#[test]
fn undecodable_field_is_skipped() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(
        group,
        &person(1),
        fields(&[
            ("name", FieldValue::from("Fay")),
            ("age", FieldValue::Integer(33)),
        ]),
    );
    let mut record = x.outbox(group)[0].clone();
    if let Some(field) = record.fields.get_mut("name") {
        let last = field.ciphertext.len() - 1;
        field.ciphertext[last] ^= 0xff;
    }

    let pass = y.engine.begin_pass(group).unwrap();
    let outcome = y.engine.apply(&pass, record).unwrap();
    drop(pass);

    assert_eq!(outcome, ApplyOutcome::Applied { skipped_fields: 1 });
    assert_eq!(y.field(&person(1), "name"), None);
    assert_eq!(y.field(&person(1), "age"), Some(FieldValue::Integer(33)));
    assert_eq!(y.engine.stats().field_decode_failures, 1);
}

#[test]
fn foreign_keys_cannot_read_fields() {
    let x = TestDevice::new(1);
    let group = team();
    x.create(group, &person(1), fields(&[("name", FieldValue::from("Gus"))]));

    let material = KeyMaterial::new("other-app", "other-account", DeviceId::from_bytes([3u8; 16]));
    let outsider = SyncEngine::new(
        SyncConfig::for_material(&material),
        &material,
        MemoryStore::new(),
        person_schema(),
    )
    .unwrap();

    let report = outsider.ingest(x.outbox(group));
    assert_eq!(report.totals().skipped_fields, 1);
    assert_eq!(outsider.stats().field_decode_failures, 1);
}

#[test]
fn reserved_operations_apply_as_set() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(1), fields(&[("age", FieldValue::Integer(10))]));
    x.write(group, &person(1), OperationKind::Increment, fields(&[("age", FieldValue::Integer(11))]));
    x.write(group, &person(1), OperationKind::Decrement, fields(&[("age", FieldValue::Integer(9))]));

    let ops: Vec<OperationKind> = x.outbox(group).iter().map(|r| r.operation).collect();
    assert_eq!(
        ops,
        vec![OperationKind::Create, OperationKind::Increment, OperationKind::Decrement]
    );

    x.deliver_to(&y, group);
    assert_eq!(y.field(&person(1), "age"), Some(FieldValue::Integer(9)));
}

#[test]
fn apply_refuses_records_of_another_group() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    x.create(team(), &person(1), fields(&[]));

    let pass = y.engine.begin_pass(GroupId::from_name("elsewhere")).unwrap();
    let err = y.engine.apply(&pass, x.outbox(team())[0].clone()).unwrap_err();
    assert!(matches!(err, SyncError::WrongGroup { .. }));
}

#[test]
fn batch_tidemark_is_recorded() {
    let x = TestDevice::new(1);
    let y = TestDevice::new(2);
    let group = team();

    for key in 0..3 {
        x.create(group, &person(key), fields(&[]));
    }
    x.deliver_to(&y, group);

    assert_eq!(y.engine.groups().tidemark(group), Some(3));
    let candidates = y.engine.poll_candidates(10);
    let polled = candidates.iter().find(|c| c.group == group).unwrap();
    assert_eq!(polled.pull_request(100).since, 3);
    // never-polled default group comes first
    assert_eq!(candidates[0].group, GroupId::from_name("default"));
}

#[test]
fn acknowledged_records_leave_the_queue() {
    let x = TestDevice::new(1);
    let group = team();
    for key in 0..4 {
        x.create(group, &person(key), fields(&[]));
    }

    x.engine.acknowledge(group, 3);
    let pending = x.outbox(group);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sequence, 4);
}


#[test]
fn paged_delivery_resumes_after_last_record() {
    let x = TestDevice::with_config(1, |config| config.with_pull_batch_size(2));
    let y = TestDevice::new(2);
    let group = team();
    for key in 0..3 {
        x.create(group, &person(key), fields(&[]));
    }

    let first = x.deliver_to(&y, group);
    assert_eq!(first.totals().applied, 2);
    assert_eq!(y.engine.groups().tidemark(group), Some(2));

    let candidate = y
        .engine
        .poll_candidates(10)
        .into_iter()
        .find(|c| c.group == group)
        .unwrap();
    let batch = x.engine.pull(&candidate.pull_request(2));
    assert_eq!(batch.records.len(), 1);

    y.engine.ingest_batch(&batch.encode().unwrap()).unwrap();
    assert_eq!(y.engine.groups().tidemark(group), Some(3));
    assert!(y.object(&person(2)).is_some());
}

#[test]
fn unknown_property_is_parked_until_learned() {
    let x = TestDevice::with_schema(
        1,
        person_schema().with_property("Person", "nickname", TypeTag::Text),
    );
    let y = TestDevice::new(2);
    let group = team();

    x.create(
        group,
        &person(1),
        fields(&[
            ("name", FieldValue::from("Hal")),
            ("nickname", FieldValue::from("H")),
        ]),
    );
    let report = x.deliver_to(&y, group);
    assert_eq!(report.totals().parked_fields, 1);
    assert_eq!(y.field(&person(1), "name"), Some(FieldValue::from("Hal")));
    assert_eq!(y.field(&person(1), "nickname"), None);

    let parked = y.engine.parked_fields();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].target, person(1));
    assert_eq!(parked[0].property, "nickname");
    assert_eq!(y.engine.replay_parked_fields().unwrap(), 0);

    y.engine.schema().set_property("Person", "nickname", TypeTag::Text);
    assert_eq!(y.engine.replay_parked_fields().unwrap(), 1);
    assert_eq!(y.field(&person(1), "nickname"), Some(FieldValue::from("H")));
    assert!(y.engine.parked_fields().is_empty());
    assert_eq!(y.engine.stats().adopted_fields, 1);
}

#[test]
fn newer_value_supersedes_parked_one() {
    let x = TestDevice::with_schema(
        1,
        person_schema().with_property("Person", "nickname", TypeTag::Text),
    );
    let y = TestDevice::new(2);
    let group = team();

    x.create(group, &person(1), fields(&[("nickname", FieldValue::from("H"))]));
    x.set(group, &person(1), fields(&[("nickname", FieldValue::from("Hank"))]));
    let outbox = x.outbox(group);

    y.engine.ingest(vec![outbox[0].clone()]);
    assert_eq!(y.engine.parked_fields().len(), 1);

    y.engine.schema().set_property("Person", "nickname", TypeTag::Text);
    y.engine.ingest(vec![outbox[1].clone()]);
    assert!(y.engine.parked_fields().is_empty());
    assert_eq!(y.engine.replay_parked_fields().unwrap(), 0);
    assert_eq!(y.field(&person(1), "nickname"), Some(FieldValue::from("Hank")));
}
