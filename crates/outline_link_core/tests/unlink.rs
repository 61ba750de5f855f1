mod common;

use common::{
    course_tree, ctx, linked_flags, outline, reload, repository, touch_source, CourseTree, Outline,
};
use outline_link_core::db::open_db_in_memory;
use outline_link_core::{ContentNode, ContentStore, LinkError, NodeKind};
use serde_json::json;
use uuid::Uuid;

fn linked_course(service: &Outline<'_>) -> (CourseTree, Vec<ContentNode>) {
    let course = course_tree(service);
    let target = repository(service, "Target", "course");
    let copies = service
        .links()
        .link_activity(course.module.id, target.id, None, 1.0, &ctx())
        .unwrap();
    (course, copies)
}

/// Copies in creation order: module, element, basics, element, section,
/// element, advanced, element.
const MODULE: usize = 0;
const BASICS: usize = 2;
const BASICS_ELEMENT: usize = 3;
const SECTION: usize = 4;
const SECTION_ELEMENT: usize = 5;
const ADVANCED: usize = 6;

#[test]
fn unlink_activity_detaches_whole_subtree() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (_, copies) = linked_course(&service);

    let unlinked = service
        .links()
        .unlink_activity(copies[MODULE].id, &ctx())
        .unwrap();

    assert!(!unlinked.is_linked_copy);
    for copy in &copies {
        let current = reload(&service, copy);
        assert!(!current.is_linked_copy);
        assert_eq!(current.source_modified_at, None);
        assert_eq!(current.source_id, copy.source_id, "provenance is kept");
        assert_eq!(current.data, copy.data);
    }
}

#[test]
fn unlink_activity_on_inner_node_leaves_ancestors_linked() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (_, copies) = linked_course(&service);

    service
        .links()
        .unlink_activity(copies[BASICS].id, &ctx())
        .unwrap();

    assert_eq!(
        linked_flags(&service, &copies),
        vec![true, true, false, false, false, false, true, true]
    );
}

#[test]
fn unlink_activity_is_a_no_op_for_unlinked_nodes() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    service
        .links()
        .unlink_activity(copies[MODULE].id, &ctx())
        .unwrap();
    let before = reload(&service, &copies[MODULE]);

    let again = service
        .links()
        .unlink_activity(copies[MODULE].id, &ctx())
        .unwrap();
    assert_eq!(again, before);

    let source = service
        .links()
        .unlink_activity(course.module.id, &ctx())
        .unwrap();
    assert_eq!(source, course.module);
}

#[test]
fn unlink_activity_reports_missing_activity() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let missing = Uuid::new_v4();

    let err = service
        .links()
        .unlink_activity(missing, &ctx())
        .unwrap_err();

    assert!(matches!(err, LinkError::ActivityNotFound(id) if id == missing));
}

#[test]
fn find_link_entry_point_walks_to_linked_root() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    let links = service.links();

    let from_element = links
        .find_link_entry_point(&copies[SECTION_ELEMENT])
        .unwrap()
        .unwrap();
    assert_eq!(from_element.id, copies[MODULE].id);

    let from_root = links.find_link_entry_point(&copies[MODULE]).unwrap().unwrap();
    assert_eq!(from_root.id, copies[MODULE].id);

    assert_eq!(links.find_link_entry_point(&course.section).unwrap(), None);
}

#[test]
fn find_link_entry_point_stops_below_unlinked_ancestor() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (_, copies) = linked_course(&service);
    let links = service.links();
    assert!(links.detach_on_edit(&copies[BASICS]).unwrap());

    let entry_point = links
        .find_link_entry_point(&copies[SECTION_ELEMENT])
        .unwrap()
        .unwrap();
    assert_eq!(entry_point.id, copies[SECTION].id);

    let basics = reload(&service, &copies[BASICS]);
    assert_eq!(links.find_link_entry_point(&basics).unwrap(), None);
}

#[test]
fn unlink_activity_if_linked_unlinks_from_entry_point() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (_, copies) = linked_course(&service);

    let entry_point = service
        .links()
        .unlink_activity_if_linked(copies[SECTION].id, &ctx())
        .unwrap()
        .unwrap();

    assert_eq!(entry_point.id, copies[MODULE].id);
    assert!(linked_flags(&service, &copies).iter().all(|linked| !linked));
}

#[test]
fn unlink_parent_if_linked_ignores_unlinked_and_missing_parents() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    let links = service.links();

    assert_eq!(
        links.unlink_parent_if_linked(course.module.id, &ctx()).unwrap(),
        None
    );
    assert_eq!(
        links.unlink_parent_if_linked(Uuid::new_v4(), &ctx()).unwrap(),
        None
    );
    assert!(linked_flags(&service, &copies).iter().all(|linked| *linked));

    let entry_point = links
        .unlink_parent_if_linked(copies[ADVANCED].id, &ctx())
        .unwrap()
        .unwrap();
    assert_eq!(entry_point.id, copies[MODULE].id);
    assert!(linked_flags(&service, &copies).iter().all(|linked| !linked));
}

#[test]
fn unlink_copies_of_source_detaches_every_copy() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, first) = linked_course(&service);
    let other = repository(&service, "Other", "course");
    let second = service
        .links()
        .link_activity(course.module.id, other.id, None, 1.0, &ctx())
        .unwrap();

    let affected = service
        .links()
        .unlink_copies_of_source(course.module.id)
        .unwrap();

    let mut affected_ids: Vec<Uuid> = affected.iter().map(|node| node.id).collect();
    affected_ids.sort();
    let mut expected = vec![first[MODULE].id, second[MODULE].id];
    expected.sort();
    assert_eq!(affected_ids, expected);
    assert!(affected
        .iter()
        .all(|node| !node.is_linked_copy && node.source_id == Some(course.module.id)));
    // Copies of other sources stay linked.
    assert!(reload(&service, &first[BASICS]).is_linked_copy);
    assert!(reload(&service, &second[BASICS]).is_linked_copy);
}

#[test]
fn unlink_copies_of_source_covers_elements_and_empty_sets() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    let links = service.links();

    let affected = links.unlink_copies_of_source(course.elements[1].id).unwrap();
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].id, copies[BASICS_ELEMENT].id);
    assert_eq!(affected[0].kind, NodeKind::ContentElement);
    assert!(!affected[0].is_linked_copy);

    assert!(links.unlink_copies_of_source(Uuid::new_v4()).unwrap().is_empty());
}

#[test]
fn detach_on_edit_only_touches_the_edited_node() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    let links = service.links();

    assert!(links.detach_on_edit(&copies[BASICS_ELEMENT]).unwrap());
    assert!(!links.detach_on_edit(&course.module).unwrap());

    assert_eq!(
        linked_flags(&service, &copies),
        vec![true, true, true, false, true, true, true, true]
    );
}

#[test]
fn pull_source_changes_refreshes_stale_copies() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    let links = service.links();
    assert!(!links.is_outdated(&copies[BASICS]).unwrap());

    let source_modified_at = touch_source(&conn, &course.basics, json!({ "title": "Basics v2" }));
    assert!(links.is_outdated(&copies[BASICS]).unwrap());

    assert!(links
        .pull_source_changes(NodeKind::Activity, copies[BASICS].id, &ctx())
        .unwrap());
    let refreshed = reload(&service, &copies[BASICS]);
    assert!(refreshed.is_linked_copy);
    assert_eq!(refreshed.data, json!({ "title": "Basics v2" }));
    assert_eq!(refreshed.source_modified_at, Some(source_modified_at));
    assert_eq!(refreshed.modified_at, copies[BASICS].modified_at);
    assert!(!links.is_outdated(&refreshed).unwrap());

    assert!(!links
        .pull_source_changes(NodeKind::Activity, copies[BASICS].id, &ctx())
        .unwrap());
}

#[test]
fn pull_source_changes_ignores_unlinked_and_reports_missing() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);
    let links = service.links();
    touch_source(&conn, &course.elements[0], json!({ "body": "hello" }));
    links.detach_on_edit(&copies[1]).unwrap();

    assert!(!links
        .pull_source_changes(NodeKind::ContentElement, copies[1].id, &ctx())
        .unwrap());
    assert_eq!(reload(&service, &copies[1]).data, json!({ "body": "welcome" }));

    let missing = Uuid::new_v4();
    assert!(matches!(
        links.pull_source_changes(NodeKind::ContentElement, missing, &ctx()),
        Err(LinkError::ElementNotFound(id)) if id == missing
    ));
}

#[test]
fn unlink_runs_inside_an_open_transaction() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (_, copies) = linked_course(&service);

    let result: Result<(), LinkError> = service.links().store().run_in_transaction(|_| {
        service
            .links()
            .unlink_activity(copies[MODULE].id, &ctx())?;
        Err(LinkError::ActivityNotFound(Uuid::nil()))
    });

    assert!(result.is_err());
    assert!(linked_flags(&service, &copies).iter().all(|linked| *linked));
}

#[test]
fn unlink_copies_of_source_rolls_back_with_outer_transaction() {
    let conn = open_db_in_memory().unwrap();
    let service = outline(&conn);
    let (course, copies) = linked_course(&service);

    let result: Result<(), LinkError> = service.links().store().run_in_transaction(|_| {
        let affected = service.links().unlink_copies_of_source(course.basics.id)?;
        assert_eq!(affected.len(), 1);
        assert!(!reload(&service, &copies[BASICS]).is_linked_copy);
        Err(LinkError::SourceNotFound(course.basics.id))
    });

    assert!(matches!(result, Err(LinkError::SourceNotFound(id)) if id == course.basics.id));
    assert!(reload(&service, &copies[BASICS]).is_linked_copy);
}
