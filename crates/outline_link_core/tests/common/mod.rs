#![allow(dead_code)]

use outline_link_core::{
    ContentNode, ContentStore, LinkContext, LinkService, NodeId, NodeKind, OutlineService,
    Repository, SchemaConfig, SqliteContentStore, StaticSchemaCatalog, WriteOptions,
};
use rusqlite::Connection;
use serde_json::{json, Value};

pub type Outline<'conn> = OutlineService<SqliteContentStore<'conn>, StaticSchemaCatalog>;

pub const SCHEMAS: &str = r#"{"schemas":[
    {"id":"course","outline":[
        {"type":"MODULE","root":true},
        {"type":"PAGE","parents":["MODULE"]},
        {"type":"SECTION","parents":["PAGE"]}
    ]},
    {"id":"handbook","outline":[
        {"type":"CHAPTER","root":true,"compatible_with":["MODULE"]},
        {"type":"ARTICLE","parents":["CHAPTER"],"compatible_with":["PAGE"]}
    ]}
]}"#;

pub fn outline(conn: &Connection) -> Outline<'_> {
    let config = SchemaConfig::from_json_str(SCHEMAS).unwrap();
    let catalog = StaticSchemaCatalog::from_config(config).unwrap();
    let store = SqliteContentStore::try_new(conn).unwrap();
    OutlineService::new(LinkService::new(store, catalog))
}

pub fn ctx() -> LinkContext {
    LinkContext::actor("author-1")
}

pub fn repository(service: &Outline<'_>, name: &str, schema_id: &str) -> Repository {
    let repository = Repository::new(name, schema_id);
    service
        .links()
        .store()
        .create_repository(&repository)
        .unwrap();
    repository
}

pub fn activity(
    service: &Outline<'_>,
    repository: &Repository,
    parent_id: Option<NodeId>,
    node_type: &str,
    position: f64,
    title: &str,
) -> ContentNode {
    service
        .create_activity(
            repository.id,
            parent_id,
            node_type,
            position,
            json!({ "title": title }),
            &ctx(),
            WriteOptions::user(),
        )
        .unwrap()
}

pub fn element(service: &Outline<'_>, activity_id: NodeId, position: f64, body: &str) -> ContentNode {
    service
        .create_element(
            activity_id,
            "text",
            position,
            json!({ "body": body }),
            &ctx(),
            WriteOptions::user(),
        )
        .unwrap()
}

/// Reloads a node, soft-deleted rows included.
pub fn reload(service: &Outline<'_>, node: &ContentNode) -> ContentNode {
    service
        .links()
        .store()
        .find_by_id(node.kind, node.id, true)
        .unwrap()
        .unwrap()
}

pub fn title(node: &ContentNode) -> &str {
    node.data["title"].as_str().unwrap_or_default()
}

/// Source course used across link tests:
///
/// ```text
/// MODULE "Intro"        [text "welcome"]
///   PAGE "Basics"       [text "basics"]
///     SECTION "Detail"  [text "detail"]
///   PAGE "Advanced"     [text "advanced"]
/// ```
pub struct CourseTree {
    pub repository: Repository,
    pub module: ContentNode,
    pub basics: ContentNode,
    pub section: ContentNode,
    pub advanced: ContentNode,
    pub elements: Vec<ContentNode>,
}

pub fn course_tree(service: &Outline<'_>) -> CourseTree {
    let repository = repository(service, "Source course", "course");
    let module = activity(service, &repository, None, "MODULE", 1.0, "Intro");
    // Created out of order to check that clones follow `position`.
    let advanced = activity(service, &repository, Some(module.id), "PAGE", 2.0, "Advanced");
    let basics = activity(service, &repository, Some(module.id), "PAGE", 1.0, "Basics");
    let section = activity(service, &repository, Some(basics.id), "SECTION", 1.0, "Detail");

    let elements = vec![
        element(service, module.id, 1.0, "welcome"),
        element(service, basics.id, 1.0, "basics"),
        element(service, section.id, 1.0, "detail"),
        element(service, advanced.id, 1.0, "advanced"),
    ];

    CourseTree {
        repository,
        module: reload(service, &module),
        basics: reload(service, &basics),
        section: reload(service, &section),
        advanced: reload(service, &advanced),
        elements,
    }
}

pub fn count_rows(conn: &Connection, table: &str, repository: &Repository) -> i64 {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE repository_id = ?1;"),
        [repository.id.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

/// Simulates a later author edit of a source by moving its `modified_at`
/// forward without going through the service.
pub fn touch_source(conn: &Connection, node: &ContentNode, data: Value) -> i64 {
    let table = match node.kind {
        NodeKind::Activity => "activities",
        NodeKind::ContentElement => "content_elements",
    };
    conn.execute(
        &format!(
            "UPDATE {table} SET data = ?1, modified_at = modified_at + 1000 WHERE id = ?2;"
        ),
        [data.to_string(), node.id.to_string()],
    )
    .unwrap();
    node.modified_at + 1000
}

pub fn linked_flags(service: &Outline<'_>, nodes: &[ContentNode]) -> Vec<bool> {
    nodes
        .iter()
        .map(|node| reload(service, node).is_linked_copy)
        .collect()
}
